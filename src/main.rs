//! advset - train knowledge-base embeddings with adversarial clause regularization.

use advset::eval::{log_auc, log_metrics, log_predicate_metrics};
use advset::kb::{read_triples, Triple};
use advset::model::ModelKind;
use advset::session::default_device;
use advset::training::{AdversaryConfig, FactLoss, OptimizerKind, PairwiseLoss, PointwiseLoss};
use advset::{
    evaluate_auc, evaluate_ranking, evaluate_ranking_by_predicate, parse_clauses, Clause, DataPreparation,
    EntityConstraint, Fact, ModelBundle, Pooling, Similarity, TrainConfig, Trainer, TrainingSession, Vocabulary,
};
use anyhow::{Context, Result};
use clap::Parser;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "advset", version, about = "Adversarial sets for regularizing knowledge-base embeddings")]
struct Cli {
    /// Training triples (tab-separated)
    #[arg(short = 't', long)]
    train: PathBuf,

    /// Validation triples
    #[arg(short = 'v', long)]
    valid: Option<PathBuf>,

    /// Test triples
    #[arg(short = 'T', long)]
    test: Option<PathBuf>,

    /// Horn clauses, one per line
    #[arg(short = 'c', long)]
    clauses: Option<PathBuf>,

    #[arg(short = 'D', long)]
    debug: bool,

    /// Print the score of every triple in these files after training
    #[arg(long, num_args = 1..)]
    debug_scores: Vec<PathBuf>,

    /// Prefix for per-epoch embedding snapshots
    #[arg(long)]
    debug_embeddings: Option<PathBuf>,

    #[arg(short = 'l', long, default_value_t = 0.1)]
    lr: f64,

    #[arg(long, default_value_t = 0.1)]
    initial_accumulator_value: f64,

    #[arg(long, default_value_t = OptimizerKind::Adagrad)]
    optimizer: OptimizerKind,

    #[arg(short = 'b', long, default_value_t = 10)]
    nb_batches: usize,

    #[arg(short = 'e', long, default_value_t = 100)]
    nb_epochs: usize,

    #[arg(short = 'm', long, default_value_t = ModelKind::DistMult)]
    model: ModelKind,

    #[arg(short = 's', long, default_value_t = Similarity::Dot)]
    similarity: Similarity,

    #[arg(short = 'k', long, default_value_t = 10)]
    embedding_size: usize,

    /// Defaults to the entity embedding size
    #[arg(short = 'p', long)]
    predicate_embedding_size: Option<usize>,

    /// ER-MLP hidden layer width
    #[arg(short = 'H', long)]
    hidden_size: Option<usize>,

    /// Pointwise fact loss
    #[arg(long, conflicts_with = "pairwise_loss")]
    loss: Option<PointwiseLoss>,

    /// Pairwise fact loss (default: hinge)
    #[arg(long)]
    pairwise_loss: Option<PairwiseLoss>,

    /// Also corrupt the relation of each training fact
    #[arg(long)]
    corrupt_relations: bool,

    #[arg(short = 'M', long, default_value_t = 1.0)]
    margin: f64,

    /// Project entity embeddings onto the unit cube instead of the unit sphere
    #[arg(long)]
    unit_cube: bool,

    /// Entities pinned to the all-ones embedding
    #[arg(long, num_args = 1..)]
    all_one_entities: Vec<String>,

    /// Weight of the L2 penalty on predicate embeddings
    #[arg(long)]
    predicate_l2: Option<f64>,

    /// Maximum L2 norm of predicate embeddings
    #[arg(long)]
    predicate_norm: Option<f64>,

    #[arg(short = 'S', long, default_value_t = 0)]
    seed: u64,

    /// Weight of the schema-aware regularizer
    #[arg(long)]
    sar_weight: Option<f64>,

    #[arg(long, default_value_t = Similarity::L2Sqr)]
    sar_similarity: Similarity,

    /// Save the trained model to PREFIX.json and PREFIX.safetensors
    #[arg(long)]
    save: Option<PathBuf>,

    /// Rank at most this many validation and test facts
    #[arg(long)]
    nb_eval_samples: Option<usize>,

    /// Report ROC-AUC and PR-AUC over the negative validation and test facts instead of ranking
    #[arg(short = 'a', long)]
    auc: bool,

    /// Also report ranking metrics for each predicate
    #[arg(long)]
    debug_results: bool,

    /// Learning rate of the violator search (enables the adversary)
    #[arg(short = 'L', long)]
    adv_lr: Option<f64>,

    #[arg(long, default_value_t = 10)]
    adversary_epochs: usize,

    #[arg(long, default_value_t = 1)]
    discriminator_epochs: usize,

    #[arg(short = 'W', long, default_value_t = 1.0)]
    adv_weight: f64,

    #[arg(long, default_value_t = 0.0)]
    adv_margin: f64,

    #[arg(long, default_value_t = 1)]
    adv_batch_size: usize,

    /// Initialize violators from entity embeddings
    #[arg(long)]
    adv_init_ground: bool,

    /// Groundings sampled per clause to count violated clauses
    #[arg(long)]
    adv_ground_samples: Option<usize>,

    #[arg(long, default_value_t = 0.0)]
    adv_ground_tol: f64,

    #[arg(long, default_value_t = Pooling::Sum)]
    adv_pooling: Pooling,

    /// Use the closed-form violation bound (unit cube only)
    #[arg(long)]
    adv_closed_form: bool,

    /// Fraction of training facts to keep
    #[arg(long)]
    subsample_size: Option<f64>,

    /// Fraction of facts to keep for predicates appearing in clause heads
    #[arg(long)]
    head_subsample_size: Option<f64>,

    /// Add every fact entailed by the clauses to the training set
    #[arg(long)]
    materialize: bool,
}

impl Cli {
    fn data_preparation(&self) -> DataPreparation {
        DataPreparation {
            subsample: self.subsample_size,
            head_subsample: self.head_subsample_size,
            materialize: self.materialize,
        }
    }

    fn train_config(&self) -> TrainConfig {
        let fact_loss = match (self.loss, self.pairwise_loss) {
            (Some(loss), _) => FactLoss::Pointwise(loss),
            (None, Some(loss)) => FactLoss::Pairwise(loss),
            (None, None) => FactLoss::default(),
        };
        TrainConfig {
            model: self.model,
            similarity: self.similarity,
            entity_embedding_size: self.embedding_size,
            predicate_embedding_size: self.predicate_embedding_size,
            hidden_size: self.hidden_size,
            fact_loss,
            margin: self.margin,
            optimizer: self.optimizer,
            lr: self.lr,
            initial_accumulator_value: self.initial_accumulator_value,
            nb_epochs: self.nb_epochs,
            nb_batches: self.nb_batches,
            discriminator_epochs: self.discriminator_epochs,
            corrupt_relations: self.corrupt_relations,
            constraint: if self.unit_cube {
                EntityConstraint::UnitCube
            } else {
                EntityConstraint::UnitSphere
            },
            predicate_norm: self.predicate_norm,
            predicate_l2: self.predicate_l2,
            all_one_entities: self.all_one_entities.clone(),
            adversary: AdversaryConfig {
                lr: self.adv_lr,
                closed_form: self.adv_closed_form,
                weight: self.adv_weight,
                margin: self.adv_margin,
                batch_size: self.adv_batch_size,
                pooling: self.adv_pooling,
                epochs: self.adversary_epochs,
                init_ground: self.adv_init_ground,
                ground_samples: self.adv_ground_samples,
                ground_tolerance: self.adv_ground_tol,
            },
            sar_weight: self.sar_weight,
            sar_similarity: self.sar_similarity,
            seed: self.seed,
            debug: self.debug,
            debug_embeddings: self.debug_embeddings.clone(),
        }
    }
}

fn read_optional(path: Option<&Path>) -> Result<(Vec<Triple>, Vec<Triple>)> {
    match path {
        Some(path) => read_triples(path).with_context(|| format!("failed to read triples from {}", path.display())),
        None => Ok((Vec::new(), Vec::new())),
    }
}

fn read_clauses(path: &Path) -> Result<Vec<Clause>> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_clauses(&text).with_context(|| format!("failed to parse clauses in {}", path.display()))
}

fn print_debug_scores(session: &TrainingSession, path: &Path) -> Result<()> {
    let (triples, _) = read_optional(Some(path))?;
    let facts = session.vocab().facts(&triples)?;
    let scorer = session.scorer();
    let walks: Vec<Vec<u32>> = facts.iter().map(|f| vec![f.predicate]).collect();
    let direct: Vec<(u32, u32)> = facts.iter().map(|f| (f.subject, f.object)).collect();
    let inverse: Vec<(u32, u32)> = facts.iter().map(|f| (f.object, f.subject)).collect();
    let direct = scorer.score(&walks, &direct)?;
    let inverse = scorer.score(&walks, &inverse)?;

    for ((t, score), inverse_score) in triples.iter().zip(direct).zip(inverse) {
        let triple = format!("({}, {}, {})", t.subject, t.predicate, t.object);
        println!("{}\tTriple: {}\tScore: {}", path.display(), triple, score);
        println!("{}\tInverse Triple: {}\tScore: {}", path.display(), triple, inverse_score);
    }
    Ok(())
}

struct EvalOptions {
    limit: Option<usize>,
    per_predicate: bool,
}

fn evaluate(session: &TrainingSession, tag: &str, facts: &[Fact], known: &FxHashSet<Fact>, opts: &EvalOptions) -> Result<()> {
    if facts.is_empty() {
        return Ok(());
    }
    let facts = &facts[..opts.limit.map_or(facts.len(), |n| n.min(facts.len()))];
    let entities = session.vocab().entity_indices();
    let scorer = session.scorer();
    let metrics =
        evaluate_ranking(&scorer, facts, known, &entities).with_context(|| format!("{tag} evaluation failed"))?;
    log_metrics(tag, &metrics);

    if opts.per_predicate {
        let per_predicate = evaluate_ranking_by_predicate(&scorer, facts, known, &entities)
            .with_context(|| format!("{tag} per-predicate evaluation failed"))?;
        log_predicate_metrics(tag, &per_predicate, session.vocab());
    }
    Ok(())
}

fn evaluate_classification(session: &TrainingSession, tag: &str, positives: &[Fact], negatives: &[Fact]) -> Result<()> {
    if positives.is_empty() || negatives.is_empty() {
        return Ok(());
    }
    let metrics = evaluate_auc(&session.scorer(), positives, negatives)
        .with_context(|| format!("{tag} AUC evaluation failed"))?;
    log_auc(tag, &metrics);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    info!("Command line: {}", command_line);

    let (train_triples, _) = read_optional(Some(cli.train.as_path()))?;
    let (valid_triples, valid_negative_triples) = read_optional(cli.valid.as_deref())?;
    let (test_triples, test_negative_triples) = read_optional(cli.test.as_deref())?;
    info!(
        "#Training: {}, #Validation: {}, #Test: {}",
        train_triples.len(),
        valid_triples.len(),
        test_triples.len()
    );
    if !valid_negative_triples.is_empty() || !test_negative_triples.is_empty() {
        info!(
            "#Negative validation: {}, #Negative test: {}",
            valid_negative_triples.len(),
            test_negative_triples.len()
        );
    }

    let vocab = Vocabulary::from_triples(
        train_triples
            .iter()
            .chain(&valid_triples)
            .chain(&valid_negative_triples)
            .chain(&test_triples)
            .chain(&test_negative_triples),
    );
    info!("#Entities: {}\t#Predicates: {}", vocab.nb_entities(), vocab.nb_predicates());

    let train = vocab.facts(&train_triples)?;
    let valid = vocab.facts(&valid_triples)?;
    let valid_negatives = vocab.facts(&valid_negative_triples)?;
    let test = vocab.facts(&test_triples)?;
    let test_negatives = vocab.facts(&test_negative_triples)?;

    let clauses = match &cli.clauses {
        Some(path) => read_clauses(path)?,
        None => Vec::new(),
    };
    for clause in &clauses {
        info!("Clause: {}", clause);
    }

    let config = cli.train_config();
    let device = default_device();
    let mut session =
        TrainingSession::new(config, vocab, &clauses, &device).context("failed to set up the training session")?;
    let train = session
        .prepare_facts(train, &clauses, &cli.data_preparation())
        .context("failed to prepare the training facts")?;

    let report = Trainer::new(&mut session).run(&train).context("training failed")?;
    info!("Trained for {} epochs", report.epochs.len());

    for path in &cli.debug_scores {
        print_debug_scores(&session, path)?;
    }

    if let Some(prefix) = &cli.save {
        ModelBundle::from_session(&session, Some(command_line.clone()))?
            .save(prefix)
            .with_context(|| format!("failed to save the model to {}", prefix.display()))?;
        info!("Model saved in {}", prefix.display());
    }

    if cli.auc {
        evaluate_classification(&session, "valid", &valid, &valid_negatives)?;
        evaluate_classification(&session, "test", &test, &test_negatives)?;
    } else {
        let known: FxHashSet<Fact> = train.iter().chain(&valid).chain(&test).copied().collect();
        let opts = EvalOptions {
            limit: cli.nb_eval_samples,
            per_predicate: cli.debug_results,
        };
        evaluate(&session, "valid", &valid, &known, &opts)?;
        evaluate(&session, "test", &test, &known, &opts)?;
    }

    Ok(())
}
