//! The training session: every piece of mutable training state in one place.
//!
//! A session owns the embedding store, the scoring model, the seeded RNG and
//! the parameter groups, and is passed by reference to whatever runs a
//! phase. Nothing about a run lives in globals.

use crate::adversarial::{
    BoundClause, ClosedFormLifted, GroundLoss, GroundMappings, ViolatorSearch, ViolatorSettings,
};
use crate::embedding::{EmbeddingStore, Projector};
use crate::error::{AdvError, Result};
use crate::kb::{materialize, subsample, subsample_heads, Fact, Vocabulary};
use crate::model::{build_model, FactScorer, ScoringModel};
use crate::regularizers::SchemaRegularizer;
use crate::syntax::Clause;
use crate::training::{PhaseOptimizer, TrainConfig};
use candle_core::{Device, Var};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Normal,
    /// The fact loss became NaN
    NanAbort,
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Discriminator,
    Adversary,
    Terminated(Termination),
}

/// Optimizers keyed by phase. Each one only updates its own variables.
pub struct ParamGroups {
    /// Entity and predicate tables plus model parameters
    pub discriminator: PhaseOptimizer,
    /// Violating embeddings, when the gradient-based adversary is on
    pub adversary: Option<PhaseOptimizer>,
}

impl ParamGroups {
    /// Forget the adversary's accumulated state, as done before every search.
    pub fn reset_adversary(&mut self) -> Result<()> {
        if let Some(opt) = self.adversary.as_mut() {
            opt.reset()?;
        }
        Ok(())
    }
}

/// Changes to the training set made before the first epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DataPreparation {
    /// Fraction of all facts to keep
    pub subsample: Option<f64>,
    /// Fraction to keep of each predicate appearing in a clause head
    pub head_subsample: Option<f64>,
    /// Add every fact the clauses entail
    pub materialize: bool,
}

/// Sampled groundings of one clause for zero/one error checks.
pub struct GroundCheck {
    pub clause: BoundClause,
    pub mappings: GroundMappings,
}

pub struct TrainingSession {
    pub(crate) config: TrainConfig,
    pub(crate) vocab: Vocabulary,
    pub(crate) store: EmbeddingStore,
    pub(crate) model: Box<dyn ScoringModel>,
    pub(crate) projector: Projector,
    pub(crate) groups: ParamGroups,
    pub(crate) adversary: Option<ViolatorSearch>,
    pub(crate) closed_form: Option<ClosedFormLifted>,
    pub(crate) schema: Option<SchemaRegularizer>,
    pub(crate) ground_loss: GroundLoss,
    pub(crate) ground_checks: Vec<GroundCheck>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) phase: Phase,
}

/// Default compute device: Metal when built with the `metal` feature and a
/// GPU is available, CPU otherwise.
pub fn default_device() -> Device {
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(not(feature = "metal"))]
    let device = Device::Cpu;
    device
}

impl TrainingSession {
    /// Validate `config`, initialize the embeddings and build the model.
    pub fn new(config: TrainConfig, vocab: Vocabulary, clauses: &[Clause], device: &Device) -> Result<Self> {
        config.validate(clauses.len())?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let store = EmbeddingStore::new(
            vocab.nb_entities(),
            vocab.nb_predicates(),
            config.entity_embedding_size,
            config.predicate_embedding_size(),
            &mut rng,
            device,
        )?;
        let model = build_model(
            config.model,
            config.similarity,
            config.entity_embedding_size,
            config.predicate_embedding_size(),
            config.hidden_size,
            &mut rng,
            device,
        )?;
        Self::assemble(config, vocab, clauses, store, model, rng)
    }

    /// Like [`TrainingSession::new`], with a caller-supplied scoring model.
    pub fn with_model(
        config: TrainConfig,
        vocab: Vocabulary,
        clauses: &[Clause],
        model: Box<dyn ScoringModel>,
        device: &Device,
    ) -> Result<Self> {
        config.validate(clauses.len())?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let store = EmbeddingStore::new(
            vocab.nb_entities(),
            vocab.nb_predicates(),
            config.entity_embedding_size,
            config.predicate_embedding_size(),
            &mut rng,
            device,
        )?;
        Self::assemble(config, vocab, clauses, store, model, rng)
    }

    fn assemble(
        config: TrainConfig,
        vocab: Vocabulary,
        clauses: &[Clause],
        store: EmbeddingStore,
        model: Box<dyn ScoringModel>,
        mut rng: ChaCha8Rng,
    ) -> Result<Self> {
        let device = store.device().clone();
        let bound = if config.uses_clauses() {
            BoundClause::bind_all(clauses, &vocab)?
        } else {
            Vec::new()
        };

        let all_ones = config
            .all_one_entities
            .iter()
            .map(|name| vocab.entity_index(name))
            .collect::<Result<Vec<_>>>()?;
        let projector = Projector::new(
            config.constraint,
            config.predicate_norm,
            all_ones,
            vocab.nb_entities() + 1,
            &device,
        )?;

        let mut discriminator_vars: Vec<Var> = vec![store.entities().clone(), store.predicates().clone()];
        discriminator_vars.extend(model.params().into_iter().map(|(_, v)| v));
        let discriminator = PhaseOptimizer::new(
            config.optimizer,
            discriminator_vars,
            config.lr,
            config.initial_accumulator_value,
        )?;

        let adv = &config.adversary;
        let (adversary, adversary_opt) = match adv.lr {
            Some(lr) => {
                let settings = ViolatorSettings {
                    batch_size: adv.batch_size,
                    margin: adv.margin,
                    pooling: adv.pooling,
                    init_ground: adv.init_ground,
                };
                let search = ViolatorSearch::new(bound.clone(), settings, config.entity_embedding_size, &mut rng, &device)?;
                let opt = PhaseOptimizer::new(config.optimizer, search.params(), lr, config.initial_accumulator_value)?;
                (Some(search), Some(opt))
            }
            None => (None, None),
        };

        let closed_form = if adv.closed_form {
            Some(ClosedFormLifted::new(&bound, config.model, config.similarity, config.constraint, adv.margin)?)
        } else {
            None
        };

        let schema = match config.sar_weight {
            Some(_) => Some(SchemaRegularizer::new(&bound, config.model, config.sar_similarity)?),
            None => None,
        };

        let entity_indices = vocab.entity_indices();
        let ground_checks = match adv.ground_samples {
            Some(samples) => bound
                .iter()
                .map(|clause| GroundCheck {
                    mappings: GroundLoss::sample_mappings(clause.variables.len(), &entity_indices, samples, &mut rng),
                    clause: clause.clone(),
                })
                .collect(),
            None => Vec::new(),
        };

        info!(
            "session: {} entities, {} predicates, model {}, {} clauses",
            vocab.nb_entities(),
            vocab.nb_predicates(),
            config.model,
            bound.len()
        );

        Ok(Self {
            ground_loss: GroundLoss::new(adv.ground_tolerance),
            config,
            vocab,
            store,
            model,
            projector,
            groups: ParamGroups {
                discriminator,
                adversary: adversary_opt,
            },
            adversary,
            closed_form,
            schema,
            ground_checks,
            rng,
            phase: Phase::Initializing,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn model(&self) -> &dyn ScoringModel {
        self.model.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn adversary(&self) -> Option<&ViolatorSearch> {
        self.adversary.as_ref()
    }

    pub fn scorer(&self) -> FactScorer<'_> {
        FactScorer::new(&self.store, self.model.as_ref())
    }

    /// Zero/one errors of every ground-checked clause.
    pub fn zero_one_errors(&self) -> Result<Vec<usize>> {
        let scorer = self.scorer();
        self.ground_checks
            .iter()
            .map(|check| self.ground_loss.zero_one_errors(&check.clause, &check.mappings, &scorer))
            .collect()
    }

    /// Subsample and materialize `facts`. Draws come from the session RNG,
    /// so the prepared set is fixed by the seed.
    pub fn prepare_facts(&mut self, facts: Vec<Fact>, clauses: &[Clause], prep: &DataPreparation) -> Result<Vec<Fact>> {
        let mut facts = facts;
        if let Some(fraction) = prep.subsample.filter(|&f| f < 1.0) {
            let before = facts.len();
            facts = subsample(&facts, fraction, &mut self.rng)?;
            info!("Subsampling training facts: {} -> {}", before, facts.len());
        }

        if let Some(fraction) = prep.head_subsample.filter(|&f| f < 1.0) {
            if clauses.is_empty() {
                return Err(AdvError::Config("head subsampling needs clauses".into()));
            }
            let before = facts.len();
            facts = subsample_heads(&facts, clauses, &self.vocab, fraction, &mut self.rng)?;
            info!("Subsampling facts of clause heads: {} -> {}", before, facts.len());
        }

        if prep.materialize {
            if clauses.is_empty() {
                return Err(AdvError::Config("materialization needs clauses".into()));
            }
            let before = facts.len();
            info!("Materializing the knowledge base using logical inference");
            info!("Number of starting facts: {}", before);
            facts = materialize(&facts, clauses, &self.vocab)?;
            info!("Number of (new) inferred facts: {}", facts.len() - before);
        }
        Ok(facts)
    }

    pub(crate) fn enter(&mut self, phase: Phase) -> Result<()> {
        if let Phase::Terminated(_) = self.phase {
            return Err(AdvError::Config(format!(
                "cannot enter {phase:?}: the session has terminated"
            )));
        }
        self.phase = phase;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::Triple;
    use crate::syntax::parse_clauses;
    use rand::Rng;

    fn vocab() -> Vocabulary {
        Vocabulary::from_triples(&[Triple::new("a", "p", "b"), Triple::new("b", "q", "c")])
    }

    #[test]
    fn test_unknown_all_ones_entity_rejected() {
        let config = TrainConfig {
            all_one_entities: vec!["zed".into()],
            ..TrainConfig::default()
        };
        let err = TrainingSession::new(config, vocab(), &[], &Device::Cpu);
        assert!(matches!(err, Err(AdvError::UnknownEntity(_))));
    }

    #[test]
    fn test_adversary_group_is_built_on_demand() {
        let clauses = parse_clauses("p(X, Y) :- q(Y, X)").unwrap();
        let mut config = TrainConfig::default();
        config.adversary.lr = Some(0.1);
        config.adversary.batch_size = 4;
        config.adversary.ground_samples = Some(16);
        let session = TrainingSession::new(config, vocab(), &clauses, &Device::Cpu).unwrap();

        assert_eq!(session.phase(), Phase::Initializing);
        assert!(session.groups.adversary.is_some());
        assert_eq!(session.adversary().unwrap().params().len(), 2);
        let errors = session.zero_one_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0] <= 16);

        let plain = TrainingSession::new(TrainConfig::default(), vocab(), &clauses, &Device::Cpu).unwrap();
        assert!(plain.groups.adversary.is_none());
        assert!(plain.zero_one_errors().unwrap().is_empty());
    }

    #[test]
    fn test_preparation_draws_from_session_rng() {
        let triples: Vec<Triple> = (0..20)
            .map(|i| Triple::new(&format!("e{i}"), if i % 2 == 0 { "p" } else { "q" }, &format!("e{}", i + 1)))
            .collect();
        let vocab = Vocabulary::from_triples(&triples);
        let facts = vocab.facts(&triples).unwrap();
        let prep = DataPreparation {
            subsample: Some(0.5),
            ..DataPreparation::default()
        };
        let fresh = || TrainingSession::new(TrainConfig::default(), vocab.clone(), &[], &Device::Cpu).unwrap();

        let (mut a, mut b, mut untouched) = (fresh(), fresh(), fresh());
        let kept_a = a.prepare_facts(facts.clone(), &[], &prep).unwrap();
        let kept_b = b.prepare_facts(facts.clone(), &[], &prep).unwrap();
        assert_eq!(kept_a, kept_b);
        assert_eq!(kept_a.len(), 10);
        assert_ne!(a.rng.random::<u64>(), untouched.rng.random::<u64>());
    }

    #[test]
    fn test_preparation_with_clauses() {
        let clauses = parse_clauses("q(X, Y) :- p(Y, X)").unwrap();
        let mut session = TrainingSession::new(TrainConfig::default(), vocab(), &clauses, &Device::Cpu).unwrap();
        let facts = session.vocab().facts(&[Triple::new("a", "p", "b")]).unwrap();

        let materialized = DataPreparation {
            materialize: true,
            ..DataPreparation::default()
        };
        let grown = session.prepare_facts(facts.clone(), &clauses, &materialized).unwrap();
        assert_eq!(grown.len(), 2);
        assert!(matches!(
            session.prepare_facts(facts, &[], &materialized),
            Err(AdvError::Config(_))
        ));
    }

    #[test]
    fn test_same_seed_same_initial_embeddings() {
        let a = TrainingSession::new(TrainConfig::default(), vocab(), &[], &Device::Cpu).unwrap();
        let b = TrainingSession::new(TrainConfig::default(), vocab(), &[], &Device::Cpu).unwrap();
        let rows = |s: &TrainingSession| s.store().entities().as_tensor().to_vec2::<f32>().unwrap();
        assert_eq!(rows(&a), rows(&b));
    }
}
