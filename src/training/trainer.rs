//! The alternating training scheduler.
//!
//! Each outer epoch:
//! 1. logs zero/one errors of the sampled groundings, if enabled;
//! 2. runs the discriminator for its sub-epochs: shuffle, corrupt, batch,
//!    one optimizer step per batch, projection right after each step;
//! 3. resets and runs the violator search, if enabled, with the embedding
//!    tables held fixed;
//! 4. writes debug snapshots and the predicate update norm, if enabled.
//!
//! A NaN fact loss stops the whole run before the offending batch updates
//! anything.

use super::batch::{batch_size_for, make_batches, Corruptions, TrainingBatch};
use super::corrupt::{CorruptionSlot, Corruptor};
use super::loss::predicate_l2;
use crate::adversarial::{Perspective, SearchReport};
use crate::error::{AdvError, Result};
use crate::kb::Fact;
use crate::persist::{save_snapshot, snapshot_path};
use crate::session::{Phase, Termination, TrainingSession};
use candle_core::Tensor;
use rand::seq::SliceRandom;
use tracing::{debug, error, info};

/// Statistics of one discriminator pass over the training set.
#[derive(Debug, Clone, PartialEq)]
pub struct SubEpochStats {
    /// Mean and standard deviation of the per-fact batch loss
    pub loss_mean: f64,
    pub loss_std: f64,
    /// Fact loss summed over batches
    pub fact_loss: f64,
    /// Mean and standard deviation of the batch violation loss
    pub violation_loss: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub sub_epochs: Vec<SubEpochStats>,
    pub zero_one_errors: Option<Vec<usize>>,
    pub adversary: Option<SearchReport>,
    /// `Σ|Δ|` of the predicate table since the previous epoch, in debug mode
    pub predicate_update: Option<f32>,
}

/// What a completed run did, epoch by epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub epochs: Vec<EpochStats>,
}

struct StepLosses {
    total: f32,
    fact: f32,
    violation: Option<f32>,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Runs the min–max schedule over a session.
pub struct Trainer<'s> {
    session: &'s mut TrainingSession,
}

impl<'s> Trainer<'s> {
    pub fn new(session: &'s mut TrainingSession) -> Self {
        Self { session }
    }

    /// Train on `facts` for the configured number of epochs.
    pub fn run(&mut self, facts: &[Fact]) -> Result<TrainReport> {
        if facts.is_empty() {
            return Err(AdvError::Config("no training facts".into()));
        }
        let config = self.session.config.clone();
        let batch_size = batch_size_for(facts.len(), config.nb_batches);
        info!(
            "Samples: {}, no. batches: {} -> batch size: {}",
            facts.len(),
            config.nb_batches,
            batch_size
        );

        let entities = self.session.vocab.entity_indices();
        let subject_corruptor = Corruptor::new(CorruptionSlot::Subject, entities.clone())?;
        let object_corruptor = Corruptor::new(CorruptionSlot::Object, entities.clone())?;
        let relation_corruptor = if config.corrupt_relations {
            Some(Corruptor::new(CorruptionSlot::Relation, self.session.vocab.predicate_indices())?)
        } else {
            None
        };

        let mut report = TrainReport::default();
        let mut previous_predicates: Option<Tensor> = None;

        for epoch in 1..=config.nb_epochs {
            let zero_one_errors = self.ground_check(epoch)?;

            self.session.enter(Phase::Discriminator)?;
            let mut sub_epochs = Vec::with_capacity(config.discriminator_epochs);
            for sub_epoch in 1..=config.discriminator_epochs {
                let rng = &mut self.session.rng;
                let mut shuffled = facts.to_vec();
                shuffled.shuffle(rng);
                let corruptions = Corruptions {
                    subjects: subject_corruptor.corrupt(&shuffled, rng),
                    objects: object_corruptor.corrupt(&shuffled, rng),
                    relations: relation_corruptor.as_ref().map(|c| c.corrupt(&shuffled, rng)),
                };

                let mut losses = Vec::new();
                let mut violations = Vec::new();
                let mut fact_loss = 0.0;
                for range in make_batches(shuffled.len(), batch_size) {
                    let batch = TrainingBatch::assemble(&shuffled, &corruptions, range)?;
                    let Some(step) = self.discriminator_step(&batch)? else {
                        error!("Epoch: {}/{}\tFact loss is NaN! Exiting ..", epoch, sub_epoch);
                        self.session.phase = Phase::Terminated(Termination::NanAbort);
                        return Err(AdvError::NanLoss { epoch, sub_epoch });
                    };
                    losses.push(step.total as f64 / batch.nb_groups() as f64);
                    fact_loss += step.fact as f64;
                    if let Some(v) = step.violation {
                        violations.push(v as f64);
                    }
                }

                let (loss_mean, loss_std) = mean_std(&losses);
                info!("Epoch: {}/{}\tLoss: {:.4} ± {:.4}", epoch, sub_epoch, loss_mean, loss_std);
                info!("Epoch: {}/{}\tFact Loss: {:.4}", epoch, sub_epoch, fact_loss);
                let violation_loss = (!violations.is_empty()).then(|| mean_std(&violations));
                if let Some((mean, std)) = violation_loss {
                    info!("Epoch: {}/{}\tViolation Loss: {:.4} ± {:.4}", epoch, sub_epoch, mean, std);
                }
                sub_epochs.push(SubEpochStats {
                    loss_mean,
                    loss_std,
                    fact_loss,
                    violation_loss,
                });

                if let Some(prefix) = &config.debug_embeddings {
                    let (entities, predicates) = self.session.store.snapshot()?;
                    save_snapshot(
                        &snapshot_path(prefix, "discriminator", epoch),
                        vec![("entities".into(), entities), ("predicates".into(), predicates)],
                    )?;
                }
            }

            let adversary = self.find_violators(epoch)?;

            let mut predicate_update = None;
            if config.debug {
                let (rows, update) = self.log_predicate_update(epoch, previous_predicates.as_ref())?;
                previous_predicates = Some(rows);
                predicate_update = update;
            }

            report.epochs.push(EpochStats {
                epoch,
                sub_epochs,
                zero_one_errors,
                adversary,
                predicate_update,
            });
        }

        self.session.phase = Phase::Terminated(Termination::Normal);
        Ok(report)
    }

    fn ground_check(&self, epoch: usize) -> Result<Option<Vec<usize>>> {
        if self.session.ground_checks.is_empty() {
            return Ok(None);
        }
        let errors = self.session.zero_one_errors()?;
        for (clause_idx, (nb_errors, check)) in errors.iter().zip(&self.session.ground_checks).enumerate() {
            info!("Epoch: {}\tClause index: {}\tZero-One Errors: {}", epoch, clause_idx, nb_errors);
            if *nb_errors == check.mappings.len() {
                debug!("Epoch: {}\tClause {} is violated by every sampled grounding", epoch, check.clause.clause);
            } else if *nb_errors == 0 {
                debug!("Epoch: {}\tClause {} holds for every sampled grounding", epoch, check.clause.clause);
            }
        }
        info!("Epoch: {}\tSum of Zero-One Errors: {}", epoch, errors.iter().sum::<usize>());
        Ok(Some(errors))
    }

    /// One optimizer step on the discriminator variables, then projection.
    /// Returns `None`, without stepping, when the fact loss is NaN.
    fn discriminator_step(&mut self, batch: &TrainingBatch) -> Result<Option<StepLosses>> {
        let session = &mut *self.session;
        let config = &session.config;
        let predicates = session.store.predicates().as_tensor();

        let scores = session.scorer().score_facts(batch.facts())?;
        let mut fact_loss = config.fact_loss.compute(&scores, batch.nb_versions(), config.margin)?;
        if let Some(weight) = config.predicate_l2 {
            fact_loss = (fact_loss + predicate_l2(predicates, weight)?)?;
        }

        let mut total = fact_loss.clone();
        if let (Some(schema), Some(weight)) = (&session.schema, config.sar_weight) {
            total = (total + (schema.loss(predicates)? * weight)?)?;
        }
        if let Some(closed_form) = &session.closed_form {
            total = (total + (closed_form.loss(predicates)? * config.adversary.weight)?)?;
        }
        let mut violation = None;
        if let Some(adversary) = &session.adversary {
            let v = adversary.violation(&session.store, session.model.as_ref(), Perspective::Discriminator)?;
            violation = Some(v.loss.to_scalar::<f32>()?);
            total = (total + (v.loss * config.adversary.weight)?)?;
        }

        let fact = fact_loss.to_scalar::<f32>()?;
        if fact.is_nan() {
            return Ok(None);
        }

        let grads = total.backward()?;
        session.groups.discriminator.step(&grads)?;
        session.projector.project_store(&session.store)?;

        Ok(Some(StepLosses {
            total: total.to_scalar::<f32>()?,
            fact,
            violation,
        }))
    }

    /// Reset the violators and the adversary's optimizer, then search.
    fn find_violators(&mut self, epoch: usize) -> Result<Option<SearchReport>> {
        let session = &mut *self.session;
        let (Some(adversary), Some(optimizer)) = (&session.adversary, session.groups.adversary.as_mut()) else {
            return Ok(None);
        };
        session.phase = Phase::Adversary;
        info!("Finding violators ..");

        adversary.reset(&session.store, &session.vocab.entity_indices(), &mut session.rng)?;
        optimizer.reset()?;
        adversary.project(&session.projector)?;
        let report = adversary.search(
            &session.store,
            session.model.as_ref(),
            optimizer,
            &session.projector,
            session.config.adversary.epochs,
            epoch,
        )?;

        if let Some(prefix) = &session.config.debug_embeddings {
            let mut tensors = adversary.named_params()?;
            let (_, predicates) = session.store.snapshot()?;
            tensors.push(("predicates".into(), predicates));
            save_snapshot(&snapshot_path(prefix, "adversary", epoch), tensors)?;
        }
        Ok(Some(report))
    }

    /// Log `Σ|previous - current|` against `Σ|current|` over the real
    /// predicate rows. Returns a copy of the current rows and the update.
    fn log_predicate_update(&self, epoch: usize, previous: Option<&Tensor>) -> Result<(Tensor, Option<f32>)> {
        let (_, predicates) = self.session.store.snapshot()?;
        let rows = predicates.narrow(0, 1, predicates.dim(0)? - 1)?;
        let Some(previous) = previous else {
            debug!("Epoch: {}, recorded predicate embeddings", epoch);
            return Ok((rows, None));
        };
        let diff_norm = (previous - &rows)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        let norm = rows.abs()?.sum_all()?.to_scalar::<f32>()?;
        info!("Epoch: {}, Update to Predicate Embeddings: {} Norm: {}", epoch, diff_norm, norm);
        Ok((rows, Some(diff_norm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EntityConstraint;
    use crate::kb::{Triple, Vocabulary};
    use crate::model::{DistMult, ModelKind, ScoringModel, Similarity};
    use crate::syntax::parse_clauses;
    use crate::training::{FactLoss, PointwiseLoss, TrainConfig};
    use candle_core::Device;
    use std::cell::Cell;

    fn triples() -> Vec<Triple> {
        vec![
            Triple::new("a", "p", "b"),
            Triple::new("b", "p", "c"),
            Triple::new("c", "q", "a"),
            Triple::new("d", "q", "b"),
            Triple::new("a", "p", "d"),
            Triple::new("c", "q", "d"),
        ]
    }

    fn setup() -> (Vocabulary, Vec<Fact>) {
        let triples = triples();
        let vocab = Vocabulary::from_triples(&triples);
        let facts = vocab.facts(&triples).unwrap();
        (vocab, facts)
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            entity_embedding_size: 4,
            nb_epochs: 3,
            nb_batches: 2,
            ..TrainConfig::default()
        }
    }

    /// DistMult that turns every score into NaN from the `from_call`-th call on.
    struct NanAfter {
        inner: DistMult,
        calls: Cell<usize>,
        from_call: usize,
    }

    impl ScoringModel for NanAfter {
        fn kind(&self) -> ModelKind {
            ModelKind::DistMult
        }

        fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            let scores = self.inner.score(predicates, subjects, objects)?;
            if call >= self.from_call {
                Ok((scores * f64::NAN)?)
            } else {
                Ok(scores)
            }
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let (vocab, facts) = setup();
        let clauses = parse_clauses("q(X, Y) :- p(Y, X)\np(X, Y) :- p(X, Z), p(Z, Y)").unwrap();
        let mut config = small_config();
        config.corrupt_relations = true;
        config.adversary.lr = Some(0.1);
        config.adversary.batch_size = 3;
        config.adversary.epochs = 4;
        config.adversary.ground_samples = Some(10);

        let run = || {
            let mut session = TrainingSession::new(config.clone(), vocab.clone(), &clauses, &Device::Cpu).unwrap();
            let report = Trainer::new(&mut session).run(&facts).unwrap();
            assert_eq!(session.phase(), Phase::Terminated(Termination::Normal));
            (report, session.store().entities().as_tensor().to_vec2::<f32>().unwrap())
        };
        let (report_a, entities_a) = run();
        let (report_b, entities_b) = run();
        assert_eq!(report_a, report_b);
        assert_eq!(entities_a, entities_b);

        assert_eq!(report_a.epochs.len(), 3);
        for epoch in &report_a.epochs {
            let errors = epoch.zero_one_errors.as_ref().unwrap();
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(|&e| e <= 10));
            assert!(epoch.adversary.is_some());
            assert!(epoch.sub_epochs[0].violation_loss.is_some());
        }
    }

    #[test]
    fn test_nan_fact_loss_aborts_at_its_epoch() {
        let (vocab, facts) = setup();
        let config = TrainConfig {
            nb_batches: 1,
            nb_epochs: 6,
            fact_loss: FactLoss::Pointwise(PointwiseLoss::SquareError),
            ..small_config()
        };
        let model = NanAfter {
            inner: DistMult::new(Similarity::Dot),
            calls: Cell::new(0),
            from_call: 3,
        };
        let mut session = TrainingSession::with_model(config, vocab, &[], Box::new(model), &Device::Cpu).unwrap();

        let err = Trainer::new(&mut session).run(&facts).unwrap_err();
        assert!(matches!(err, AdvError::NanLoss { epoch: 3, sub_epoch: 1 }));
        assert_eq!(session.phase(), Phase::Terminated(Termination::NanAbort));

        // the NaN batch never reached the optimizer
        let entities: Vec<Vec<f32>> = session.store().entities().as_tensor().to_vec2().unwrap();
        assert!(entities.iter().flatten().all(|v| !v.is_nan()));

        // a terminated session does not train again
        assert!(Trainer::new(&mut session).run(&facts).is_err());
    }

    #[test]
    fn test_all_ones_entity_stays_pinned() {
        let (vocab, facts) = setup();
        let config = TrainConfig {
            all_one_entities: vec!["b".into()],
            nb_epochs: 4,
            ..small_config()
        };
        let pinned = vocab.entity_index("b").unwrap() as usize;
        let mut session = TrainingSession::new(config, vocab, &[], &Device::Cpu).unwrap();
        Trainer::new(&mut session).run(&facts).unwrap();

        let entities: Vec<Vec<f32>> = session.store().entities().as_tensor().to_vec2().unwrap();
        assert_eq!(entities[pinned], vec![1.0; 4]);
        // every other real row is back on the unit sphere
        for (i, row) in entities.iter().enumerate().skip(1) {
            if i != pinned {
                let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
                assert!((norm - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_closed_form_run_stays_in_unit_cube() {
        let (vocab, facts) = setup();
        let clauses = parse_clauses("q(X, Y) :- p(Y, X)").unwrap();
        let mut config = TrainConfig {
            constraint: EntityConstraint::UnitCube,
            sar_weight: Some(0.1),
            predicate_l2: Some(0.01),
            predicate_norm: Some(1.0),
            debug: true,
            ..small_config()
        };
        config.adversary.closed_form = true;
        let mut session = TrainingSession::new(config, vocab, &clauses, &Device::Cpu).unwrap();
        let report = Trainer::new(&mut session).run(&facts).unwrap();

        assert!(report.epochs.iter().all(|e| e.adversary.is_none() && e.zero_one_errors.is_none()));
        let entities: Vec<Vec<f32>> = session.store().entities().as_tensor().to_vec2().unwrap();
        assert!(entities.iter().skip(1).flatten().all(|v| (-1.0..=1.0).contains(v)));
        let predicates: Vec<Vec<f32>> = session.store().predicates().as_tensor().to_vec2().unwrap();
        for row in predicates {
            assert!(row.iter().map(|v| v * v).sum::<f32>().sqrt() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_predicate_update_tracks_training() {
        let (vocab, facts) = setup();
        let config = TrainConfig {
            debug: true,
            ..small_config()
        };
        let mut session = TrainingSession::new(config, vocab, &[], &Device::Cpu).unwrap();
        let report = Trainer::new(&mut session).run(&facts).unwrap();

        assert_eq!(report.epochs[0].predicate_update, None);
        for epoch in &report.epochs[1..] {
            assert!(epoch.predicate_update.unwrap() > 0.0);
        }
    }

    #[test]
    fn test_recorded_predicates_do_not_follow_the_table() {
        let (vocab, _) = setup();
        let mut session = TrainingSession::new(small_config(), vocab, &[], &Device::Cpu).unwrap();
        let trainer = Trainer::new(&mut session);
        let (recorded, update) = trainer.log_predicate_update(1, None).unwrap();
        assert_eq!(update, None);
        let before = recorded.to_vec2::<f32>().unwrap();

        let table = trainer.session.store.predicates();
        table.set(&(table.as_tensor() + 1.0).unwrap()).unwrap();
        assert_eq!(recorded.to_vec2::<f32>().unwrap(), before);

        let (_, update) = trainer.log_predicate_update(2, Some(&recorded)).unwrap();
        let expected = before.iter().flatten().count() as f32;
        assert!((update.unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_debug_snapshots_written() {
        let (vocab, facts) = setup();
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run");
        let clauses = parse_clauses("q(X, Y) :- p(Y, X)").unwrap();
        let mut config = TrainConfig {
            nb_epochs: 2,
            debug_embeddings: Some(prefix.clone()),
            ..small_config()
        };
        config.adversary.lr = Some(0.1);
        config.adversary.epochs = 2;
        let mut session = TrainingSession::new(config, vocab, &clauses, &Device::Cpu).unwrap();
        Trainer::new(&mut session).run(&facts).unwrap();

        for epoch in 1..=2 {
            assert!(snapshot_path(&prefix, "discriminator", epoch).exists());
            let adversary = candle_core::safetensors::load(snapshot_path(&prefix, "adversary", epoch), &Device::Cpu).unwrap();
            assert!(adversary.contains_key("predicates"));
            assert!(adversary.contains_key("clause0/X"));
        }
    }

    #[test]
    fn test_empty_training_set_rejected() {
        let (vocab, _) = setup();
        let mut session = TrainingSession::new(small_config(), vocab, &[], &Device::Cpu).unwrap();
        assert!(matches!(Trainer::new(&mut session).run(&[]), Err(AdvError::Config(_))));
    }
}
