//! Gradient-based violator search.
//!
//! For every clause the adversary owns one free embedding batch `[B, k]` per
//! logical variable. Each outer epoch the batches are re-initialized, then
//! moved by gradient ascent on the pooled violation loss while the embedding
//! tables stay fixed.

use super::bound::{BoundAtom, BoundClause};
use crate::embedding::{xavier_uniform, EmbeddingStore, Projector};
use crate::error::{AdvError, Result};
use crate::model::ScoringModel;
use crate::syntax::ClauseKind;
use crate::training::PhaseOptimizer;
use candle_core::{Device, Tensor, Var};
use candle_nn::ops::sigmoid;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// How per-clause violation losses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Pooling {
    #[default]
    Sum,
    Mean,
    Max,
    LogSumExp,
}

impl Pooling {
    /// Reduce scalar clause losses to one scalar.
    pub fn pool(&self, losses: &[Tensor]) -> Result<Tensor> {
        if losses.is_empty() {
            return Err(AdvError::Config("no clause losses to pool".into()));
        }
        let stacked = Tensor::stack(losses, 0)?;
        Ok(match self {
            Pooling::Sum => stacked.sum_all()?,
            Pooling::Mean => stacked.mean_all()?,
            Pooling::Max => stacked.max(0)?,
            Pooling::LogSumExp => {
                let top = stacked.max(0)?.detach();
                let shifted = stacked.broadcast_sub(&top)?;
                (shifted.exp()?.sum_all()?.log()? + top)?
            }
        })
    }
}

impl FromStr for Pooling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Pooling::Sum),
            "mean" => Ok(Pooling::Mean),
            "max" => Ok(Pooling::Max),
            "logsumexp" => Ok(Pooling::LogSumExp),
            other => Err(format!("unknown pooling: {other}")),
        }
    }
}

impl fmt::Display for Pooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pooling::Sum => "sum",
            Pooling::Mean => "mean",
            Pooling::Max => "max",
            Pooling::LogSumExp => "logsumexp",
        };
        f.write_str(name)
    }
}

/// Which side of the game is evaluating the violation loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// Violators are constants; gradients flow into the embedding tables.
    Discriminator,
    /// Embedding tables are constants; gradients flow into the violators.
    Adversary,
}

/// Violation loss and error count of the current violators.
pub struct Violation {
    /// Pooled, clause-weighted violation loss (scalar)
    pub loss: Tensor,
    /// Violator rows whose clause is violated, summed over clauses
    pub errors: usize,
}

/// Outcome of one search, reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchReport {
    pub loss: f32,
    pub errors: usize,
}

/// Settings of the violator search.
#[derive(Debug, Clone, Copy)]
pub struct ViolatorSettings {
    /// Violators per clause variable
    pub batch_size: usize,
    pub margin: f64,
    pub pooling: Pooling,
    /// Initialize from real entity embeddings instead of a random draw
    pub init_ground: bool,
}

struct ClauseViolators {
    clause: BoundClause,
    /// One `[B, k]` batch per clause variable, in `clause.variables` order
    variables: Vec<Var>,
}

/// The adversary's variables and the violation loss over them.
pub struct ViolatorSearch {
    clauses: Vec<ClauseViolators>,
    settings: ViolatorSettings,
    entity_dim: usize,
    device: Device,
}

impl ViolatorSearch {
    pub fn new(
        clauses: Vec<BoundClause>,
        settings: ViolatorSettings,
        entity_dim: usize,
        rng: &mut impl Rng,
        device: &Device,
    ) -> Result<Self> {
        if clauses.is_empty() {
            return Err(AdvError::Config("the adversary needs at least one clause".into()));
        }
        if settings.batch_size == 0 {
            return Err(AdvError::Config("adversarial batch size must be positive".into()));
        }
        let clauses = clauses
            .into_iter()
            .map(|clause| {
                let variables = clause
                    .variables
                    .iter()
                    .map(|_| Ok(Var::from_tensor(&xavier_uniform(settings.batch_size, entity_dim, rng, device)?)?))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ClauseViolators { clause, variables })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            clauses,
            settings,
            entity_dim,
            device: device.clone(),
        })
    }

    /// Every violating variable, the adversary's parameter group.
    pub fn params(&self) -> Vec<Var> {
        self.clauses
            .iter()
            .flat_map(|c| c.variables.iter().cloned())
            .collect()
    }

    /// Copies of the violating variables, named clause by clause.
    pub fn named_params(&self) -> Result<Vec<(String, Tensor)>> {
        let mut named = Vec::new();
        for (i, c) in self.clauses.iter().enumerate() {
            for (name, var) in c.clause.variables.iter().zip(&c.variables) {
                named.push((format!("clause{i}/{name}"), var.as_tensor().detach().copy()?));
            }
        }
        Ok(named)
    }

    /// Fresh violators: a random draw, or copies of randomly chosen entity
    /// rows when ground initialization is on.
    pub fn reset(&self, store: &EmbeddingStore, entity_indices: &[u32], rng: &mut impl Rng) -> Result<()> {
        for clause in &self.clauses {
            for var in &clause.variables {
                let init = if self.settings.init_ground && !entity_indices.is_empty() {
                    let picks: Vec<u32> = (0..self.settings.batch_size)
                        .map(|_| entity_indices[rng.random_range(0..entity_indices.len())])
                        .collect();
                    store.entity_rows(&picks)?.detach()
                } else {
                    xavier_uniform(self.settings.batch_size, self.entity_dim, rng, &self.device)?
                };
                var.set(&init)?;
            }
        }
        Ok(())
    }

    /// Apply the entity constraint to every violator.
    pub fn project(&self, projector: &Projector) -> Result<()> {
        for clause in &self.clauses {
            for var in &clause.variables {
                projector.project_var(var)?;
            }
        }
        Ok(())
    }

    /// Truth probability of `atom` for every violator row: [B]
    fn probability(
        &self,
        atom: &BoundAtom,
        variables: &[Tensor],
        store: &EmbeddingStore,
        model: &dyn ScoringModel,
        perspective: Perspective,
    ) -> Result<Tensor> {
        let mut predicates = store.predicate_rows(&vec![atom.predicate; self.settings.batch_size])?;
        if perspective == Perspective::Adversary {
            predicates = predicates.detach();
        }
        let score = model.score(&predicates, &variables[atom.subject], &variables[atom.object])?;
        Ok(sigmoid(&score)?)
    }

    /// Weighted violation loss of one clause and its violated-row count.
    fn clause_violation(
        &self,
        violators: &ClauseViolators,
        store: &EmbeddingStore,
        model: &dyn ScoringModel,
        perspective: Perspective,
    ) -> Result<(Tensor, usize)> {
        let variables: Vec<Tensor> = violators
            .variables
            .iter()
            .map(|v| match perspective {
                Perspective::Discriminator => v.as_tensor().detach(),
                Perspective::Adversary => v.as_tensor().clone(),
            })
            .collect();
        let clause = &violators.clause;
        let head = self.probability(&clause.head, &variables, store, model, perspective)?;

        let (loss, violated) = match clause.kind() {
            ClauseKind::Implication => {
                let mut body = self.probability(&clause.body[0], &variables, store, model, perspective)?;
                for atom in &clause.body[1..] {
                    body = body.minimum(&self.probability(atom, &variables, store, model, perspective)?)?;
                }
                let loss = ((&body - &head)? + self.settings.margin)?.relu()?.sum_all()?;
                (loss, body.gt(&head)?)
            }
            ClauseKind::Equivalence => {
                let other = self.probability(&clause.body[0], &variables, store, model, perspective)?;
                let loss = ((&head - &other)?.sqr()?.sum_all()? * 0.5)?;
                (loss, head.ge(0.5)?.ne(&other.ge(0.5)?)?)
            }
        };
        let errors = violated.to_dtype(candle_core::DType::U32)?.sum_all()?.to_scalar::<u32>()? as usize;
        Ok(((loss * clause.weight())?, errors))
    }

    /// Pooled violation loss over all clauses.
    pub fn violation(
        &self,
        store: &EmbeddingStore,
        model: &dyn ScoringModel,
        perspective: Perspective,
    ) -> Result<Violation> {
        let mut losses = Vec::with_capacity(self.clauses.len());
        let mut errors = 0;
        for violators in &self.clauses {
            let (loss, clause_errors) = self.clause_violation(violators, store, model, perspective)?;
            losses.push(loss);
            errors += clause_errors;
        }
        Ok(Violation {
            loss: self.settings.pooling.pool(&losses)?,
            errors,
        })
    }

    /// Run `steps` ascent steps on the violators, projecting after each one.
    /// The caller resets and projects the violators beforehand.
    pub fn search(
        &self,
        store: &EmbeddingStore,
        model: &dyn ScoringModel,
        optimizer: &mut PhaseOptimizer,
        projector: &Projector,
        steps: usize,
        epoch: usize,
    ) -> Result<SearchReport> {
        let mut report = SearchReport { loss: 0.0, errors: 0 };
        for step in 1..=steps {
            let violation = self.violation(store, model, Perspective::Adversary)?;
            let grads = violation.loss.neg()?.backward()?;
            optimizer.step(&grads)?;

            report = SearchReport {
                loss: violation.loss.to_scalar::<f32>()?,
                errors: violation.errors,
            };
            if step == 1 || step % 10 == 0 {
                info!(
                    "Epoch: {}, Finding Epoch: {}, Violated Clauses: {}, Violation loss: {:.4}",
                    epoch, step, report.errors, report.loss
                );
            }
            self.project(projector)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EntityConstraint;
    use crate::kb::{Triple, Vocabulary};
    use crate::model::{DistMult, Similarity};
    use crate::syntax::parse_clause;
    use crate::training::OptimizerKind;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn fixture(clause: &str, init_ground: bool) -> (EmbeddingStore, ViolatorSearch, Vocabulary, ChaCha8Rng) {
        let vocab = Vocabulary::from_triples(&[
            Triple::new("a", "p", "b"),
            Triple::new("b", "q", "c"),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let store = EmbeddingStore::new(vocab.nb_entities(), vocab.nb_predicates(), 4, 4, &mut rng, &Device::Cpu).unwrap();
        let clauses = vec![BoundClause::bind(&parse_clause(clause).unwrap(), &vocab).unwrap()];
        let settings = ViolatorSettings {
            batch_size: 5,
            margin: 0.0,
            pooling: Pooling::Sum,
            init_ground,
        };
        let search = ViolatorSearch::new(clauses, settings, 4, &mut rng, &Device::Cpu).unwrap();
        (store, search, vocab, rng)
    }

    #[test]
    fn test_pooling() {
        let losses: Vec<Tensor> = [1.0f32, 2.0, 3.0]
            .iter()
            .map(|v| Tensor::new(*v, &Device::Cpu).unwrap())
            .collect();
        let value = |p: Pooling| p.pool(&losses).unwrap().to_scalar::<f32>().unwrap();
        assert_abs_diff_eq!(value(Pooling::Sum), 6.0, epsilon = 1e-6);
        assert_abs_diff_eq!(value(Pooling::Mean), 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(value(Pooling::Max), 3.0, epsilon = 1e-6);
        let lse = (1f32.exp() + 2f32.exp() + 3f32.exp()).ln();
        assert_abs_diff_eq!(value(Pooling::LogSumExp), lse, epsilon = 1e-5);
    }

    #[test]
    fn test_violation_is_nonnegative_and_errors_bounded() {
        let (store, search, _, _) = fixture("p(X, Y) :- q(X, Z), q(Z, Y)", false);
        let model = DistMult::new(Similarity::Dot);
        let violation = search.violation(&store, &model, Perspective::Adversary).unwrap();
        assert!(violation.loss.to_scalar::<f32>().unwrap() >= 0.0);
        assert!(violation.errors <= 5);
        assert_eq!(search.params().len(), 3);
    }

    #[test]
    fn test_search_moves_only_violators() {
        let (store, search, _, _) = fixture("p(X, Y) :- q(Y, X)", false);
        let model = DistMult::new(Similarity::Dot);
        let projector = Projector::new(EntityConstraint::UnitSphere, None, vec![], store.nb_entities() + 1, &Device::Cpu).unwrap();
        let mut optimizer = PhaseOptimizer::new(OptimizerKind::Adagrad, search.params(), 0.1, 0.1).unwrap();

        let (entities_before, predicates_before) = store.snapshot().unwrap();
        search.project(&projector).unwrap();
        let violators_before = search.named_params().unwrap();
        let report = search.search(&store, &model, &mut optimizer, &projector, 5, 1).unwrap();
        assert!(report.errors <= 5);

        let (entities_after, predicates_after) = store.snapshot().unwrap();
        let values = |t: &Tensor| t.to_vec2::<f32>().unwrap();
        assert_eq!(values(&entities_before), values(&entities_after));
        assert_eq!(values(&predicates_before), values(&predicates_after));
        let violators_after = search.named_params().unwrap();
        assert_ne!(values(&violators_before[0].1), values(&violators_after[0].1));

        // violators stay on the unit sphere
        for (_, t) in violators_after {
            let norms: Vec<f32> = t.sqr().unwrap().sum(1).unwrap().sqrt().unwrap().to_vec1().unwrap();
            for n in norms {
                assert_abs_diff_eq!(n, 1.0, epsilon = 1e-5);
            }
        }
    }

    fn logistic(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    fn column(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len(), 1), &Device::Cpu).unwrap()
    }

    /// One-dimensional embeddings: entities a, b, c and predicates p = 1,
    /// q = 2 with the given values. Violator `j` of the clause gets `rows[j]`.
    fn scalar_search(clause: &str, p: f32, q: f32, margin: f64, rows: &[&[f32]]) -> (EmbeddingStore, ViolatorSearch) {
        let vocab = Vocabulary::from_triples(&[Triple::new("a", "p", "b"), Triple::new("b", "q", "c")]);
        let store = EmbeddingStore::from_tensors(&column(&[0.0, 1.0, 1.0, 1.0]), &column(&[0.0, p, q])).unwrap();
        let clauses = vec![BoundClause::bind(&parse_clause(clause).unwrap(), &vocab).unwrap()];
        let settings = ViolatorSettings {
            batch_size: rows[0].len(),
            margin,
            pooling: Pooling::Sum,
            init_ground: false,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let search = ViolatorSearch::new(clauses, settings, 1, &mut rng, &Device::Cpu).unwrap();
        for (var, values) in search.clauses[0].variables.iter().zip(rows) {
            var.set(&column(values)).unwrap();
        }
        (store, search)
    }

    #[test]
    fn test_implication_violation_values() {
        // head p(X, Y) scores 0; body q(X, Y) scores X * Y
        let (store, search) = scalar_search("p(X, Y) :- q(X, Y) [0.5]", 0.0, 1.0, 0.1, &[&[1.0, -1.0], &[1.0, 2.0]]);
        let model = DistMult::new(Similarity::Dot);
        let violation = search.violation(&store, &model, Perspective::Adversary).unwrap();

        // the second row has body 0.12 < head 0.5, clipped to zero
        let expected = 0.5 * (logistic(1.0) - 0.5 + 0.1);
        assert_abs_diff_eq!(violation.loss.to_scalar::<f32>().unwrap(), expected, epsilon = 1e-5);
        assert_eq!(violation.errors, 1);
    }

    #[test]
    fn test_implication_chain_takes_weakest_body_atom() {
        // variables in order X, Y, Z; body atoms score X * Z and Z * Y
        let (store, search) =
            scalar_search("p(X, Y) :- q(X, Z), q(Z, Y)", 0.0, 1.0, 0.0, &[&[1.0], &[2.0], &[1.0]]);
        let model = DistMult::new(Similarity::Dot);
        let violation = search.violation(&store, &model, Perspective::Discriminator).unwrap();
        assert_abs_diff_eq!(violation.loss.to_scalar::<f32>().unwrap(), logistic(1.0) - 0.5, epsilon = 1e-5);
        assert_eq!(violation.errors, 1);
    }

    #[test]
    fn test_equivalence_violation_values() {
        // head p(X, Y) scores X * Y; q(Y, X) scores 0
        let (store, search) = scalar_search("p(X, Y) <-> q(Y, X)", 1.0, 0.0, 0.3, &[&[1.0, -2.0], &[1.0, 1.0]]);
        let model = DistMult::new(Similarity::Dot);
        let violation = search.violation(&store, &model, Perspective::Adversary).unwrap();

        let expected = 0.5 * ((logistic(1.0) - 0.5).powi(2) + (logistic(-2.0) - 0.5).powi(2));
        assert_abs_diff_eq!(violation.loss.to_scalar::<f32>().unwrap(), expected, epsilon = 1e-5);
        // only the second row falls on the other side of 0.5
        assert_eq!(violation.errors, 1);
    }

    #[test]
    fn test_ground_init_copies_entity_rows() {
        let (store, search, vocab, mut rng) = fixture("p(X, Y) <-> q(Y, X)", true);
        search.reset(&store, &vocab.entity_indices(), &mut rng).unwrap();
        let entities: Vec<Vec<f32>> = store.entities().as_tensor().to_vec2().unwrap();
        for (_, t) in search.named_params().unwrap() {
            for row in t.to_vec2::<f32>().unwrap() {
                assert!(entities[1..].contains(&row));
            }
        }
    }
}
