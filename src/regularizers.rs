//! Schema-aware regularization.
//!
//! A clause `p(X, Y) :- q(X, Y)` suggests that `p` and `q` should have nearby
//! embeddings; `p(X, Y) :- q(Y, X)` suggests that `p` should be near the
//! model's inverse of `q`. The regularizer penalizes the distance between the
//! head predicate and the (possibly inverted) body predicate.

use crate::adversarial::BoundClause;
use crate::error::{AdvError, Result};
use crate::model::{ModelKind, Similarity};
use candle_core::{Tensor, D};
use tracing::debug;

struct Pair {
    head: u32,
    body: u32,
    inverse: bool,
    weight: f64,
}

/// Weighted sum of head/body predicate distances.
pub struct SchemaRegularizer {
    model: ModelKind,
    distance: Similarity,
    pairs: Vec<Pair>,
}

impl SchemaRegularizer {
    pub fn new(clauses: &[BoundClause], model: ModelKind, distance: Similarity) -> Result<Self> {
        if !matches!(distance, Similarity::L1 | Similarity::L2 | Similarity::L2Sqr) {
            return Err(AdvError::Config(format!(
                "schema-aware regularization needs l1, l2 or l2_sqr, got {distance}"
            )));
        }
        if model == ModelKind::ErMlp {
            return Err(AdvError::Unsupported(format!(
                "schema-aware regularization is not defined for {model}"
            )));
        }
        let mut pairs = Vec::new();
        for c in clauses {
            let inverse = c.clause.is_inverse();
            if !inverse && !c.clause.is_direct() {
                debug!("schema-aware regularization skips clause {}", c.clause);
                continue;
            }
            pairs.push(Pair {
                head: c.head.predicate,
                body: c.body[0].predicate,
                inverse,
                weight: c.weight(),
            });
        }
        Ok(Self { model, distance, pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The model's inverse of a predicate embedding row: [1, k]
    fn invert(&self, row: &Tensor) -> Result<Tensor> {
        Ok(match self.model {
            ModelKind::ComplEx => {
                let half = row.dim(D::Minus1)? / 2;
                let re = row.narrow(D::Minus1, 0, half)?;
                let im = row.narrow(D::Minus1, half, half)?.neg()?;
                Tensor::cat(&[re, im], D::Minus1)?
            }
            ModelKind::TransE => row.neg()?,
            _ => row.clone(),
        })
    }

    /// Unweighted by the global factor; the caller scales it.
    pub fn loss(&self, predicates: &Tensor) -> Result<Tensor> {
        let mut total = Tensor::zeros((), predicates.dtype(), predicates.device())?;
        for pair in &self.pairs {
            let head = predicates.narrow(0, pair.head as usize, 1)?;
            let mut body = predicates.narrow(0, pair.body as usize, 1)?;
            if pair.inverse {
                body = self.invert(&body)?;
            }
            let term = (self.distance.distance(&head, &body)?.sum_all()? * pair.weight)?;
            total = (total + term)?;
        }
        Ok(total)
    }
}
