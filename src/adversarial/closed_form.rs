//! Closed-form lifted violation bounds.
//!
//! For a clause `p(X, Y) :- q(X, Y)` (or its inverse `q(Y, X)`) with entity
//! embeddings confined to the unit cube, the worst-case score gap
//! `max_{x, y} [score_q(x, y) - score_p(x, y)]` has an analytic value that
//! depends only on the two predicate embeddings:
//!
//! - DistMult (dot): `Σ |q_i - p_i|`, for both argument orders.
//! - ComplEx: `Σ 2 · max(|Re d_i|, |Im d_i|)` with `d = q - p`, or
//!   `d = conj(q) - p` for the inverse.
//!
//! Equivalences use the squared bound. The bound replaces the iterative
//! violator search as a loss term.

use super::bound::BoundClause;
use crate::embedding::EntityConstraint;
use crate::error::{AdvError, Result};
use crate::model::{ModelKind, Similarity};
use crate::syntax::ClauseKind;
use candle_core::{Tensor, D};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Direct,
    Inverse,
}

struct LiftedClause {
    head: u32,
    body: u32,
    orientation: Orientation,
    kind: ClauseKind,
    weight: f64,
}

/// Sum of closed-form violation bounds over a set of clauses.
pub struct ClosedFormLifted {
    model: ModelKind,
    margin: f64,
    clauses: Vec<LiftedClause>,
}

impl ClosedFormLifted {
    /// Whether a bound exists for this model and similarity.
    pub fn supports(model: ModelKind, similarity: Similarity) -> bool {
        matches!(
            (model, similarity),
            (ModelKind::DistMult, Similarity::Dot) | (ModelKind::ComplEx, _)
        )
    }

    pub fn new(
        clauses: &[BoundClause],
        model: ModelKind,
        similarity: Similarity,
        constraint: EntityConstraint,
        margin: f64,
    ) -> Result<Self> {
        if constraint != EntityConstraint::UnitCube {
            return Err(AdvError::Config(
                "closed-form violation bounds require the unit-cube constraint".into(),
            ));
        }
        if !Self::supports(model, similarity) {
            return Err(AdvError::Unsupported(format!(
                "no closed-form violation bound for {model} with {similarity} similarity"
            )));
        }
        let clauses = clauses
            .iter()
            .map(|c| {
                let orientation = if c.clause.is_direct() {
                    Orientation::Direct
                } else if c.clause.is_inverse() {
                    Orientation::Inverse
                } else {
                    return Err(AdvError::Unsupported(format!(
                        "closed-form bound needs a single body atom over the head's variables: {}",
                        c.clause
                    )));
                };
                Ok(LiftedClause {
                    head: c.head.predicate,
                    body: c.body[0].predicate,
                    orientation,
                    kind: c.kind(),
                    weight: c.weight(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { model, margin, clauses })
    }

    /// Worst-case score gap between body and head predicate rows.
    fn bound(&self, head: &Tensor, body: &Tensor, orientation: Orientation) -> Result<Tensor> {
        match self.model {
            ModelKind::ComplEx => {
                let half = head.dim(D::Minus1)? / 2;
                let (p_re, p_im) = (head.narrow(D::Minus1, 0, half)?, head.narrow(D::Minus1, half, half)?);
                let (q_re, mut q_im) = (body.narrow(D::Minus1, 0, half)?, body.narrow(D::Minus1, half, half)?);
                if orientation == Orientation::Inverse {
                    q_im = q_im.neg()?;
                }
                let d_re = (q_re - p_re)?.abs()?;
                let d_im = (q_im - p_im)?.abs()?;
                Ok((d_re.maximum(&d_im)?.sum_all()? * 2.0)?)
            }
            _ => Ok((body - head)?.abs()?.sum_all()?),
        }
    }

    /// `Σ_c w_c · relu(margin + bound_c)` over the predicate table.
    pub fn loss(&self, predicates: &Tensor) -> Result<Tensor> {
        let mut total = Tensor::zeros((), predicates.dtype(), predicates.device())?;
        for clause in &self.clauses {
            let head = predicates.get(clause.head as usize)?;
            let body = predicates.get(clause.body as usize)?;
            let mut bound = self.bound(&head, &body, clause.orientation)?;
            if clause.kind == ClauseKind::Equivalence {
                bound = bound.sqr()?;
            }
            let term = ((bound + self.margin)?.relu()? * clause.weight)?;
            total = (total + term)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::{Triple, Vocabulary};
    use crate::syntax::parse_clause;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn bound_clauses(texts: &[&str]) -> Vec<BoundClause> {
        let vocab = Vocabulary::from_triples(&[Triple::new("a", "p", "b"), Triple::new("a", "q", "b")]);
        texts
            .iter()
            .map(|t| BoundClause::bind(&parse_clause(t).unwrap(), &vocab).unwrap())
            .collect()
    }

    fn predicates() -> Tensor {
        // row 1 = p, row 2 = q
        Tensor::new(&[[0.0f32, 0.0, 0.0, 0.0], [1.0, -1.0, 0.5, 0.0], [0.0, 1.0, 0.5, 2.0]], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_distmult_bound() {
        let lifted = ClosedFormLifted::new(
            &bound_clauses(&["p(X, Y) :- q(Y, X)"]),
            ModelKind::DistMult,
            Similarity::Dot,
            EntityConstraint::UnitCube,
            0.0,
        )
        .unwrap();
        let loss = lifted.loss(&predicates()).unwrap().to_scalar::<f32>().unwrap();
        assert_abs_diff_eq!(loss, 1.0 + 2.0 + 0.0 + 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_complex_bound_conjugates_inverse_body() {
        let direct = ClosedFormLifted::new(
            &bound_clauses(&["p(X, Y) :- q(X, Y)"]),
            ModelKind::ComplEx,
            Similarity::Dot,
            EntityConstraint::UnitCube,
            0.0,
        )
        .unwrap();
        // d = q - p: re (-1, 2), im (0, 2) -> 2 * (1 + 2)
        assert_abs_diff_eq!(direct.loss(&predicates()).unwrap().to_scalar::<f32>().unwrap(), 6.0, epsilon = 1e-6);

        let inverse = ClosedFormLifted::new(
            &bound_clauses(&["p(X, Y) :- q(Y, X)"]),
            ModelKind::ComplEx,
            Similarity::Dot,
            EntityConstraint::UnitCube,
            0.0,
        )
        .unwrap();
        // d = conj(q) - p: re (-1, 2), im (-1, -2) -> 2 * (1 + 2)
        assert_abs_diff_eq!(inverse.loss(&predicates()).unwrap().to_scalar::<f32>().unwrap(), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_identical_predicates_have_zero_bound() {
        let lifted = ClosedFormLifted::new(
            &bound_clauses(&["p(X, Y) :- q(X, Y) [2.0]"]),
            ModelKind::DistMult,
            Similarity::Dot,
            EntityConstraint::UnitCube,
            0.5,
        )
        .unwrap();
        let same = Tensor::new(&[[0.0f32, 0.0], [0.3, 0.4], [0.3, 0.4]], &Device::Cpu).unwrap();
        // weight · relu(margin + 0)
        assert_abs_diff_eq!(lifted.loss(&same).unwrap().to_scalar::<f32>().unwrap(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_preconditions() {
        let clauses = bound_clauses(&["p(X, Y) :- q(X, Y)"]);
        assert!(matches!(
            ClosedFormLifted::new(&clauses, ModelKind::DistMult, Similarity::Dot, EntityConstraint::UnitSphere, 0.0),
            Err(AdvError::Config(_))
        ));
        assert!(matches!(
            ClosedFormLifted::new(&clauses, ModelKind::TransE, Similarity::L1, EntityConstraint::UnitCube, 0.0),
            Err(AdvError::Unsupported(_))
        ));
        let chain = bound_clauses(&["p(X, Y) :- q(X, Z), q(Z, Y)"]);
        assert!(matches!(
            ClosedFormLifted::new(&chain, ModelKind::DistMult, Similarity::Dot, EntityConstraint::UnitCube, 0.0),
            Err(AdvError::Unsupported(_))
        ));
    }
}
