//! Fact losses.
//!
//! A batch's scores arrive flattened in group order (see
//! [`TrainingBatch`](super::TrainingBatch)). Pointwise losses compare each
//! score with a 0/1 target; pairwise losses compare every corrupted score of
//! a group with its positive score and sum over the corrupted rows.

use crate::error::{AdvError, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `log(1 + exp(x))`, stable for large `|x|`.
fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

fn canonical(name: &str) -> String {
    name.to_ascii_lowercase().trim_end_matches("_loss").replace('-', "_")
}

/// Losses over `(score, target)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointwiseLoss {
    /// Sigmoid cross-entropy on the raw score
    Logistic,
    /// `relu(margin - score · (2t - 1))`
    Hinge,
    SquareError,
    AbsoluteError,
}

impl PointwiseLoss {
    pub fn compute(&self, scores: &Tensor, targets: &Tensor, margin: f64) -> Result<Tensor> {
        let per_row = match self {
            PointwiseLoss::Logistic => (softplus(scores)? - (scores * targets)?)?,
            PointwiseLoss::Hinge => {
                let signs = ((targets * 2.0)? - 1.0)?;
                (scores * signs)?.neg()?.affine(1.0, margin)?.relu()?
            }
            PointwiseLoss::SquareError => (scores - targets)?.sqr()?,
            PointwiseLoss::AbsoluteError => (scores - targets)?.abs()?,
        };
        Ok(per_row.sum_all()?)
    }
}

impl FromStr for PointwiseLoss {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match canonical(s).as_str() {
            "logistic" => Ok(PointwiseLoss::Logistic),
            "hinge" => Ok(PointwiseLoss::Hinge),
            "square_error" => Ok(PointwiseLoss::SquareError),
            "absolute_error" => Ok(PointwiseLoss::AbsoluteError),
            _ => Err(format!("unknown loss: {s}")),
        }
    }
}

impl fmt::Display for PointwiseLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PointwiseLoss::Logistic => "logistic_loss",
            PointwiseLoss::Hinge => "hinge_loss",
            PointwiseLoss::SquareError => "square_error_loss",
            PointwiseLoss::AbsoluteError => "absolute_error_loss",
        };
        f.write_str(name)
    }
}

/// Losses over `(positive score, negative score)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairwiseLoss {
    /// `relu(margin - positive + negative)`
    Hinge,
    /// `softplus(negative - positive)`
    Logistic,
}

impl PairwiseLoss {
    pub fn compute(&self, positives: &Tensor, negatives: &Tensor, margin: f64) -> Result<Tensor> {
        let gap = (negatives - positives)?;
        let per_pair = match self {
            PairwiseLoss::Hinge => (gap + margin)?.relu()?,
            PairwiseLoss::Logistic => softplus(&gap)?,
        };
        Ok(per_pair.sum_all()?)
    }
}

impl FromStr for PairwiseLoss {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match canonical(s).as_str() {
            "hinge" => Ok(PairwiseLoss::Hinge),
            "logistic" => Ok(PairwiseLoss::Logistic),
            _ => Err(format!("unknown pairwise loss: {s}")),
        }
    }
}

impl fmt::Display for PairwiseLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PairwiseLoss::Hinge => "hinge_loss",
            PairwiseLoss::Logistic => "logistic_loss",
        };
        f.write_str(name)
    }
}

/// The fact loss of a run: exactly one loss family is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactLoss {
    Pointwise(PointwiseLoss),
    Pairwise(PairwiseLoss),
}

impl Default for FactLoss {
    fn default() -> Self {
        FactLoss::Pairwise(PairwiseLoss::Hinge)
    }
}

impl FactLoss {
    /// Loss over group-ordered `scores` ([groups · nb_versions]).
    pub fn compute(&self, scores: &Tensor, nb_versions: usize, margin: f64) -> Result<Tensor> {
        let nb_rows = scores.dim(0)?;
        if nb_versions < 2 || nb_rows % nb_versions != 0 {
            return Err(AdvError::BatchInvariant(format!(
                "{nb_rows} scores do not split into groups of {nb_versions}"
            )));
        }
        match self {
            FactLoss::Pointwise(loss) => {
                let targets = group_targets(nb_rows, nb_versions, scores.device())?;
                loss.compute(scores, &targets, margin)
            }
            FactLoss::Pairwise(loss) => {
                let grouped = scores.reshape((nb_rows / nb_versions, nb_versions))?;
                let positives = grouped.narrow(1, 0, 1)?;
                let mut total = loss.compute(&positives, &grouped.narrow(1, 1, 1)?, margin)?;
                for column in 2..nb_versions {
                    let negatives = grouped.narrow(1, column, 1)?;
                    total = (total + loss.compute(&positives, &negatives, margin)?)?;
                }
                Ok(total)
            }
        }
    }
}

impl fmt::Display for FactLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactLoss::Pointwise(loss) => write!(f, "pointwise {loss}"),
            FactLoss::Pairwise(loss) => write!(f, "pairwise {loss}"),
        }
    }
}

/// `[1, 0, 0, 1, 0, 0, ...]` for groups of three.
fn group_targets(nb_rows: usize, nb_versions: usize, device: &Device) -> Result<Tensor> {
    let targets: Vec<f32> = (0..nb_rows)
        .map(|i| if i % nb_versions == 0 { 1.0 } else { 0.0 })
        .collect();
    Ok(Tensor::from_vec(targets, (nb_rows,), device)?)
}

/// `weight · Σ x² / 2` over the predicate table.
pub fn predicate_l2(predicates: &Tensor, weight: f64) -> Result<Tensor> {
    Ok((predicates.sqr()?.sum_all()? * (weight / 2.0))?)
}
