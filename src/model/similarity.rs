//! Row-wise similarity functions used by translational and bilinear models.

use crate::error::Result;
use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Keeps `sqrt` differentiable at zero distance.
const EPS: f64 = 1e-12;

/// Similarity between two batches of vectors, higher means more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    /// `<a, b>`
    #[default]
    Dot,
    /// `-||a - b||_1`
    L1,
    /// `-||a - b||_2`
    L2,
    /// `-||a - b||_2^2`
    L2Sqr,
    /// `<a, b> / (||a|| ||b||)`
    Cosine,
}

impl Similarity {
    /// Compare `a` and `b` row by row: [n, d] x [n, d] -> [n]
    pub fn apply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let sim = match self {
            Similarity::Dot => (a * b)?.sum(D::Minus1)?,
            Similarity::L1 => (a - b)?.abs()?.sum(D::Minus1)?.neg()?,
            Similarity::L2 => ((a - b)?.sqr()?.sum(D::Minus1)? + EPS)?.sqrt()?.neg()?,
            Similarity::L2Sqr => (a - b)?.sqr()?.sum(D::Minus1)?.neg()?,
            Similarity::Cosine => {
                let dot = (a * b)?.sum(D::Minus1)?;
                let na = (a.sqr()?.sum(D::Minus1)? + EPS)?.sqrt()?;
                let nb = (b.sqr()?.sum(D::Minus1)? + EPS)?.sqrt()?;
                (dot / (na * nb)?)?
            }
        };
        Ok(sim)
    }

    /// Distance counterpart used by the schema-aware regularizer.
    pub fn distance(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(self.apply(a, b)?.neg()?)
    }
}

impl FromStr for Similarity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dot" => Ok(Similarity::Dot),
            "l1" => Ok(Similarity::L1),
            "l2" => Ok(Similarity::L2),
            "l2_sqr" => Ok(Similarity::L2Sqr),
            "cosine" => Ok(Similarity::Cosine),
            other => Err(format!(
                "unknown similarity '{}' (dot, l1, l2, l2_sqr, cosine)",
                other
            )),
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Similarity::Dot => "dot",
            Similarity::L1 => "l1",
            Similarity::L2 => "l2",
            Similarity::L2Sqr => "l2_sqr",
            Similarity::Cosine => "cosine",
        };
        write!(f, "{}", name)
    }
}
