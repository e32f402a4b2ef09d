//! Scoring architectures.
//!
//! Every model maps predicate walks `[n, walk_len, kp]` and subject/object
//! embeddings `[n, k]` to one real score per row `[n]`.

use super::similarity::Similarity;
use super::{ModelKind, ScoringModel};
use crate::embedding::xavier_uniform;
use crate::error::Result;
use candle_core::{Device, Tensor, Var, D};
use rand::Rng;

/// Sum the predicates of each walk: [n, L, kp] -> [n, kp]
fn walk_sum(predicates: &Tensor) -> Result<Tensor> {
    Ok(predicates.sum(1)?)
}

/// Elementwise product along each walk: [n, L, kp] -> [n, kp]
fn walk_product(predicates: &Tensor) -> Result<Tensor> {
    let walk_len = predicates.dim(1)?;
    let mut acc = predicates.narrow(1, 0, 1)?.squeeze(1)?;
    for step in 1..walk_len {
        acc = (acc * predicates.narrow(1, step, 1)?.squeeze(1)?)?;
    }
    Ok(acc)
}

/// Split the last dimension into real and imaginary halves.
fn complex_parts(t: &Tensor) -> Result<(Tensor, Tensor)> {
    let half = t.dim(D::Minus1)? / 2;
    Ok((t.narrow(D::Minus1, 0, half)?, t.narrow(D::Minus1, half, half)?))
}

/// Complex product along each walk: [n, L, kp] -> ([n, kp/2], [n, kp/2])
fn walk_complex_product(predicates: &Tensor) -> Result<(Tensor, Tensor)> {
    let walk_len = predicates.dim(1)?;
    let (mut re, mut im) = complex_parts(&predicates.narrow(1, 0, 1)?.squeeze(1)?)?;
    for step in 1..walk_len {
        let (c, d) = complex_parts(&predicates.narrow(1, step, 1)?.squeeze(1)?)?;
        let next_re = ((&re * &c)? - (&im * &d)?)?;
        let next_im = ((&re * &d)? + (&im * &c)?)?;
        re = next_re;
        im = next_im;
    }
    Ok((re, im))
}

/// TransE: `sim(s + Σ walk, o)`
pub struct TransE {
    similarity: Similarity,
}

impl TransE {
    pub fn new(similarity: Similarity) -> Self {
        Self { similarity }
    }
}

impl ScoringModel for TransE {
    fn kind(&self) -> ModelKind {
        ModelKind::TransE
    }

    fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor> {
        let translated = (subjects + walk_sum(predicates)?)?;
        self.similarity.apply(&translated, objects)
    }
}

/// DistMult: `sim(s ⊙ Π walk, o)`; with the dot similarity this is the
/// trilinear product `Σ s_i r_i o_i`.
pub struct DistMult {
    similarity: Similarity,
}

impl DistMult {
    pub fn new(similarity: Similarity) -> Self {
        Self { similarity }
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }
}

impl ScoringModel for DistMult {
    fn kind(&self) -> ModelKind {
        ModelKind::DistMult
    }

    fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor> {
        let scaled = (subjects * walk_product(predicates)?)?;
        self.similarity.apply(&scaled, objects)
    }
}

/// ComplEx: `Re(<s, r, conj(o)>)` with the first half of every embedding
/// holding real parts and the second half imaginary parts.
pub struct ComplEx;

impl ScoringModel for ComplEx {
    fn kind(&self) -> ModelKind {
        ModelKind::ComplEx
    }

    fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor> {
        let (r_re, r_im) = walk_complex_product(predicates)?;
        let (s_re, s_im) = complex_parts(subjects)?;
        let (o_re, o_im) = complex_parts(objects)?;

        let real_term = ((&s_re * &o_re)? + (&s_im * &o_im)?)?;
        let imag_term = ((&s_re * &o_im)? - (&s_im * &o_re)?)?;
        let score = ((r_re * real_term)? + (r_im * imag_term)?)?;
        Ok(score.sum(D::Minus1)?)
    }
}

/// ER-MLP: `w · relu([s; Σ walk; o] W)`
pub struct ErMlp {
    hidden: Var,
    output: Var,
}

impl ErMlp {
    pub fn new(
        entity_dim: usize,
        predicate_dim: usize,
        hidden_size: usize,
        rng: &mut impl Rng,
        device: &Device,
    ) -> Result<Self> {
        let input = 2 * entity_dim + predicate_dim;
        let hidden = Var::from_tensor(&xavier_uniform(input, hidden_size, rng, device)?)?;
        let output = Var::from_tensor(&xavier_uniform(hidden_size, 1, rng, device)?)?;
        Ok(Self { hidden, output })
    }
}

impl ScoringModel for ErMlp {
    fn kind(&self) -> ModelKind {
        ModelKind::ErMlp
    }

    fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor> {
        let input = Tensor::cat(&[subjects, &walk_sum(predicates)?, objects], 1)?;
        let hidden = input.matmul(self.hidden.as_tensor())?.relu()?;
        Ok(hidden.matmul(self.output.as_tensor())?.squeeze(1)?)
    }

    fn params(&self) -> Vec<(String, Var)> {
        vec![
            ("ermlp.hidden".to_string(), self.hidden.clone()),
            ("ermlp.output".to_string(), self.output.clone()),
        ]
    }
}
