//! Scoring oracles.
//!
//! A scoring model turns selected predicate and entity embeddings into one
//! real score per fact. The training loop only talks to the
//! [`ScoringModel`] trait, so the discriminator and the adversary can run
//! the same oracle over different variable sets.

mod scorers;
mod similarity;

pub use scorers::{ComplEx, DistMult, ErMlp, TransE};
pub use similarity::Similarity;

use crate::embedding::EmbeddingStore;
use crate::error::{AdvError, Result};
use crate::kb::Fact;
use candle_core::{Device, Tensor, Var};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Available scoring architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelKind {
    TransE,
    #[default]
    DistMult,
    ComplEx,
    ErMlp,
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "transe" => Ok(ModelKind::TransE),
            "distmult" => Ok(ModelKind::DistMult),
            "complex" => Ok(ModelKind::ComplEx),
            "ermlp" => Ok(ModelKind::ErMlp),
            other => Err(format!("unknown model: {other}")),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::TransE => "TransE",
            ModelKind::DistMult => "DistMult",
            ModelKind::ComplEx => "ComplEx",
            ModelKind::ErMlp => "ER-MLP",
        };
        f.write_str(name)
    }
}

/// A differentiable fact scorer.
pub trait ScoringModel {
    fn kind(&self) -> ModelKind;

    /// Score `n` facts.
    ///
    /// * `predicates` - predicate walks: [n, walk_len, predicate_dim]
    /// * `subjects` - subject embeddings: [n, entity_dim]
    /// * `objects` - object embeddings: [n, entity_dim]
    ///
    /// Returns raw scores: [n]
    fn score(&self, predicates: &Tensor, subjects: &Tensor, objects: &Tensor) -> Result<Tensor>;

    /// Architecture-owned trainable parameters, trained with the embeddings.
    fn params(&self) -> Vec<(String, Var)> {
        Vec::new()
    }
}

/// Build the scoring model for `kind`.
pub fn build_model(
    kind: ModelKind,
    similarity: Similarity,
    entity_dim: usize,
    predicate_dim: usize,
    hidden_size: Option<usize>,
    rng: &mut impl Rng,
    device: &Device,
) -> Result<Box<dyn ScoringModel>> {
    Ok(match kind {
        ModelKind::TransE => Box::new(TransE::new(similarity)),
        ModelKind::DistMult => Box::new(DistMult::new(similarity)),
        ModelKind::ComplEx => {
            if entity_dim % 2 != 0 || entity_dim != predicate_dim {
                return Err(AdvError::Config(format!(
                    "ComplEx needs equal, even embedding sizes, got {entity_dim} and {predicate_dim}"
                )));
            }
            Box::new(ComplEx)
        }
        ModelKind::ErMlp => {
            let hidden = hidden_size
                .ok_or_else(|| AdvError::Config("ER-MLP needs a hidden size".into()))?;
            Box::new(ErMlp::new(entity_dim, predicate_dim, hidden, rng, device)?)
        }
    })
}

/// Scores facts by index against the current embedding tables.
///
/// This is the one scoring entry point used by training diagnostics,
/// `--debug-scores` and ranking evaluation.
pub struct FactScorer<'a> {
    store: &'a EmbeddingStore,
    model: &'a dyn ScoringModel,
}

impl<'a> FactScorer<'a> {
    pub fn new(store: &'a EmbeddingStore, model: &'a dyn ScoringModel) -> Self {
        Self { store, model }
    }

    pub fn store(&self) -> &EmbeddingStore {
        self.store
    }

    /// Score `(walk, subject, object)` rows; `walks` and `pairs` are row-aligned.
    pub fn score(&self, walks: &[Vec<u32>], pairs: &[(u32, u32)]) -> Result<Vec<f32>> {
        if walks.len() != pairs.len() {
            return Err(AdvError::Config(format!(
                "{} predicate walks for {} entity pairs",
                walks.len(),
                pairs.len()
            )));
        }
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let subjects: Vec<u32> = pairs.iter().map(|(s, _)| *s).collect();
        let objects: Vec<u32> = pairs.iter().map(|(_, o)| *o).collect();
        let scores = self.model.score(
            &self.store.predicate_walks(walks)?,
            &self.store.entity_rows(&subjects)?,
            &self.store.entity_rows(&objects)?,
        )?;
        Ok(scores.detach().to_vec1()?)
    }

    /// Differentiable scores of single-predicate facts: [n]
    pub fn score_facts(&self, facts: &[Fact]) -> Result<Tensor> {
        let predicates: Vec<u32> = facts.iter().map(|f| f.predicate).collect();
        let subjects: Vec<u32> = facts.iter().map(|f| f.subject).collect();
        let objects: Vec<u32> = facts.iter().map(|f| f.object).collect();
        self.model.score(
            &self.store.predicate_rows(&predicates)?,
            &self.store.entity_rows(&subjects)?,
            &self.store.entity_rows(&objects)?,
        )
    }
}
