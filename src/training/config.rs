//! Training configuration.
//!
//! Every hyper-parameter of a run lives in [`TrainConfig`]. The binary
//! builds one from the command line; [`TrainConfig::validate`] rejects
//! inconsistent settings before any training step runs.

use crate::adversarial::{ClosedFormLifted, Pooling};
use crate::embedding::EntityConstraint;
use crate::error::{AdvError, Result};
use crate::model::{ModelKind, Similarity};
use crate::training::{FactLoss, OptimizerKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings of the adversarial regularizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdversaryConfig {
    /// Learning rate of the violator search; `Some` enables the search
    pub lr: Option<f64>,
    /// Use the closed-form lifted bound instead of the search
    pub closed_form: bool,
    /// Weight of the violation loss in the discriminator objective
    pub weight: f64,
    pub margin: f64,
    /// Violators per clause variable
    pub batch_size: usize,
    pub pooling: Pooling,
    /// Ascent steps per outer epoch
    pub epochs: usize,
    /// Initialize violators from real entity embeddings
    pub init_ground: bool,
    /// Sampled groundings per clause for zero/one error checking
    pub ground_samples: Option<usize>,
    pub ground_tolerance: f64,
}

impl Default for AdversaryConfig {
    fn default() -> Self {
        Self {
            lr: None,
            closed_form: false,
            weight: 1.0,
            margin: 0.0,
            batch_size: 1,
            pooling: Pooling::Sum,
            epochs: 10,
            init_ground: false,
            ground_samples: None,
            ground_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model: ModelKind,
    pub similarity: Similarity,
    pub entity_embedding_size: usize,
    /// Defaults to the entity embedding size
    pub predicate_embedding_size: Option<usize>,
    /// ER-MLP hidden layer width
    pub hidden_size: Option<usize>,

    pub fact_loss: FactLoss,
    pub margin: f64,

    pub optimizer: OptimizerKind,
    pub lr: f64,
    pub initial_accumulator_value: f64,

    pub nb_epochs: usize,
    pub nb_batches: usize,
    /// Discriminator passes over the training set per outer epoch
    pub discriminator_epochs: usize,
    pub corrupt_relations: bool,

    pub constraint: EntityConstraint,
    /// Cap on predicate embedding norms
    pub predicate_norm: Option<f64>,
    /// Weight of the L2 penalty on the predicate table
    pub predicate_l2: Option<f64>,
    /// Entities whose embedding is pinned to the all-ones vector
    pub all_one_entities: Vec<String>,

    pub adversary: AdversaryConfig,

    /// Weight of the schema-aware regularizer; `Some` enables it
    pub sar_weight: Option<f64>,
    pub sar_similarity: Similarity,

    pub seed: u64,
    pub debug: bool,
    /// Prefix for per-epoch embedding snapshots
    pub debug_embeddings: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::DistMult,
            similarity: Similarity::Dot,
            entity_embedding_size: 10,
            predicate_embedding_size: None,
            hidden_size: None,
            fact_loss: FactLoss::default(),
            margin: 1.0,
            optimizer: OptimizerKind::Adagrad,
            lr: 0.1,
            initial_accumulator_value: 0.1,
            nb_epochs: 100,
            nb_batches: 10,
            discriminator_epochs: 1,
            corrupt_relations: false,
            constraint: EntityConstraint::UnitSphere,
            predicate_norm: None,
            predicate_l2: None,
            all_one_entities: Vec::new(),
            adversary: AdversaryConfig::default(),
            sar_weight: None,
            sar_similarity: Similarity::L2Sqr,
            seed: 0,
            debug: false,
            debug_embeddings: None,
        }
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(AdvError::Config(format!("{name} must be positive")));
    }
    Ok(())
}

fn positive_rate(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(AdvError::Config(format!("{name} must be a positive number, got {value}")));
    }
    Ok(())
}

impl TrainConfig {
    pub fn predicate_embedding_size(&self) -> usize {
        self.predicate_embedding_size.unwrap_or(self.entity_embedding_size)
    }

    pub fn uses_clauses(&self) -> bool {
        self.adversary.lr.is_some()
            || self.adversary.closed_form
            || self.adversary.ground_samples.is_some()
            || self.sar_weight.is_some()
    }

    /// Check the configuration for a run with `nb_clauses` clauses.
    pub fn validate(&self, nb_clauses: usize) -> Result<()> {
        let adv = &self.adversary;
        if adv.lr.is_some() && adv.closed_form {
            return Err(AdvError::Config(
                "the adversary runs either by gradient ascent or in closed form, not both".into(),
            ));
        }
        if adv.closed_form {
            if self.constraint != EntityConstraint::UnitCube {
                return Err(AdvError::Config(
                    "closed-form violation bounds require the unit-cube constraint".into(),
                ));
            }
            if !ClosedFormLifted::supports(self.model, self.similarity) {
                return Err(AdvError::Unsupported(format!(
                    "no closed-form violation bound for {} with {} similarity",
                    self.model, self.similarity
                )));
            }
        }
        if self.uses_clauses() && nb_clauses == 0 {
            return Err(AdvError::Config(
                "adversarial training, ground checks and schema regularization need clauses".into(),
            ));
        }

        positive("entity embedding size", self.entity_embedding_size)?;
        positive("predicate embedding size", self.predicate_embedding_size())?;
        positive("number of epochs", self.nb_epochs)?;
        positive("number of batches", self.nb_batches)?;
        positive("discriminator epochs", self.discriminator_epochs)?;
        positive_rate("learning rate", self.lr)?;
        if let Some(lr) = adv.lr {
            positive_rate("adversarial learning rate", lr)?;
            positive("adversarial batch size", adv.batch_size)?;
            positive("adversary epochs", adv.epochs)?;
        }
        if let Some(samples) = adv.ground_samples {
            positive("ground samples", samples)?;
        }

        match self.model {
            ModelKind::ComplEx
                if self.entity_embedding_size % 2 != 0
                    || self.entity_embedding_size != self.predicate_embedding_size() =>
            {
                return Err(AdvError::Config(
                    "ComplEx needs an even embedding size shared by entities and predicates".into(),
                ));
            }
            ModelKind::ErMlp if self.hidden_size.unwrap_or(0) == 0 => {
                return Err(AdvError::Config("ER-MLP needs a positive hidden size".into()));
            }
            ModelKind::TransE | ModelKind::DistMult
                if self.entity_embedding_size != self.predicate_embedding_size() =>
            {
                return Err(AdvError::Config(format!(
                    "{} needs equal entity and predicate embedding sizes",
                    self.model
                )));
            }
            _ => {}
        }

        if self.sar_weight.is_some()
            && !matches!(self.sar_similarity, Similarity::L1 | Similarity::L2 | Similarity::L2Sqr)
        {
            return Err(AdvError::Config(format!(
                "schema-aware regularization needs l1, l2 or l2_sqr, got {}",
                self.sar_similarity
            )));
        }
        Ok(())
    }
}
