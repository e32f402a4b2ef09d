//! Error types for advset.

use thiserror::Error;

/// The main error type for advset operations.
#[derive(Debug, Error)]
pub enum AdvError {
    /// Candle tensor operation failed
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Reading or writing a file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Model bundle metadata could not be (de)serialized
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Clause or triple parse error
    #[error("parse error at {location}: {message}")]
    Parse { location: String, message: String },

    /// Rejected configuration, raised before any training step runs
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity name missing from the vocabulary
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Predicate name missing from the vocabulary
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),

    /// A training batch broke the positive/corruption row layout.
    /// This is a programming error, never a recoverable condition.
    #[error("batch invariant violated: {0}")]
    BatchInvariant(String),

    /// The fact loss diverged
    #[error("fact loss is NaN at epoch {epoch}/{sub_epoch}")]
    NanLoss { epoch: usize, sub_epoch: usize },

    /// Requested combination has no implementation (e.g. closed form for TransE)
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl AdvError {
    pub(crate) fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        AdvError::Parse {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Result type for advset operations.
pub type Result<T> = std::result::Result<T, AdvError>;
