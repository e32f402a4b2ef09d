//! advset: knowledge-base embeddings regularized by Horn clauses through
//! adversarial sets.
//!
//! A discriminator learns entity and predicate embeddings that rank observed
//! facts above corrupted ones. An adversary searches the same embedding space
//! for entity assignments that violate the given clauses, and the violation
//! is fed back into the discriminator's loss.
//!
//! # Example
//!
//! A clause `p(X, Y) :- q(Y, X)` (every `q` fact implies the inverse `p`
//! fact) is penalized on the adversary's worst-case assignments:
//!
//! ```text
//! loss = fact_loss + adv_weight · Σ relu(margin + min(σ(body)) - σ(head))
//! ```

pub mod adversarial;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod kb;
pub mod model;
pub mod persist;
pub mod regularizers;
pub mod session;
pub mod syntax;
pub mod training;

pub use adversarial::{ClosedFormLifted, GroundLoss, Pooling, ViolatorSearch};
pub use embedding::{EmbeddingStore, EntityConstraint, Projector};
pub use error::{AdvError, Result};
pub use eval::{evaluate_auc, evaluate_ranking, evaluate_ranking_by_predicate, AucMetrics, RankingMetrics};
pub use kb::{Fact, Triple, Vocabulary};
pub use model::{FactScorer, ModelKind, ScoringModel, Similarity};
pub use persist::ModelBundle;
pub use session::{DataPreparation, Phase, Termination, TrainingSession};
pub use syntax::{parse_clause, parse_clauses, Clause};
pub use training::{TrainConfig, TrainReport, Trainer};
