//! Discriminator training: negative sampling, losses, optimizers and the
//! alternating scheduler.

mod batch;
mod config;
mod corrupt;
mod loss;
mod optimizer;
mod trainer;

pub use batch::{batch_size_for, make_batches, Corruptions, TrainingBatch};
pub use config::{AdversaryConfig, TrainConfig};
pub use corrupt::{CorruptionSlot, Corruptor};
pub use loss::{predicate_l2, FactLoss, PairwiseLoss, PointwiseLoss};
pub use optimizer::{Adagrad, OptimizerKind, ParamsAdagrad, PhaseOptimizer};
pub use trainer::{EpochStats, SubEpochStats, TrainReport, Trainer};
