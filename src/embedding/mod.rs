//! Embedding tables and the projection constraints applied to them.

mod projection;
mod store;

pub use projection::{renorm, unit_cube, unit_sphere, EntityConstraint, Projector};
pub use store::{xavier_uniform, EmbeddingStore};
