//! Knowledge-base plumbing: triple files, vocabularies, inference and sampling.
//!
//! Facts are immutable `(predicate, [subject, object])` index tuples produced
//! once from the raw triples.

mod materialize;
mod sample;
mod sparse;
mod triples;
mod vocab;

pub use materialize::materialize;
pub use sample::{subsample, subsample_heads};
pub use sparse::SparseRelation;
pub use triples::{parse_triples, read_triples, Triple};
pub use vocab::{Fact, Vocabulary};
