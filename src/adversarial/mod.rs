//! Rule violation: the adversary and the two ground-truth checkers.
//!
//! - [`ViolatorSearch`] looks for embeddings that violate the clauses by
//!   gradient ascent, and feeds the violation back into the fact loss.
//! - [`GroundLoss`] counts violations over sampled entity groundings.
//! - [`ClosedFormLifted`] bounds the worst-case violation analytically and
//!   replaces the search when enabled.

mod bound;
mod closed_form;
mod ground;
mod violator;

pub use bound::{BoundAtom, BoundClause};
pub use closed_form::ClosedFormLifted;
pub use ground::{GroundLoss, GroundMappings};
pub use violator::{Perspective, Pooling, SearchReport, Violation, ViolatorSearch, ViolatorSettings};
