//! Sparse binary relations for logical inference over facts.
//!
//! A predicate like `parent(X, Y)` is stored as a set of entity-index pairs,
//! not a dense matrix. This is efficient when the relation is sparse (few
//! facts, large domain).

use rustc_hash::{FxHashMap, FxHashSet};

/// A sparse Boolean relation represented as a set of `(subject, object)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRelation {
    pub pairs: FxHashSet<(u32, u32)>,
}

impl SparseRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair; returns true if it was not present.
    pub fn insert(&mut self, subject: u32, object: u32) -> bool {
        self.pairs.insert((subject, object))
    }

    pub fn contains(&self, subject: u32, object: u32) -> bool {
        self.pairs.contains(&(subject, object))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Swap subject and object of every pair.
    pub fn inverse(&self) -> Self {
        Self {
            pairs: self.pairs.iter().map(|&(s, o)| (o, s)).collect(),
        }
    }

    /// Relational composition on the shared middle entity.
    ///
    /// Example: `parent ∘ parent` yields `(x, z)` for every `parent(x, y), parent(y, z)`.
    pub fn compose(&self, other: &Self) -> Self {
        // Build hash index on `other` keyed by subject
        let mut index: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for &(s, o) in &other.pairs {
            index.entry(s).or_default().push(o);
        }

        let mut result = SparseRelation::new();
        for &(x, y) in &self.pairs {
            if let Some(objects) = index.get(&y) {
                for &z in objects {
                    result.insert(x, z);
                }
            }
        }
        result
    }

    /// Union of two relations (logical OR).
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.pairs.extend(other.pairs.iter().copied());
        result
    }
}
