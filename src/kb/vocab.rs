//! Entity and predicate vocabularies.
//!
//! Indices start at 1: index 0 is reserved as the padding/missing sentinel and
//! row 0 of every embedding table is never trained.

use super::triples::Triple;
use crate::error::{AdvError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An indexed fact: `(predicate, [subject, object])`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fact {
    pub predicate: u32,
    pub subject: u32,
    pub object: u32,
}

impl Fact {
    pub fn new(predicate: u32, subject: u32, object: u32) -> Self {
        Self {
            predicate,
            subject,
            object,
        }
    }

    pub fn entities(&self) -> [u32; 2] {
        [self.subject, self.object]
    }
}

/// Bidirectional name <-> index maps for entities and predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub entity_to_index: IndexMap<String, u32>,
    pub predicate_to_index: IndexMap<String, u32>,
}

impl Vocabulary {
    /// Build the vocabulary of all names in `triples`. Names are sorted so the
    /// assignment does not depend on file order.
    pub fn from_triples<'a>(triples: impl IntoIterator<Item = &'a Triple>) -> Self {
        let mut entities: Vec<&str> = Vec::new();
        let mut predicates: Vec<&str> = Vec::new();
        for t in triples {
            entities.push(&t.subject);
            entities.push(&t.object);
            predicates.push(&t.predicate);
        }
        entities.sort_unstable();
        entities.dedup();
        predicates.sort_unstable();
        predicates.dedup();

        Self {
            entity_to_index: number_from_one(&entities),
            predicate_to_index: number_from_one(&predicates),
        }
    }

    pub fn nb_entities(&self) -> usize {
        self.entity_to_index.len()
    }

    pub fn nb_predicates(&self) -> usize {
        self.predicate_to_index.len()
    }

    pub fn entity_index(&self, name: &str) -> Result<u32> {
        self.entity_to_index
            .get(name)
            .copied()
            .ok_or_else(|| AdvError::UnknownEntity(name.to_string()))
    }

    pub fn predicate_index(&self, name: &str) -> Result<u32> {
        self.predicate_to_index
            .get(name)
            .copied()
            .ok_or_else(|| AdvError::UnknownPredicate(name.to_string()))
    }

    /// Name of an entity index (reverse lookup).
    pub fn entity_name(&self, index: u32) -> Option<&str> {
        self.entity_to_index
            .get_index(index.checked_sub(1)? as usize)
            .map(|(name, _)| name.as_str())
    }

    /// Name of a predicate index (reverse lookup).
    pub fn predicate_name(&self, index: u32) -> Option<&str> {
        self.predicate_to_index
            .get_index(index.checked_sub(1)? as usize)
            .map(|(name, _)| name.as_str())
    }

    /// All entity indices, ascending. This is the corruption candidate pool.
    pub fn entity_indices(&self) -> Vec<u32> {
        (1..=self.nb_entities() as u32).collect()
    }

    /// All predicate indices, ascending.
    pub fn predicate_indices(&self) -> Vec<u32> {
        (1..=self.nb_predicates() as u32).collect()
    }

    pub fn fact(&self, triple: &Triple) -> Result<Fact> {
        Ok(Fact::new(
            self.predicate_index(&triple.predicate)?,
            self.entity_index(&triple.subject)?,
            self.entity_index(&triple.object)?,
        ))
    }

    pub fn facts(&self, triples: &[Triple]) -> Result<Vec<Fact>> {
        triples.iter().map(|t| self.fact(t)).collect()
    }
}

fn number_from_one(names: &[&str]) -> IndexMap<String, u32> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i as u32 + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let triples = [Triple::new("b", "p", "a"), Triple::new("c", "q", "b")];
        Vocabulary::from_triples(&triples)
    }

    #[test]
    fn test_index_zero_is_reserved() {
        let v = vocab();
        assert!(!v.entity_to_index.values().any(|&i| i == 0));
        assert!(!v.predicate_to_index.values().any(|&i| i == 0));
        assert_eq!(v.entity_indices(), vec![1, 2, 3]);
        assert_eq!(v.predicate_indices(), vec![1, 2]);
    }

    #[test]
    fn test_reverse_lookup() {
        let v = vocab();
        assert_eq!(v.entity_index("a").unwrap(), 1);
        assert_eq!(v.entity_name(1), Some("a"));
        assert_eq!(v.entity_name(0), None);
        assert_eq!(v.predicate_name(2), Some("q"));
    }

    #[test]
    fn test_unknown_names() {
        let v = vocab();
        assert!(matches!(v.entity_index("zzz"), Err(AdvError::UnknownEntity(_))));
        assert!(matches!(
            v.fact(&Triple::new("a", "r", "b")),
            Err(AdvError::UnknownPredicate(_))
        ));
    }

    #[test]
    fn test_facts() {
        let v = vocab();
        let fact = v.fact(&Triple::new("c", "q", "b")).unwrap();
        assert_eq!(fact, Fact::new(2, 3, 2));
        assert_eq!(fact.entities(), [3, 2]);
    }
}
