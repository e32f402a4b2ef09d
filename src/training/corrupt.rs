//! Negative sampling by corruption.
//!
//! A corruptor replaces one slot of every fact with an index drawn uniformly,
//! with replacement, from a candidate pool. The draw does not exclude the
//! original index or facts known to be true, so a "negative" may occasionally
//! be a positive.

use crate::error::{AdvError, Result};
use crate::kb::Fact;
use rand::Rng;

/// Which field of a fact gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionSlot {
    Subject,
    Object,
    Relation,
}

/// Generates corrupted copies of facts, row-aligned with the input.
#[derive(Debug, Clone)]
pub struct Corruptor {
    slot: CorruptionSlot,
    candidates: Vec<u32>,
}

impl Corruptor {
    pub fn new(slot: CorruptionSlot, candidates: Vec<u32>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(AdvError::Config(format!(
                "{slot:?} corruption needs a non-empty candidate pool"
            )));
        }
        Ok(Self { slot, candidates })
    }

    pub fn slot(&self) -> CorruptionSlot {
        self.slot
    }

    pub fn candidates(&self) -> &[u32] {
        &self.candidates
    }

    /// Draw one replacement index.
    fn draw(&self, rng: &mut impl Rng) -> u32 {
        self.candidates[rng.random_range(0..self.candidates.len())]
    }

    /// Row `i` of the output is row `i` of `facts` with the slot replaced.
    pub fn corrupt(&self, facts: &[Fact], rng: &mut impl Rng) -> Vec<Fact> {
        facts
            .iter()
            .map(|fact| {
                let replacement = self.draw(rng);
                match self.slot {
                    CorruptionSlot::Subject => Fact { subject: replacement, ..*fact },
                    CorruptionSlot::Object => Fact { object: replacement, ..*fact },
                    CorruptionSlot::Relation => Fact { predicate: replacement, ..*fact },
                }
            })
            .collect()
    }
}
