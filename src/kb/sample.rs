//! Training-set subsampling for few-shot experiments.

use super::vocab::{Fact, Vocabulary};
use crate::error::{AdvError, Result};
use crate::syntax::Clause;
use rand::Rng;
use rustc_hash::FxHashSet;

fn check_fraction(fraction: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(AdvError::Config(format!(
            "subsample fraction must be in [0, 1], got {}",
            fraction
        )));
    }
    Ok(())
}

fn choose(facts: &[Fact], fraction: f64, rng: &mut impl Rng) -> Vec<Fact> {
    let size = (facts.len() as f64 * fraction).round() as usize;
    rand::seq::index::sample(rng, facts.len(), size)
        .into_iter()
        .map(|i| facts[i])
        .collect()
}

/// Keep a random `fraction` of the facts, without replacement.
pub fn subsample(facts: &[Fact], fraction: f64, rng: &mut impl Rng) -> Result<Vec<Fact>> {
    check_fraction(fraction)?;
    Ok(choose(facts, fraction, rng))
}

/// Subsample only the facts whose predicate appears in some clause head;
/// facts of every other predicate are kept.
pub fn subsample_heads(
    facts: &[Fact],
    clauses: &[Clause],
    vocab: &Vocabulary,
    fraction: f64,
    rng: &mut impl Rng,
) -> Result<Vec<Fact>> {
    check_fraction(fraction)?;

    let heads: FxHashSet<u32> = clauses
        .iter()
        .map(|c| vocab.predicate_index(&c.head.predicate))
        .collect::<Result<_>>()?;

    let mut predicates: Vec<u32> = facts.iter().map(|f| f.predicate).collect();
    predicates.sort_unstable();
    predicates.dedup();

    let mut result = Vec::with_capacity(facts.len());
    for p in predicates {
        let group: Vec<Fact> = facts.iter().copied().filter(|f| f.predicate == p).collect();
        if heads.contains(&p) {
            result.extend(choose(&group, fraction, rng));
        } else {
            result.extend(group);
        }
    }
    Ok(result)
}
