//! Sampled zero/one violation checking.
//!
//! Each clause gets a fixed sample of concrete variable-to-entity mappings.
//! Every epoch the clause is evaluated under the current model for each
//! mapping and the violated mappings are counted. The count is a diagnostic
//! and never feeds the loss.

use super::bound::{BoundAtom, BoundClause};
use crate::error::Result;
use crate::model::FactScorer;
use crate::syntax::ClauseKind;
use rand::Rng;

/// Concrete entity assignments for a clause's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundMappings {
    /// Row `i` maps `variables[j]` to `rows[i][j]`
    pub rows: Vec<Vec<u32>>,
}

impl GroundMappings {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Counts clause violations over sampled groundings.
#[derive(Debug, Clone, Copy)]
pub struct GroundLoss {
    tolerance: f64,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl GroundLoss {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Draw `sample_size` mappings of `nb_variables` variables to entities,
    /// uniformly with replacement.
    pub fn sample_mappings(
        nb_variables: usize,
        entities: &[u32],
        sample_size: usize,
        rng: &mut impl Rng,
    ) -> GroundMappings {
        if entities.is_empty() {
            return GroundMappings { rows: Vec::new() };
        }
        let rows = (0..sample_size)
            .map(|_| {
                (0..nb_variables)
                    .map(|_| entities[rng.random_range(0..entities.len())])
                    .collect()
            })
            .collect();
        GroundMappings { rows }
    }

    /// Truth probabilities of `atom` under every mapping.
    fn probabilities(atom: &BoundAtom, mappings: &GroundMappings, scorer: &FactScorer) -> Result<Vec<f32>> {
        let walks = vec![vec![atom.predicate]; mappings.len()];
        let pairs: Vec<(u32, u32)> = mappings
            .rows
            .iter()
            .map(|row| (row[atom.subject], row[atom.object]))
            .collect();
        Ok(scorer.score(&walks, &pairs)?.into_iter().map(sigmoid).collect())
    }

    /// Number of mappings under which `clause` is violated, in `[0, mappings.len()]`.
    pub fn zero_one_errors(
        &self,
        clause: &BoundClause,
        mappings: &GroundMappings,
        scorer: &FactScorer,
    ) -> Result<usize> {
        if mappings.is_empty() {
            return Ok(0);
        }
        let head = Self::probabilities(&clause.head, mappings, scorer)?;
        let tolerance = self.tolerance as f32;

        let errors = match clause.kind() {
            ClauseKind::Implication => {
                let mut body = Self::probabilities(&clause.body[0], mappings, scorer)?;
                for atom in &clause.body[1..] {
                    let next = Self::probabilities(atom, mappings, scorer)?;
                    for (b, n) in body.iter_mut().zip(next) {
                        *b = b.min(n);
                    }
                }
                body.iter().zip(&head).filter(|(b, h)| *b - *h > tolerance).count()
            }
            ClauseKind::Equivalence => {
                let other = Self::probabilities(&clause.body[0], mappings, scorer)?;
                other.iter().zip(&head).filter(|(o, h)| (*o - *h).abs() > tolerance).count()
            }
        };
        Ok(errors)
    }
}
