//! Mini-batch assembly.
//!
//! A batch is a sequence of `V`-row groups: row 0 is the positive fact, row 1
//! its subject corruption, row 2 its object corruption and, when relations are
//! corrupted too, row 3 its relation corruption.

use crate::error::{AdvError, Result};
use crate::kb::Fact;

/// `[start, end)` ranges covering `0..nb_samples` in chunks of `batch_size`.
pub fn make_batches(nb_samples: usize, batch_size: usize) -> Vec<(usize, usize)> {
    if batch_size == 0 {
        return Vec::new();
    }
    (0..nb_samples)
        .step_by(batch_size)
        .map(|start| (start, (start + batch_size).min(nb_samples)))
        .collect()
}

/// Samples per batch when `nb_samples` is split into `nb_batches` batches.
pub fn batch_size_for(nb_samples: usize, nb_batches: usize) -> usize {
    nb_samples.div_ceil(nb_batches.max(1))
}

/// Corrupted versions of one shuffled epoch, row-aligned with the positives.
#[derive(Debug, Clone)]
pub struct Corruptions {
    pub subjects: Vec<Fact>,
    pub objects: Vec<Fact>,
    pub relations: Option<Vec<Fact>>,
}

/// Interleaved positive and corrupted facts.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    facts: Vec<Fact>,
    nb_versions: usize,
}

impl TrainingBatch {
    /// Interleave `positives[range]` with their corruptions and check the
    /// group layout.
    pub fn assemble(positives: &[Fact], corruptions: &Corruptions, range: (usize, usize)) -> Result<Self> {
        let (start, end) = range;
        let aligned = corruptions.subjects.len() == positives.len()
            && corruptions.objects.len() == positives.len()
            && corruptions.relations.as_ref().map_or(true, |r| r.len() == positives.len());
        if !aligned || start > end || end > positives.len() {
            return Err(AdvError::BatchInvariant(format!(
                "corruptions are not row-aligned with {} positives for batch {start}..{end}",
                positives.len()
            )));
        }

        let nb_versions = if corruptions.relations.is_some() { 4 } else { 3 };
        let mut facts = Vec::with_capacity((end - start) * nb_versions);
        for i in start..end {
            facts.push(positives[i]);
            facts.push(corruptions.subjects[i]);
            facts.push(corruptions.objects[i]);
            if let Some(relations) = &corruptions.relations {
                facts.push(relations[i]);
            }
        }

        let batch = Self { facts, nb_versions };
        batch.validate()?;
        Ok(batch)
    }

    /// Every corrupted row must agree with its positive row on all fields
    /// except the corrupted one.
    pub fn validate(&self) -> Result<()> {
        if !(3..=4).contains(&self.nb_versions) || self.facts.len() % self.nb_versions != 0 {
            return Err(AdvError::BatchInvariant(format!(
                "{} rows do not split into groups of {}",
                self.facts.len(),
                self.nb_versions
            )));
        }
        for (group, rows) in self.facts.chunks(self.nb_versions).enumerate() {
            let positive = rows[0];
            let broken = if rows[1].predicate != positive.predicate || rows[1].object != positive.object {
                Some("subject corruption")
            } else if rows[2].predicate != positive.predicate || rows[2].subject != positive.subject {
                Some("object corruption")
            } else if self.nb_versions == 4
                && (rows[3].subject != positive.subject || rows[3].object != positive.object)
            {
                Some("relation corruption")
            } else {
                None
            };
            if let Some(which) = broken {
                return Err(AdvError::BatchInvariant(format!(
                    "group {group}: {which} changed a field other than its own"
                )));
            }
        }
        Ok(())
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Rows per group: 3, or 4 with relation corruption.
    pub fn nb_versions(&self) -> usize {
        self.nb_versions
    }

    pub fn nb_groups(&self) -> usize {
        self.facts.len() / self.nb_versions
    }

    /// `1` on positive rows and `0` on corrupted ones.
    pub fn targets(&self) -> Vec<f32> {
        (0..self.facts.len())
            .map(|i| if i % self.nb_versions == 0 { 1.0 } else { 0.0 })
            .collect()
    }
}
