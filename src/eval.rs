//! Link-prediction evaluation.
//!
//! Filtered ranking: for each test fact both the subject and the object are
//! replaced by every entity. The rank of the true fact counts only the
//! replacements that score higher and are not themselves known true facts.
//!
//! Classification: when labelled negatives are available, the areas under
//! the ROC and precision-recall curves separate them from the positives.

use crate::error::{AdvError, Result};
use crate::kb::{Fact, Vocabulary};
use crate::model::FactScorer;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use tracing::info;

/// Cut-offs reported as Hits@k.
pub const HITS_AT: [usize; 4] = [1, 3, 5, 10];

#[derive(Debug, Clone, PartialEq)]
pub struct RankingMetrics {
    /// Ranked queries: two per test fact
    pub count: usize,
    pub mean_rank: f64,
    pub mrr: f64,
    /// `(k, fraction of queries ranked <= k)` for each of [`HITS_AT`]
    pub hits: Vec<(usize, f64)>,
}

fn filtered_rank(scores: &[f32], candidates: &[u32], truth: u32, is_known: impl Fn(u32) -> bool) -> usize {
    let true_score = candidates
        .iter()
        .position(|&e| e == truth)
        .map(|i| scores[i])
        .unwrap_or(f32::NEG_INFINITY);
    1 + candidates
        .iter()
        .zip(scores)
        .filter(|&(&e, &s)| e != truth && s > true_score && !is_known(e))
        .count()
}

/// Rank every test fact against all `entities` on both sides.
///
/// `known` holds every true fact (train, valid and test) used for filtering.
pub fn evaluate_ranking(
    scorer: &FactScorer,
    test: &[Fact],
    known: &FxHashSet<Fact>,
    entities: &[u32],
) -> Result<RankingMetrics> {
    let mut ranks = Vec::with_capacity(test.len() * 2);
    for fact in test {
        let walks = vec![vec![fact.predicate]; entities.len()];

        let objects: Vec<(u32, u32)> = entities.iter().map(|&e| (fact.subject, e)).collect();
        let scores = scorer.score(&walks, &objects)?;
        ranks.push(filtered_rank(&scores, entities, fact.object, |e| {
            known.contains(&Fact::new(fact.predicate, fact.subject, e))
        }));

        let subjects: Vec<(u32, u32)> = entities.iter().map(|&e| (e, fact.object)).collect();
        let scores = scorer.score(&walks, &subjects)?;
        ranks.push(filtered_rank(&scores, entities, fact.subject, |e| {
            known.contains(&Fact::new(fact.predicate, e, fact.object))
        }));
    }

    let count = ranks.len();
    if count == 0 {
        return Ok(RankingMetrics {
            count,
            mean_rank: 0.0,
            mrr: 0.0,
            hits: HITS_AT.iter().map(|&k| (k, 0.0)).collect(),
        });
    }
    let n = count as f64;
    Ok(RankingMetrics {
        count,
        mean_rank: ranks.iter().sum::<usize>() as f64 / n,
        mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
        hits: HITS_AT
            .iter()
            .map(|&k| (k, ranks.iter().filter(|&&r| r <= k).count() as f64 / n))
            .collect(),
    })
}

/// Ranking metrics of each predicate's test facts, by predicate index.
pub fn evaluate_ranking_by_predicate(
    scorer: &FactScorer,
    test: &[Fact],
    known: &FxHashSet<Fact>,
    entities: &[u32],
) -> Result<Vec<(u32, RankingMetrics)>> {
    let mut groups: BTreeMap<u32, Vec<Fact>> = BTreeMap::new();
    for fact in test {
        groups.entry(fact.predicate).or_default().push(*fact);
    }
    groups
        .into_iter()
        .map(|(predicate, facts)| Ok((predicate, evaluate_ranking(scorer, &facts, known, entities)?)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AucMetrics {
    pub roc: f64,
    pub pr: f64,
}

/// Probability that a random positive outscores a random negative; ties
/// count one half.
pub fn roc_auc(positives: &[f32], negatives: &[f32]) -> f64 {
    let mut wins = 0.0;
    for &p in positives {
        for &n in negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    wins / (positives.len() * negatives.len()) as f64
}

/// Trapezoidal area under the precision-recall curve, with one point per
/// distinct score threshold and the curve anchored at recall 0, precision 1.
pub fn pr_auc(positives: &[f32], negatives: &[f32]) -> f64 {
    let mut scored: Vec<(f32, bool)> = positives
        .iter()
        .map(|&s| (s, true))
        .chain(negatives.iter().map(|&s| (s, false)))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let nb_positives = positives.len() as f64;
    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut recall, mut precision) = (0.0, 1.0);
    let mut area = 0.0;
    let mut i = 0;
    while i < scored.len() {
        let threshold = scored[i].0;
        while i < scored.len() && scored[i].0 == threshold {
            if scored[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let (r, p) = (tp / nb_positives, tp / (tp + fp));
        area += (r - recall) * (p + precision) / 2.0;
        (recall, precision) = (r, p);
    }
    area
}

/// Score labelled positives and negatives and measure how well they separate.
pub fn evaluate_auc(scorer: &FactScorer, positives: &[Fact], negatives: &[Fact]) -> Result<AucMetrics> {
    if positives.is_empty() || negatives.is_empty() {
        return Err(AdvError::Config(
            "AUC evaluation needs both positive and negative facts".into(),
        ));
    }
    let score = |facts: &[Fact]| {
        let walks: Vec<Vec<u32>> = facts.iter().map(|f| vec![f.predicate]).collect();
        let pairs: Vec<(u32, u32)> = facts.iter().map(|f| (f.subject, f.object)).collect();
        scorer.score(&walks, &pairs)
    };
    let (pos, neg) = (score(positives)?, score(negatives)?);
    Ok(AucMetrics {
        roc: roc_auc(&pos, &neg),
        pr: pr_auc(&pos, &neg),
    })
}

pub fn log_auc(tag: &str, metrics: &AucMetrics) {
    info!("[{}] AUC-ROC: {:.4}", tag, metrics.roc);
    info!("[{}] AUC-PR: {:.4}", tag, metrics.pr);
}

/// Log one line per predicate, named through `vocab`.
pub fn log_predicate_metrics(tag: &str, per_predicate: &[(u32, RankingMetrics)], vocab: &Vocabulary) {
    for (predicate, m) in per_predicate {
        let name = vocab.predicate_name(*predicate).unwrap_or("?");
        let hits10 = m.hits.iter().find(|(k, _)| *k == 10).map_or(0.0, |(_, h)| *h);
        info!(
            "[{}] {}\t#{}\tMean Rank: {:.2}\tMRR: {:.4}\tHits@10: {:.2}%",
            tag,
            name,
            m.count,
            m.mean_rank,
            m.mrr,
            hits10 * 100.0
        );
    }
}

/// Log metrics under a tag such as `valid` or `test`.
pub fn log_metrics(tag: &str, metrics: &RankingMetrics) {
    info!("[{}] Mean Rank: {:.2}", tag, metrics.mean_rank);
    info!("[{}] MRR: {:.4}", tag, metrics.mrr);
    for (k, hits) in &metrics.hits {
        info!("[{}] Hits@{}: {:.2}%", tag, k, hits * 100.0);
    }
}
