//! Forward chaining over indexed facts.
//!
//! Clauses are applied until fixpoint. Bodies must form a variable chain
//! (`p(X, Y), q(Y, Z)`, in any argument order), which covers implications,
//! inversions and compositions of binary predicates.

use super::sparse::SparseRelation;
use super::vocab::{Fact, Vocabulary};
use crate::error::Result;
use crate::syntax::{Atom, Clause, ClauseKind};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// A clause with predicate names resolved to indices.
#[derive(Debug, Clone)]
struct Rule {
    head: (u32, String, String),
    body: Vec<(u32, String, String)>,
}

/// Safety limit on fixpoint iterations.
const MAX_ITERATIONS: usize = 1000;

/// Derive every fact entailed by `facts` and `clauses`.
///
/// The result starts with `facts` in their original order, followed by the
/// newly inferred facts in ascending order.
pub fn materialize(facts: &[Fact], clauses: &[Clause], vocab: &Vocabulary) -> Result<Vec<Fact>> {
    let mut rules = Vec::new();
    for clause in clauses {
        match clause.kind {
            ClauseKind::Implication => rules.push(resolve(&clause.head, &clause.body, vocab)?),
            ClauseKind::Equivalence => {
                rules.push(resolve(&clause.head, &clause.body, vocab)?);
                rules.push(resolve(&clause.body[0], std::slice::from_ref(&clause.head), vocab)?);
            }
        }
    }

    let mut relations: FxHashMap<u32, SparseRelation> = FxHashMap::default();
    for f in facts {
        relations.entry(f.predicate).or_default().insert(f.subject, f.object);
    }

    let mut iterations = 0;
    loop {
        if iterations >= MAX_ITERATIONS {
            warn!("materialization stopped after {} iterations", MAX_ITERATIONS);
            break;
        }

        let old_total: usize = relations.values().map(|r| r.len()).sum();

        // Apply each rule once
        for rule in &rules {
            if let Some(derived) = apply_rule(rule, &relations) {
                let head = relations.entry(rule.head.0).or_default();
                head.pairs.extend(derived.pairs);
            }
        }

        let new_total: usize = relations.values().map(|r| r.len()).sum();
        iterations += 1;

        // Fixpoint reached when no new facts
        if new_total == old_total {
            break;
        }
    }
    debug!("materialization reached fixpoint in {} iterations", iterations);

    let known: rustc_hash::FxHashSet<Fact> = facts.iter().copied().collect();
    let mut inferred: Vec<Fact> = relations
        .iter()
        .flat_map(|(&p, rel)| rel.pairs.iter().map(move |&(s, o)| Fact::new(p, s, o)))
        .filter(|f| !known.contains(f))
        .collect();
    inferred.sort_unstable();

    let mut result = facts.to_vec();
    result.extend(inferred);
    Ok(result)
}

fn resolve(head: &Atom, body: &[Atom], vocab: &Vocabulary) -> Result<Rule> {
    let binary = |atom: &Atom| -> Result<(u32, String, String)> {
        let p = vocab.predicate_index(&atom.predicate)?;
        match atom.arguments.as_slice() {
            [x, y] => Ok((p, x.clone(), y.clone())),
            _ => Err(crate::error::AdvError::Unsupported(format!(
                "materialization of non-binary atom {}",
                atom
            ))),
        }
    };
    Ok(Rule {
        head: binary(head)?,
        body: body.iter().map(binary).collect::<Result<_>>()?,
    })
}

/// Fold the body chain into one relation between its endpoint variables and
/// orient it like the head. Returns `None` when the body is not a chain or
/// references a relation with no facts.
fn apply_rule(rule: &Rule, relations: &FxHashMap<u32, SparseRelation>) -> Option<SparseRelation> {
    let (first, rest) = rule.body.split_first()?;
    let mut start = first.1.clone();
    let mut end = first.2.clone();
    let mut acc = relations.get(&first.0)?.clone();

    for (i, (p, x, y)) in rest.iter().enumerate() {
        let rel = relations.get(p)?;
        // The first atom may need flipping so that its end meets the next atom.
        if i == 0 && *x != end && *y != end && (*x == start || *y == start) {
            acc = acc.inverse();
            std::mem::swap(&mut start, &mut end);
        }
        if *x == end {
            acc = acc.compose(rel);
            end = y.clone();
        } else if *y == end {
            acc = acc.compose(&rel.inverse());
            end = x.clone();
        } else {
            return None;
        }
    }

    let (_, hx, hy) = &rule.head;
    if *hx == start && *hy == end {
        Some(acc)
    } else if *hx == end && *hy == start {
        Some(acc.inverse())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::Triple;
    use crate::syntax::parse_clauses;

    fn family() -> (Vocabulary, Vec<Fact>) {
        let triples = vec![
            Triple::new("ann", "parent", "bob"),
            Triple::new("bob", "parent", "cid"),
            Triple::new("cid", "parent", "dan"),
            Triple::new("ann", "grandparent", "cid"),
            Triple::new("bob", "child", "ann"),
        ];
        let vocab = Vocabulary::from_triples(&triples);
        let facts = vocab.facts(&triples).unwrap();
        (vocab, facts)
    }

    #[test]
    fn test_composition_and_inversion() {
        let (vocab, facts) = family();
        let clauses = parse_clauses(
            "grandparent(X, Z) :- parent(X, Y), parent(Y, Z)\nchild(Y, X) :- parent(X, Y)",
        )
        .unwrap();
        let all = materialize(&facts, &clauses, &vocab).unwrap();

        assert_eq!(&all[..facts.len()], &facts[..]);
        let gp = vocab.predicate_index("grandparent").unwrap();
        let child = vocab.predicate_index("child").unwrap();
        let e = |n: &str| vocab.entity_index(n).unwrap();
        assert!(all.contains(&Fact::new(gp, e("bob"), e("dan"))));
        assert!(all.contains(&Fact::new(child, e("dan"), e("cid"))));
        // 1 new grandparent + 2 new child facts
        assert_eq!(all.len(), facts.len() + 3);
    }

    #[test]
    fn test_equivalence_goes_both_ways() {
        let (vocab, facts) = family();
        let clauses = parse_clauses("child(X, Y) <-> parent(Y, X)").unwrap();
        let all = materialize(&facts, &clauses, &vocab).unwrap();
        // `child(bob, ann)` already mirrors `parent(ann, bob)`; two child facts are new.
        assert_eq!(all.len(), facts.len() + 2);
    }

    #[test]
    fn test_unknown_predicate_in_clause() {
        let (vocab, facts) = family();
        let clauses = parse_clauses("sibling(X, Y) :- parent(Z, X), parent(Z, Y)").unwrap();
        assert!(materialize(&facts, &clauses, &vocab).is_err());
    }
}
