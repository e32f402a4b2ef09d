//! Clauses resolved against a vocabulary.

use crate::error::{AdvError, Result};
use crate::kb::Vocabulary;
use crate::syntax::{Atom, Clause, ClauseKind};

/// A binary atom whose predicate is an index and whose arguments are
/// positions into the clause's variable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAtom {
    pub predicate: u32,
    pub subject: usize,
    pub object: usize,
}

/// A clause ready for scoring: predicates resolved, variables numbered.
#[derive(Debug, Clone)]
pub struct BoundClause {
    pub clause: Clause,
    /// Distinct variable names, head first
    pub variables: Vec<String>,
    pub head: BoundAtom,
    pub body: Vec<BoundAtom>,
}

impl BoundClause {
    pub fn bind(clause: &Clause, vocab: &Vocabulary) -> Result<Self> {
        let variables = clause.variable_names();
        let bind_atom = |atom: &Atom| -> Result<BoundAtom> {
            let [subject, object] = atom.arguments.as_slice() else {
                return Err(AdvError::Config(format!(
                    "atom {atom} in clause {clause} is not binary"
                )));
            };
            let position = |name: &String| variables.iter().position(|v| v == name).unwrap_or(0);
            Ok(BoundAtom {
                predicate: vocab.predicate_index(&atom.predicate)?,
                subject: position(subject),
                object: position(object),
            })
        };

        let head = bind_atom(&clause.head)?;
        let body = clause.body.iter().map(bind_atom).collect::<Result<Vec<_>>>()?;
        if body.is_empty() {
            return Err(AdvError::Config(format!("clause {clause} has an empty body")));
        }
        Ok(Self {
            clause: clause.clone(),
            variables,
            head,
            body,
        })
    }

    pub fn bind_all(clauses: &[Clause], vocab: &Vocabulary) -> Result<Vec<Self>> {
        clauses.iter().map(|c| Self::bind(c, vocab)).collect()
    }

    pub fn kind(&self) -> ClauseKind {
        self.clause.kind
    }

    pub fn weight(&self) -> f64 {
        self.clause.weight
    }
}
