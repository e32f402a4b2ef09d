//! Abstract syntax for Horn clauses.

use std::fmt;

/// A predicate applied to logical variables.
/// Example: `parent(X, Y)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub predicate: String,
    pub arguments: Vec<String>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, arguments: &[&str]) -> Self {
        Self {
            predicate: predicate.into(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// How the head relates to the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    /// `head :- body1, body2, ...`: the body (a conjunction) implies the head.
    Implication,
    /// `a <-> b`: both atoms must agree; violations are measured symmetrically.
    Equivalence,
}

/// A weighted Horn clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<Atom>,
    pub kind: ClauseKind,
    pub weight: f64,
}

impl Clause {
    /// Distinct variable names in order of first appearance, head first.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for atom in std::iter::once(&self.head).chain(self.body.iter()) {
            for arg in &atom.arguments {
                if !names.contains(arg) {
                    names.push(arg.clone());
                }
            }
        }
        names
    }

    /// All atoms, head first.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        std::iter::once(&self.head).chain(self.body.iter())
    }

    /// True for a single-atom body whose arguments are the head's reversed,
    /// e.g. `p(X, Y) :- q(Y, X)`.
    pub fn is_inverse(&self) -> bool {
        match self.body.as_slice() {
            [body] if body.arguments.len() == 2 && self.head.arguments.len() == 2 => {
                body.arguments[0] == self.head.arguments[1]
                    && body.arguments[1] == self.head.arguments[0]
                    && body.arguments[0] != body.arguments[1]
            }
            _ => false,
        }
    }

    /// True for a single-atom body with the head's argument order.
    pub fn is_direct(&self) -> bool {
        matches!(self.body.as_slice(), [body] if body.arguments == self.head.arguments)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.predicate, self.arguments.join(", "))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body: Vec<String> = self.body.iter().map(|a| a.to_string()).collect();
        let connective = match self.kind {
            ClauseKind::Implication => ":-",
            ClauseKind::Equivalence => "<->",
        };
        write!(f, "{} {} {}", self.head, connective, body.join(", "))?;
        if self.weight != 1.0 {
            write!(f, " [{}]", self.weight)?;
        }
        Ok(())
    }
}
