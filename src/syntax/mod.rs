//! Syntax module: lexer, parser, and AST for Horn clauses.

pub mod ast;
mod parser;
mod token;

pub use ast::{Atom, Clause, ClauseKind};
pub use parser::{parse_clause, parse_clauses, Parser};
pub use token::Token;
