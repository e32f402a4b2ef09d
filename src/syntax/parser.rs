//! Parser for Horn clauses.
//!
//! Grammar:
//!
//! ```text
//! clause  := atom (":-" | "<->") atoms weight? "."?
//! atoms   := atom ("," atom)*
//! atom    := IDENT "(" IDENT ("," IDENT)* ")"
//! weight  := "[" NUMBER "]"
//! ```

use super::ast::{Atom, Clause, ClauseKind};
use super::token::Token;
use crate::error::{AdvError, Result};
use logos::Logos;
use std::iter::Peekable;
use std::vec::IntoIter;

/// Parser state.
pub struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    /// Lex the input; unknown characters are reported instead of skipped.
    pub fn new(input: &str) -> std::result::Result<Self, String> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(input);
        while let Some(token) = lexer.next() {
            match token {
                Ok(t) => tokens.push(t),
                Err(_) => return Err(format!("Unexpected character sequence '{}'", lexer.slice())),
            }
        }
        Ok(Self {
            tokens: tokens.into_iter().peekable(),
        })
    }

    /// Peek at the next token without consuming it.
    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek()
    }

    /// Consume and return the next token.
    fn next(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    /// Expect a specific token, return error if not found.
    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(format!("Expected {}, got {}", expected, t)),
            None => Err(format!("Expected {}, got end of input", expected)),
        }
    }

    /// Parse an atom: `name(X, Y)`
    fn parse_atom(&mut self) -> std::result::Result<Atom, String> {
        let predicate = match self.next() {
            Some(Token::Ident(s)) => s,
            Some(t) => return Err(format!("Expected predicate name, got {}", t)),
            None => return Err("Expected predicate name".into()),
        };

        self.expect(Token::LParen)?;

        let mut arguments = Vec::new();
        loop {
            match self.next() {
                Some(Token::Ident(var)) => arguments.push(var),
                Some(t) => return Err(format!("Expected variable in {}(..), got {}", predicate, t)),
                None => return Err("Unexpected end of input in arguments".into()),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(t) => return Err(format!("Expected , or ) in {}(..), got {}", predicate, t)),
                None => return Err("Unexpected end of input in arguments".into()),
            }
        }

        Ok(Atom {
            predicate,
            arguments,
        })
    }

    /// Parse an optional `[weight]` suffix.
    fn parse_weight(&mut self) -> std::result::Result<f64, String> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(1.0);
        }
        self.next();
        let weight = match self.next() {
            Some(Token::Number(w)) => w,
            Some(t) => return Err(format!("Expected clause weight, got {}", t)),
            None => return Err("Expected clause weight".into()),
        };
        self.expect(Token::RBracket)?;
        Ok(weight)
    }

    /// Parse a full clause.
    pub fn parse_clause(&mut self) -> std::result::Result<Clause, String> {
        let head = self.parse_atom()?;

        let kind = match self.next() {
            Some(Token::Implies) => ClauseKind::Implication,
            Some(Token::Equiv) => ClauseKind::Equivalence,
            Some(t) => return Err(format!("Expected :- or <->, got {}", t)),
            None => return Err("Expected :- or <-> after clause head".into()),
        };

        let mut body = vec![self.parse_atom()?];
        while let Some(Token::Comma) = self.peek() {
            self.next();
            body.push(self.parse_atom()?);
        }

        if kind == ClauseKind::Equivalence && body.len() != 1 {
            return Err("An equivalence relates exactly two atoms".into());
        }

        let weight = self.parse_weight()?;

        if let Some(Token::Dot) = self.peek() {
            self.next();
        }
        if let Some(t) = self.next() {
            return Err(format!("Unexpected trailing token {}", t));
        }

        Ok(Clause {
            head,
            body,
            kind,
            weight,
        })
    }
}

/// Parse a single clause.
pub fn parse_clause(input: &str) -> Result<Clause> {
    Parser::new(input)
        .and_then(|mut p| p.parse_clause())
        .map_err(|message| AdvError::parse(input.trim(), message))
}

/// Parse one clause per line, skipping blank and comment-only lines.
pub fn parse_clauses(input: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') || trimmed.starts_with('#') {
            continue;
        }
        let clause = Parser::new(trimmed)
            .and_then(|mut p| p.parse_clause())
            .map_err(|message| AdvError::parse(format!("line {}", lineno + 1), message))?;
        clauses.push(clause);
    }
    Ok(clauses)
}
