//! Token definitions for the clause language.
//!
//! Uses the `logos` crate for fast lexing.

use logos::Logos;

/// Tokens for Horn clauses such as `grandparent(X, Z) :- parent(X, Y), parent(Y, Z)`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]  // Skip whitespace
#[logos(skip r"%[^\n]*")]     // Prolog-style comments
#[logos(skip r"#[^\n]*")]     // Shell-style comments
pub enum Token {
    // Brackets
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Connectives
    #[token(":-")]
    Implies,
    #[token("<->")]
    Equiv,

    // Predicate names and logical variables. Freebase-style names such as
    // `/people/person/nationality` are accepted as-is.
    #[regex(r"[A-Za-z_/][A-Za-z0-9_/.\-]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Clause weights
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Implies => write!(f, ":-"),
            Token::Equiv => write!(f, "<->"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Number(n) => write!(f, "{}", n),
        }
    }
}
