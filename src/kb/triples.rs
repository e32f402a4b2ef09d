//! Tab-separated triple files.

use crate::error::{AdvError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A `(subject, predicate, object)` row as it appears on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
        }
    }
}

/// Parse triples from text in `s\tp\to` format.
///
/// An optional fourth column labels the row: `1`/`+` positive (default),
/// `0`/`-` negative. Returns `(positives, negatives)`.
pub fn parse_triples(text: &str) -> Result<(Vec<Triple>, Vec<Triple>)> {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
        let triple = match parts.as_slice() {
            [s, p, o] | [s, p, o, _] => Triple::new(s, p, o),
            _ => {
                return Err(AdvError::parse(
                    format!("line {}", lineno + 1),
                    format!("expected 3 or 4 tab-separated columns, got {}", parts.len()),
                ))
            }
        };

        match parts.get(3).copied() {
            None | Some("1") | Some("+") => positives.push(triple),
            Some("0") | Some("-") => negatives.push(triple),
            Some(label) => {
                return Err(AdvError::parse(
                    format!("line {}", lineno + 1),
                    format!("unknown label '{}'", label),
                ))
            }
        }
    }

    Ok((positives, negatives))
}

/// Load triples from a TSV file: `head\trelation\ttail[\tlabel]`
pub fn read_triples(path: impl AsRef<Path>) -> Result<(Vec<Triple>, Vec<Triple>)> {
    let mut text = String::new();
    for line in BufReader::new(File::open(path.as_ref())?).lines() {
        text.push_str(&line?);
        text.push('\n');
    }
    parse_triples(&text).map_err(|e| match e {
        AdvError::Parse { location, message } => AdvError::Parse {
            location: format!("{}:{}", path.as_ref().display(), location),
            message,
        },
        other => other,
    })
}
