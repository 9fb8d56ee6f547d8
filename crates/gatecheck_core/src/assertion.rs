//! Stream assertion engine.
//!
//! Predicates run against the full text captured at evaluation time. Several
//! expectations on the same target compose as a logical AND, but each one is
//! reported on its own so a failure names exactly which expectation broke.

use crate::error::{HarnessError, Result};
use regex::Regex;
use serde::Serialize;

/// Text to look for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Plain substring.
    Literal(String),
    /// Regular expression.
    Regex(Regex),
}

impl Pattern {
    /// Compiles a regular expression.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| HarnessError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Byte offsets of every non-overlapping match.
    fn match_offsets(&self, text: &str) -> Vec<usize> {
        match self {
            Self::Literal(needle) if needle.is_empty() => vec![0],
            Self::Literal(needle) => text.match_indices(needle.as_str()).map(|(i, _)| i).collect(),
            Self::Regex(re) => re.find_iter(text).map(|m| m.start()).collect(),
        }
    }

    /// Source text of the pattern.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(s) => s,
            Self::Regex(re) => re.as_str(),
        }
    }
}

/// Predicate over a block of text.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// At least one match.
    Contains(Pattern),
    /// No match at all.
    Excludes(Pattern),
    /// Exactly `times` matches.
    Occurs {
        /// What to count.
        pattern: Pattern,
        /// Required number of matches.
        times: usize,
    },
}

impl Predicate {
    /// Short human description, e.g. `contains "HTTP/2 200"`.
    pub fn describe(&self) -> String {
        match self {
            Self::Contains(p) => format!("contains {:?}", p.as_str()),
            Self::Excludes(p) => format!("excludes {:?}", p.as_str()),
            Self::Occurs { pattern, times } => {
                format!("contains {:?} exactly {} time(s)", pattern.as_str(), times)
            }
        }
    }
}

/// A predicate plus the human rationale shown when it fails.
#[derive(Debug, Clone)]
pub struct Expectation {
    /// The check itself.
    pub predicate: Predicate,
    /// Why it must hold.
    pub rationale: String,
}

impl Expectation {
    /// Output must contain `text` literally.
    pub fn contains(text: &str, rationale: &str) -> Self {
        Self {
            predicate: Predicate::Contains(Pattern::Literal(text.to_string())),
            rationale: rationale.to_string(),
        }
    }

    /// Output must not contain `text` literally.
    pub fn excludes(text: &str, rationale: &str) -> Self {
        Self {
            predicate: Predicate::Excludes(Pattern::Literal(text.to_string())),
            rationale: rationale.to_string(),
        }
    }

    /// Output must match regex `pattern`.
    pub fn contains_expr(pattern: &str, rationale: &str) -> Result<Self> {
        Ok(Self {
            predicate: Predicate::Contains(Pattern::regex(pattern)?),
            rationale: rationale.to_string(),
        })
    }

    /// Output must not match regex `pattern`.
    pub fn excludes_expr(pattern: &str, rationale: &str) -> Result<Self> {
        Ok(Self {
            predicate: Predicate::Excludes(Pattern::regex(pattern)?),
            rationale: rationale.to_string(),
        })
    }

    /// Output must contain `text` literally exactly `times` times.
    pub fn occurs(text: &str, times: usize, rationale: &str) -> Self {
        Self {
            predicate: Predicate::Occurs {
                pattern: Pattern::Literal(text.to_string()),
                times,
            },
            rationale: rationale.to_string(),
        }
    }
}

/// Result of one predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionOutcome {
    /// What was checked, including the target.
    pub description: String,
    /// Rationale supplied with the expectation.
    pub rationale: String,
    /// Whether it held.
    pub passed: bool,
    /// Evidence for a failure.
    pub detail: Option<String>,
}

impl AssertionOutcome {
    /// A failed outcome that never got to look at text (missing file, etc).
    pub fn unavailable(description: String, rationale: &str, detail: String) -> Self {
        Self {
            description,
            rationale: rationale.to_string(),
            passed: false,
            detail: Some(detail),
        }
    }

    /// Prefixes the description with the target it ran against.
    pub fn on(mut self, target: &str) -> Self {
        self.description = format!("{} {}", target, self.description);
        self
    }
}

/// Evaluates one expectation against `text`.
pub fn evaluate(text: &str, expectation: &Expectation) -> AssertionOutcome {
    let predicate = &expectation.predicate;
    let (passed, detail) = match predicate {
        Predicate::Contains(pattern) => {
            if pattern.match_offsets(text).is_empty() {
                (
                    false,
                    Some(format!("no match in {} bytes of text", text.len())),
                )
            } else {
                (true, None)
            }
        }
        Predicate::Excludes(pattern) => match pattern.match_offsets(text).first() {
            Some(&offset) => {
                let (line_no, line) = line_at(text, offset);
                (false, Some(format!("found at line {}: {}", line_no, line)))
            }
            None => (true, None),
        },
        Predicate::Occurs { pattern, times } => {
            let found = pattern.match_offsets(text).len();
            if found == *times {
                (true, None)
            } else {
                (false, Some(format!("found {} time(s)", found)))
            }
        }
    };

    AssertionOutcome {
        description: predicate.describe(),
        rationale: expectation.rationale.clone(),
        passed,
        detail,
    }
}

/// Evaluates every expectation; the slice passes only if all outcomes pass.
pub fn evaluate_all(text: &str, expectations: &[Expectation]) -> Vec<AssertionOutcome> {
    expectations.iter().map(|e| evaluate(text, e)).collect()
}

/// 1-based line number and content of the line holding byte `offset`.
fn line_at(text: &str, offset: usize) -> (usize, &str) {
    let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(text.len());
    let line_no = text[..offset].matches('\n').count() + 1;
    (line_no, text[start..end].trim_end_matches('\r'))
}
