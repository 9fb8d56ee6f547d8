//! Golden reference comparison.

use crate::assertion::AssertionOutcome;
use crate::error::{HarnessError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Drops lines from the actual text before comparing.
#[derive(Debug, Clone)]
pub enum LineFilter {
    /// Drop lines containing this text.
    Containing(String),
    /// Drop lines matching this regex.
    Matching(Regex),
}

impl LineFilter {
    /// Compiles a regex filter.
    pub fn matching(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Matching)
            .map_err(|e| HarnessError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn drops(&self, line: &str) -> bool {
        match self {
            Self::Containing(text) => line.contains(text.as_str()),
            Self::Matching(re) => re.is_match(line),
        }
    }
}

/// Expected text stored in a reference file.
#[derive(Debug, Clone)]
pub struct GoldenReference {
    reference: PathBuf,
    filters: Vec<LineFilter>,
    rationale: String,
}

impl GoldenReference {
    /// Compares against the contents of `reference`.
    pub fn new(reference: impl AsRef<Path>, rationale: &str) -> Self {
        Self {
            reference: reference.as_ref().to_path_buf(),
            filters: Vec::new(),
            rationale: rationale.to_string(),
        }
    }

    /// Adds a filter applied to the actual text.
    pub fn filter(mut self, filter: LineFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Path of the reference file.
    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Why the comparison must hold.
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Compares `actual` with the reference file.
    pub fn evaluate(&self, actual: &str) -> AssertionOutcome {
        let description = format!("matches golden {}", self.reference.display());
        match fs::read_to_string(&self.reference) {
            Ok(expected) => {
                let filtered = apply_filters(actual, &self.filters);
                let detail = first_difference(&filtered, &expected);
                AssertionOutcome {
                    description,
                    rationale: self.rationale.clone(),
                    passed: detail.is_none(),
                    detail,
                }
            }
            Err(e) => AssertionOutcome::unavailable(
                description,
                &self.rationale,
                format!("cannot read reference: {}", e),
            ),
        }
    }
}

/// Removes filtered lines, keeping line endings of the survivors.
pub fn apply_filters(text: &str, filters: &[LineFilter]) -> String {
    if filters.is_empty() {
        return text.to_string();
    }
    text.split_inclusive('\n')
        .filter(|line| {
            let bare = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            !filters.iter().any(|f| f.drops(bare))
        })
        .collect()
}

/// Line-wise comparison; `None` when equal up to a trailing newline.
pub fn first_difference(actual: &str, expected: &str) -> Option<String> {
    let actual_lines: Vec<&str> = actual.lines().collect();
    let expected_lines: Vec<&str> = expected.lines().collect();

    for (i, (a, e)) in actual_lines.iter().zip(&expected_lines).enumerate() {
        if a != e {
            return Some(format!(
                "line {}: expected {:?}, got {:?}",
                i + 1,
                e,
                a
            ));
        }
    }

    match actual_lines.len().cmp(&expected_lines.len()) {
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Less => Some(format!(
            "line {}: expected {:?}, got end of text",
            actual_lines.len() + 1,
            expected_lines[actual_lines.len()]
        )),
        std::cmp::Ordering::Greater => Some(format!(
            "line {}: unexpected extra line {:?}",
            expected_lines.len() + 1,
            actual_lines[expected_lines.len()]
        )),
    }
}
