//! Host capability checks that decide whether a run happens at all.
//!
//! Conditions are evaluated once, before any run is constructed, and never
//! interleave with orchestration.

use serde::{Deserialize, Serialize};
use std::process::Command;

/// A single host capability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCondition {
    /// A program is on `PATH`.
    HasProgram {
        /// Program name.
        program: String,
        /// Shown when the program is missing.
        #[serde(default)]
        reason: Option<String>,
    },
    /// `curl --version` lists a feature (e.g. `HTTP2`).
    CurlFeature {
        /// Feature name, case-insensitive.
        feature: String,
    },
    /// An environment variable is set and non-empty.
    EnvSet {
        /// Variable name.
        var: String,
    },
    /// An environment variable is unset or empty.
    EnvUnset {
        /// Variable name.
        var: String,
    },
}

impl SkipCondition {
    /// Requires `program` on `PATH`.
    pub fn program(program: &str, reason: &str) -> Self {
        Self::HasProgram {
            program: program.to_string(),
            reason: Some(reason.to_string()),
        }
    }

    /// Requires a curl feature.
    pub fn curl_feature(feature: &str) -> Self {
        Self::CurlFeature {
            feature: feature.to_string(),
        }
    }

    /// Requires an environment variable.
    pub fn env_set(var: &str) -> Self {
        Self::EnvSet {
            var: var.to_string(),
        }
    }

    /// Probes the host. Returns whether the condition holds and a description.
    pub fn holds(&self) -> (bool, String) {
        match self {
            Self::HasProgram { program, reason } => {
                let found = which::which(program).is_ok();
                let text = reason
                    .clone()
                    .unwrap_or_else(|| format!("program '{}' on PATH", program));
                (found, text)
            }
            Self::CurlFeature { feature } => (
                curl_has_feature(feature),
                format!("curl built with feature '{}'", feature),
            ),
            Self::EnvSet { var } => (
                env_present(var),
                format!("environment variable {} set", var),
            ),
            Self::EnvUnset { var } => (
                !env_present(var),
                format!("environment variable {} unset", var),
            ),
        }
    }
}

/// Outcome of evaluating requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum SkipDecision {
    /// Every requirement holds.
    Run,
    /// At least one requirement failed.
    Skip {
        /// Human-readable reason.
        reason: String,
    },
}

/// Set of skip-unless and skip-if conditions.
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    unless: Vec<SkipCondition>,
    when: Vec<SkipCondition>,
}

impl Requirements {
    /// No requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip unless `condition` holds.
    pub fn skip_unless(mut self, condition: SkipCondition) -> Self {
        self.unless.push(condition);
        self
    }

    /// Skip if `condition` holds.
    pub fn skip_if(mut self, condition: SkipCondition) -> Self {
        self.when.push(condition);
        self
    }

    /// True if no condition was added.
    pub fn is_empty(&self) -> bool {
        self.unless.is_empty() && self.when.is_empty()
    }

    /// Probes every condition and reports whether each one lets the run go.
    pub fn survey(&self) -> Vec<(String, bool)> {
        let unless = self.unless.iter().map(|c| {
            let (holds, text) = c.holds();
            (format!("requires {}", text), holds)
        });
        let when = self.when.iter().map(|c| {
            let (holds, text) = c.holds();
            (format!("skips if {}", text), !holds)
        });
        unless.chain(when).collect()
    }

    /// Evaluates every condition; the first failure decides the reason.
    pub fn evaluate(&self) -> SkipDecision {
        for condition in &self.unless {
            let (holds, text) = condition.holds();
            if !holds {
                return SkipDecision::Skip {
                    reason: format!("requires {}", text),
                };
            }
        }
        for condition in &self.when {
            let (holds, text) = condition.holds();
            if holds {
                return SkipDecision::Skip {
                    reason: format!("skipped because {}", text),
                };
            }
        }
        SkipDecision::Run
    }
}

fn env_present(var: &str) -> bool {
    std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

fn curl_has_feature(feature: &str) -> bool {
    let output = match Command::new("curl").arg("--version").output() {
        Ok(output) if output.status.success() => output,
        _ => return false,
    };
    parse_curl_features(&String::from_utf8_lossy(&output.stdout))
        .iter()
        .any(|f| f.eq_ignore_ascii_case(feature))
}

/// Extracts the `Features:` list from `curl --version` output.
fn parse_curl_features(version: &str) -> Vec<String> {
    version
        .lines()
        .find_map(|line| line.strip_prefix("Features:"))
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
