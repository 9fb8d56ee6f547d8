//! Error types for gatecheck_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for harness operations.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// No free port could be reserved within the probe budget.
    #[error("no allocatable port after {attempts} probe attempts")]
    ResourceExhausted {
        /// Number of candidate ports probed
        attempts: u32,
    },

    /// A process did not reach its readiness predicate in time.
    #[error("process '{process}' not ready: {reason}")]
    NotReady {
        /// Name of the process
        process: String,
        /// Why readiness was not reached
        reason: String,
    },

    /// A command exited with a different code than declared.
    #[error("'{process}' returned {actual}, expected {expected}")]
    UnexpectedReturnCode {
        /// Name of the command
        process: String,
        /// Declared return code
        expected: i32,
        /// Observed return code (or signal description)
        actual: String,
    },

    /// One or more predicates failed.
    #[error("{failed} of {total} assertions failed")]
    AssertionMismatch {
        /// Number of failed predicates
        failed: usize,
        /// Number of evaluated predicates
        total: usize,
    },

    /// A process could not be stopped, even after a forced kill.
    #[error("failed to terminate '{process}': {reason}")]
    TeardownError {
        /// Name of the process
        process: String,
        /// Description of the failure
        reason: String,
    },

    /// The child process could not be spawned.
    #[error("failed to spawn '{process}': {source}")]
    Spawn {
        /// Name of the process
        process: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A literal or regex pattern is invalid.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Parser message
        reason: String,
    },

    /// Two processes were declared under the same name.
    #[error("process '{0}' declared twice")]
    DuplicateProcess(String),

    /// A step or process references an undeclared process.
    #[error("unknown process '{0}'")]
    UnknownProcess(String),

    /// Start-before declarations form a cycle.
    #[error("start-before cycle: {}", path.join(" -> "))]
    DependencyCycle {
        /// Process names along the cycle
        path: Vec<String>,
    },

    /// A bounded wait elapsed.
    #[error("'{process}' still running after {timeout_ms}ms")]
    Timeout {
        /// Name of the process
        process: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// The run was aborted (explicitly or by the run deadline).
    #[error("run aborted: {0}")]
    Aborted(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A command template references something that does not exist.
    #[error("template error in {template:?}: {reason}")]
    Template {
        /// The template text
        template: String,
        /// Description of the problem
        reason: String,
    },

    /// A fixture file is missing.
    #[error("fixture not found: {}", .0.display())]
    FixtureNotFound(PathBuf),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ResourceExhausted { .. } => Some(
                "Widen [ports] range in the harness config, or remove stale locks from the port lock directory.",
            ),
            Self::NotReady { .. } => Some(
                "Check the process output file in the kept run directory (--keep-run-dir), or raise [readiness] timeout_ms.",
            ),
            Self::DependencyCycle { .. } => {
                Some("Remove one of the start_before edges listed in the cycle.")
            }
            Self::UnknownProcess(_) => {
                Some("Declare the process in a [[process]] table before referencing it.")
            }
            Self::Spawn { .. } => Some("Make sure the program exists and is executable."),
            Self::Template { .. } => Some(
                "Placeholders are {port:NAME}, {dir:run|log|ssl|config|output|test} and {env:NAME}; use {{ and }} for literal braces.",
            ),
            _ => None,
        }
    }
}

/// Convenience Result type for gatecheck_core operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
