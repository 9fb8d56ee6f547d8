//! Test step definitions.

use crate::assertion::Expectation;
use crate::golden::GoldenReference;
use crate::process::{ProcessSpec, DEFAULT_PROCESS};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Text an expectation is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The step's primary command output.
    Default,
    /// Captured output of a named process.
    Process(String),
    /// Contents of a file at evaluation time.
    File(PathBuf),
}

impl Target {
    /// Label used in outcome descriptions.
    pub fn label(&self) -> String {
        match self {
            Self::Default => format!("{}:", DEFAULT_PROCESS),
            Self::Process(name) => format!("{}:", name),
            Self::File(path) => format!("{}:", path.display()),
        }
    }
}

/// A check evaluated after the primary command completes.
#[derive(Debug, Clone)]
pub enum Check {
    /// Predicate over the target text.
    Expect {
        /// What to read.
        target: Target,
        /// What must hold.
        expectation: Expectation,
    },
    /// Whole-text comparison with a reference file.
    Golden {
        /// What to read.
        target: Target,
        /// Reference and filters.
        reference: GoldenReference,
    },
}

/// One ordered unit of a run.
#[derive(Debug, Clone)]
pub struct Step {
    /// Display name.
    pub name: String,
    /// Processes to have running before the command.
    pub start_before: Vec<String>,
    /// Primary command; steps may consist of checks only.
    pub command: Option<ProcessSpec>,
    /// Leave the command running past the step boundary.
    pub keep_running: bool,
    /// Checks evaluated after the command.
    pub checks: Vec<Check>,
    /// Processes that must still be alive when the step ends.
    pub still_running_after: Vec<String>,
    /// Overrides the configured step timeout.
    pub timeout: Option<Duration>,
}

impl Step {
    /// An empty step.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_before: Vec::new(),
            command: None,
            keep_running: false,
            checks: Vec::new(),
            still_running_after: Vec::new(),
            timeout: None,
        }
    }

    /// Requires `process` (and its own start-before processes) to be running.
    pub fn start_before(mut self, process: &str) -> Self {
        self.start_before.push(process.to_string());
        self
    }

    /// Sets the primary command.
    pub fn command(mut self, spec: ProcessSpec) -> Self {
        self.command = Some(spec);
        self
    }

    /// Sets the primary command to a `sh -c` script named `default`.
    pub fn shell(self, script: &str) -> Self {
        self.command(ProcessSpec::shell(DEFAULT_PROCESS, script))
    }

    /// Declares the primary command's expected exit code.
    pub fn return_code(mut self, code: i32) -> Self {
        if let Some(command) = self.command.take() {
            self.command = Some(command.return_code(code));
        }
        self
    }

    /// Keeps the primary command alive after the step.
    pub fn keep_running(mut self) -> Self {
        self.keep_running = true;
        self
    }

    /// Limits how long the primary command may run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an expectation on any target.
    pub fn expect(mut self, target: Target, expectation: Expectation) -> Self {
        self.checks.push(Check::Expect {
            target,
            expectation,
        });
        self
    }

    /// Adds an expectation on the primary command's output.
    pub fn expect_output(self, expectation: Expectation) -> Self {
        self.expect(Target::Default, expectation)
    }

    /// Adds an expectation on a file.
    pub fn expect_file(self, path: impl AsRef<Path>, expectation: Expectation) -> Self {
        self.expect(Target::File(path.as_ref().to_path_buf()), expectation)
    }

    /// Compares a target with a golden reference.
    pub fn golden(mut self, target: Target, reference: GoldenReference) -> Self {
        self.checks.push(Check::Golden { target, reference });
        self
    }

    /// Requires `process` to be alive when the step ends.
    pub fn still_running_after(mut self, process: &str) -> Self {
        self.still_running_after.push(process.to_string());
        self
    }

    /// Name the primary command will be registered under.
    pub fn command_name(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.name.as_str())
    }
}
