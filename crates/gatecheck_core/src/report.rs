//! Run and step verdicts.

use crate::assertion::AssertionOutcome;
use crate::error::HarnessError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Defined, not started.
    Pending,
    /// Steps executing.
    Running,
    /// Every step passed.
    Passed,
    /// A step failed and the run halted, or the run was aborted.
    Failed,
    /// Continue-on-fail was set and at least one step failed.
    PartiallyFailed,
    /// Host requirements were not met; nothing ran.
    Skipped,
}

impl RunState {
    /// True for states that end a run successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }

    /// True once the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Every check held.
    Passed,
    /// At least one failure was recorded.
    Failed,
    /// Not executed because an earlier step halted the run.
    Skipped,
}

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A process could not be spawned.
    Launch,
    /// A process did not become ready.
    NotReady,
    /// The primary command's exit code differs from the declared one.
    UnexpectedReturnCode,
    /// One or more predicates failed.
    AssertionMismatch,
    /// A process that had to stay alive is gone.
    ProcessExited,
    /// The primary command outlived the step timeout.
    Timeout,
    /// The run was aborted during the step.
    Aborted,
    /// Anything else (I/O while preparing the step).
    Other,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// Category.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
}

impl StepFailure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&HarnessError> for StepFailure {
    fn from(err: &HarnessError) -> Self {
        let kind = match err {
            HarnessError::Spawn { .. } => FailureKind::Launch,
            HarnessError::NotReady { .. } => FailureKind::NotReady,
            HarnessError::UnexpectedReturnCode { .. } => FailureKind::UnexpectedReturnCode,
            HarnessError::AssertionMismatch { .. } => FailureKind::AssertionMismatch,
            HarnessError::Timeout { .. } => FailureKind::Timeout,
            HarnessError::Aborted(_) => FailureKind::Aborted,
            _ => FailureKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Position in the run, starting at 1.
    pub index: usize,
    /// Step name.
    pub name: String,
    /// Verdict.
    pub status: StepStatus,
    /// Exit status of the primary command, when it ended.
    pub return_code: Option<String>,
    /// Every evaluated predicate.
    pub assertions: Vec<AssertionOutcome>,
    /// Everything that went wrong.
    pub failures: Vec<StepFailure>,
    /// Wall time spent on the step.
    pub duration_ms: u64,
}

impl StepReport {
    /// An empty, passing report.
    pub fn new(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            status: StepStatus::Passed,
            return_code: None,
            assertions: Vec::new(),
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A step that never ran.
    pub fn skipped(index: usize, name: &str) -> Self {
        Self {
            status: StepStatus::Skipped,
            ..Self::new(index, name)
        }
    }

    /// Records a failure.
    pub fn fail(&mut self, failure: StepFailure) {
        self.status = StepStatus::Failed;
        self.failures.push(failure);
    }

    /// Records assertion outcomes; failed ones add one `AssertionMismatch`.
    pub fn record_assertions(&mut self, outcomes: Vec<AssertionOutcome>) {
        let failed = outcomes.iter().filter(|o| !o.passed).count();
        let total = outcomes.len();
        self.assertions.extend(outcomes);
        if failed > 0 {
            self.fail(StepFailure::from(&HarnessError::AssertionMismatch {
                failed,
                total,
            }));
        }
    }

    /// True if the step failed.
    pub fn failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    /// True if the run was aborted during this step.
    pub fn aborted(&self) -> bool {
        self.failures.iter().any(|f| f.kind == FailureKind::Aborted)
    }
}

/// Verdict of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run name.
    pub name: String,
    /// Unique run id (absent for skipped runs).
    pub run_id: Option<String>,
    /// Final state.
    pub state: RunState,
    /// Why the run was skipped.
    pub skip_reason: Option<String>,
    /// Why the run was aborted.
    pub abort_reason: Option<String>,
    /// Per-step results, in declaration order.
    pub steps: Vec<StepReport>,
    /// Declared processes that exited on their own with an unexpected code.
    pub process_failures: Vec<StepFailure>,
    /// Problems met while tearing down; they do not change `state`.
    pub teardown_errors: Vec<String>,
    /// Named port reservations.
    pub ports: BTreeMap<String, u16>,
    /// Run directory, when it was kept.
    pub run_dir: Option<PathBuf>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl RunReport {
    /// Report for a run that was never started.
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            run_id: None,
            state: RunState::Skipped,
            skip_reason: Some(reason.to_string()),
            abort_reason: None,
            steps: Vec::new(),
            process_failures: Vec::new(),
            teardown_errors: Vec::new(),
            ports: BTreeMap::new(),
            run_dir: None,
            duration_ms: 0,
        }
    }

    /// True for `Passed` and `Skipped`.
    pub fn success(&self) -> bool {
        self.state.is_success()
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    /// Steps that failed.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.failed())
    }

    /// Finds a step by name.
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.name, self.state)?;
        if let Some(reason) = &self.skip_reason {
            writeln!(f, "  skipped: {}", reason)?;
        }
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "  aborted: {}", reason)?;
        }
        for step in &self.steps {
            let mark = match step.status {
                StepStatus::Passed => "ok",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "skip",
            };
            writeln!(f, "  [{}] {}. {}", mark, step.index, step.name)?;
            for outcome in step.assertions.iter().filter(|o| !o.passed) {
                writeln!(f, "      {} ({})", outcome.description, outcome.rationale)?;
                if let Some(detail) = &outcome.detail {
                    writeln!(f, "        {}", detail)?;
                }
            }
            for failure in &step.failures {
                if failure.kind != FailureKind::AssertionMismatch {
                    writeln!(f, "      {}", failure.message)?;
                }
            }
        }
        for failure in &self.process_failures {
            writeln!(f, "  process: {}", failure.message)?;
        }
        for err in &self.teardown_errors {
            writeln!(f, "  teardown: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(passed: bool) -> AssertionOutcome {
        AssertionOutcome {
            description: "default: excludes \"RST_STREAM\"".into(),
            rationale: "stream must not be reset".into(),
            passed,
            detail: (!passed).then(|| "found at line 12: [RST_STREAM]".to_string()),
        }
    }

    #[test]
    fn test_record_assertions() {
        let mut step = StepReport::new(1, "h2 get");
        step.record_assertions(vec![outcome(true), outcome(true)]);
        assert_eq!(step.status, StepStatus::Passed);

        step.record_assertions(vec![outcome(false)]);
        assert!(step.failed());
        assert_eq!(step.assertions.len(), 3);
        assert_eq!(step.failures[0].kind, FailureKind::AssertionMismatch);
        assert_eq!(step.failures[0].message, "1 of 1 assertions failed");
    }

    #[test]
    fn test_failure_from_error() {
        let err = HarnessError::NotReady {
            process: "ts".into(),
            reason: "no port".into(),
        };
        let failure = StepFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::NotReady);
        assert!(failure.message.contains("'ts'"));
    }

    #[test]
    fn test_exit_codes_and_json() {
        let skipped = RunReport::skipped("chunked", "requires nghttp");
        assert!(skipped.success());
        assert_eq!(skipped.exit_code(), 0);

        let mut failed = RunReport::skipped("chunked", "x");
        failed.state = RunState::PartiallyFailed;
        assert_eq!(failed.exit_code(), 1);

        let json = skipped.to_json().unwrap();
        assert!(json.contains("\"state\": \"skipped\""));
    }

    #[test]
    fn test_display_names_failed_assertion() {
        let mut step = StepReport::new(1, "h2 get");
        step.record_assertions(vec![outcome(false)]);
        let mut report = RunReport::skipped("chunked", "x");
        report.skip_reason = None;
        report.state = RunState::Failed;
        report.steps.push(step);

        let text = report.to_string();
        assert!(text.starts_with("chunked: failed\n"));
        assert!(text.contains("[FAIL] 1. h2 get"));
        assert!(text.contains("stream must not be reset"));
        assert!(text.contains("found at line 12"));
    }
}
