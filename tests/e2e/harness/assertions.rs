use anyhow::{bail, Context, Result};
use gatecheck_core::{FailureKind, RunReport, RunState, StepStatus};

/// Declarative assertions on a run report
pub enum Assertion {
    // Run verdict
    State(RunState),
    Success,
    SkipReasonContains(String),
    AbortReasonContains(String),

    // Steps
    StepStatus {
        step: String,
        status: StepStatus,
    },
    StepFailure {
        step: String,
        kind: FailureKind,
    },
    FailedPredicates {
        step: String,
        count: usize,
    },
    PredicateFailed {
        step: String,
        description: String,
    },
    PredicatePassed {
        step: String,
        description: String,
    },

    // Declared processes
    ProcessFailures(usize),

    // Teardown
    NoTeardownErrors,

    // Custom
    Custom(Box<dyn Fn(&RunReport) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State(s) => write!(f, "State({:?})", s),
            Self::Success => write!(f, "Success"),
            Self::SkipReasonContains(s) => write!(f, "SkipReasonContains({:?})", s),
            Self::AbortReasonContains(s) => write!(f, "AbortReasonContains({:?})", s),
            Self::StepStatus { step, status } => {
                write!(f, "StepStatus {{ step: {:?}, status: {:?} }}", step, status)
            }
            Self::StepFailure { step, kind } => {
                write!(f, "StepFailure {{ step: {:?}, kind: {:?} }}", step, kind)
            }
            Self::FailedPredicates { step, count } => {
                write!(f, "FailedPredicates {{ step: {:?}, count: {} }}", step, count)
            }
            Self::PredicateFailed { step, description } => write!(
                f,
                "PredicateFailed {{ step: {:?}, description: {:?} }}",
                step, description
            ),
            Self::PredicatePassed { step, description } => write!(
                f,
                "PredicatePassed {{ step: {:?}, description: {:?} }}",
                step, description
            ),
            Self::ProcessFailures(n) => write!(f, "ProcessFailures({})", n),
            Self::NoTeardownErrors => write!(f, "NoTeardownErrors"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl Assertion {
    /// Check the assertion against a finished run
    pub fn check(&self, report: &RunReport) -> Result<()> {
        match self {
            Self::State(expected) => {
                if report.state != *expected {
                    bail!("expected state {}, got {}\n{}", expected, report.state, report);
                }
            }
            Self::Success => {
                if !report.success() {
                    bail!("expected a successful run\n{}", report);
                }
            }
            Self::SkipReasonContains(text) => {
                let reason = report.skip_reason.as_deref().unwrap_or_default();
                if !reason.contains(text.as_str()) {
                    bail!("skip reason {:?} does not mention {:?}", reason, text);
                }
            }
            Self::AbortReasonContains(text) => {
                let reason = report.abort_reason.as_deref().unwrap_or_default();
                if !reason.contains(text.as_str()) {
                    bail!("abort reason {:?} does not mention {:?}", reason, text);
                }
            }
            Self::StepStatus { step, status } => {
                let found = find_step(report, step)?;
                if found.status != *status {
                    bail!(
                        "step '{}' is {:?}, expected {:?}\n{}",
                        step,
                        found.status,
                        status,
                        report
                    );
                }
            }
            Self::StepFailure { step, kind } => {
                let found = find_step(report, step)?;
                if !found.failures.iter().any(|f| f.kind == *kind) {
                    bail!("step '{}' has no {:?} failure: {:?}", step, kind, found.failures);
                }
            }
            Self::FailedPredicates { step, count } => {
                let found = find_step(report, step)?;
                let failed = found.assertions.iter().filter(|o| !o.passed).count();
                if failed != *count {
                    bail!(
                        "step '{}' has {} failed predicate(s), expected {}: {:?}",
                        step,
                        failed,
                        count,
                        found.assertions
                    );
                }
            }
            Self::PredicateFailed { step, description } => {
                let found = find_step(report, step)?;
                if !found
                    .assertions
                    .iter()
                    .any(|o| !o.passed && o.description.contains(description.as_str()))
                {
                    bail!(
                        "step '{}' has no failed predicate matching {:?}: {:?}",
                        step,
                        description,
                        found.assertions
                    );
                }
            }
            Self::PredicatePassed { step, description } => {
                let found = find_step(report, step)?;
                if !found
                    .assertions
                    .iter()
                    .any(|o| o.passed && o.description.contains(description.as_str()))
                {
                    bail!(
                        "step '{}' has no passed predicate matching {:?}: {:?}",
                        step,
                        description,
                        found.assertions
                    );
                }
            }
            Self::ProcessFailures(count) => {
                if report.process_failures.len() != *count {
                    bail!(
                        "expected {} process failure(s), got {:?}",
                        count,
                        report.process_failures
                    );
                }
            }
            Self::NoTeardownErrors => {
                if !report.teardown_errors.is_empty() {
                    bail!("teardown errors: {:?}", report.teardown_errors);
                }
            }
            Self::Custom(f) => f(report)?,
        }
        Ok(())
    }
}

fn find_step<'a>(report: &'a RunReport, name: &str) -> Result<&'a gatecheck_core::StepReport> {
    report
        .step(name)
        .with_context(|| format!("no step named '{}' in report\n{}", name, report))
}
