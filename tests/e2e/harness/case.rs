use super::assertions::Assertion;
use super::workspace::{fixture_dir, TestWorkspace};
use anyhow::{bail, Context, Result};
use gatecheck_core::{
    FailureKind, RunReport, RunState, Scenario, SkipDecision, StepStatus,
};
use std::path::PathBuf;

enum Source {
    Fixture { dir: String, file: String },
    Inline { text: String, test_dir: PathBuf },
}

/// Fluent DSL for running a scenario file and checking its report
pub struct Case {
    name: String,
    source: Option<Source>,
    env: Vec<(String, String)>,
    keep_run_dir: bool,
    expect_clean_run_root: bool,
    assertions: Vec<Assertion>,
}

impl Case {
    /// Create a new case with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            env: Vec::new(),
            keep_run_dir: false,
            expect_clean_run_root: false,
            assertions: Vec::new(),
        }
    }

    // ===== Source =====

    /// Load a scenario file from a fixture directory
    pub fn fixture(mut self, dir: &str, file: &str) -> Self {
        self.source = Some(Source::Fixture {
            dir: dir.to_string(),
            file: file.to_string(),
        });
        self
    }

    /// Use inline scenario text; relative paths resolve against `test_dir`
    pub fn inline(mut self, text: &str, test_dir: impl Into<PathBuf>) -> Self {
        self.source = Some(Source::Inline {
            text: text.to_string(),
            test_dir: test_dir.into(),
        });
        self
    }

    // ===== Run options =====

    /// Add a run-wide environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Keep the run directory after the run
    pub fn keep_run_dir(mut self) -> Self {
        self.keep_run_dir = true;
        self
    }

    // ===== Assertions =====

    /// Assert the final run state
    pub fn assert_state(mut self, state: RunState) -> Self {
        self.assertions.push(Assertion::State(state));
        self
    }

    /// Assert the run passed or was skipped
    pub fn assert_success(mut self) -> Self {
        self.assertions.push(Assertion::Success);
        self
    }

    /// Assert a step's status
    pub fn assert_step(mut self, step: &str, status: StepStatus) -> Self {
        self.assertions.push(Assertion::StepStatus {
            step: step.to_string(),
            status,
        });
        self
    }

    /// Assert a step recorded a failure of this kind
    pub fn assert_failure(mut self, step: &str, kind: FailureKind) -> Self {
        self.assertions.push(Assertion::StepFailure {
            step: step.to_string(),
            kind,
        });
        self
    }

    /// Assert how many predicates of a step failed
    pub fn assert_failed_predicates(mut self, step: &str, count: usize) -> Self {
        self.assertions.push(Assertion::FailedPredicates {
            step: step.to_string(),
            count,
        });
        self
    }

    /// Assert a predicate whose description contains `description` failed
    pub fn assert_predicate_failed(mut self, step: &str, description: &str) -> Self {
        self.assertions.push(Assertion::PredicateFailed {
            step: step.to_string(),
            description: description.to_string(),
        });
        self
    }

    /// Assert a predicate whose description contains `description` held
    pub fn assert_predicate_passed(mut self, step: &str, description: &str) -> Self {
        self.assertions.push(Assertion::PredicatePassed {
            step: step.to_string(),
            description: description.to_string(),
        });
        self
    }

    /// Assert the skip reason mentions `text`
    pub fn assert_skip_reason(mut self, text: &str) -> Self {
        self.assertions
            .push(Assertion::SkipReasonContains(text.to_string()));
        self
    }

    /// Assert how many declared processes exited with the wrong code
    pub fn assert_process_failures(mut self, count: usize) -> Self {
        self.assertions.push(Assertion::ProcessFailures(count));
        self
    }

    /// Assert teardown went cleanly
    pub fn assert_clean_teardown(mut self) -> Self {
        self.assertions.push(Assertion::NoTeardownErrors);
        self
    }

    /// Assert nothing is left under the run root afterwards
    pub fn assert_run_dir_removed(mut self) -> Self {
        self.expect_clean_run_root = true;
        self
    }

    /// Add a custom assertion
    pub fn assert_that<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunReport) -> Result<()> + Send + Sync + 'static,
    {
        self.assertions.push(Assertion::Custom(Box::new(f)));
        self
    }

    // ===== Execution =====

    /// Load, gate, build and run the scenario, then check every assertion
    pub fn run(self) -> Result<RunReport> {
        let scenario = match &self.source {
            Some(Source::Fixture { dir, file }) => {
                let path = fixture_dir(dir).join(file);
                Scenario::load(&path).with_context(|| format!("loading {}", path.display()))?
            }
            Some(Source::Inline { text, test_dir }) => Scenario::from_toml(text, test_dir)?,
            None => bail!("case '{}' has no scenario source", self.name),
        };

        let workspace = TestWorkspace::empty()?;
        let report = match scenario.skip_decision() {
            SkipDecision::Skip { reason } => RunReport::skipped(&scenario.name, &reason),
            SkipDecision::Run => {
                let mut run = scenario
                    .build(workspace.config())
                    .with_context(|| format!("building scenario '{}'", scenario.name))?;
                for (key, value) in &self.env {
                    run.env(key, value.as_str());
                }
                run.keep_run_dir(self.keep_run_dir);
                run.run()?
            }
        };

        for assertion in &self.assertions {
            assertion
                .check(&report)
                .with_context(|| format!("case '{}': {:?}", self.name, assertion))?;
        }
        if self.expect_clean_run_root {
            let leftovers = workspace.leftover_runs()?;
            if !leftovers.is_empty() {
                bail!("case '{}': run directories left behind: {:?}", self.name, leftovers);
            }
        }
        Ok(report)
    }
}
