//! Run controller: executes validated steps and guarantees teardown.
//!
//! The controller owns every live process and every port reservation of a
//! run. Whatever way `run` exits, including a panic unwinding through it,
//! the process table and the allocator are dropped and clean up after
//! themselves.

use crate::assertion::{evaluate, AssertionOutcome};
use crate::cancel::{AbortHandle, Deadline};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::output::CapturedOutput;
use crate::ports::PortAllocator;
use crate::process::{launch, LaunchContext, ProcessHandle, ProcessSpec};
use crate::report::{FailureKind, RunReport, RunState, StepFailure, StepReport};
use crate::schedule::Schedule;
use crate::step::{Check, Step, Target};
use crate::workspace::RunWorkspace;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Live processes in launch order.
struct ProcessTable {
    handles: Vec<ProcessHandle>,
    grace: Duration,
}

impl ProcessTable {
    fn get(&self, name: &str) -> Option<&ProcessHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut ProcessHandle> {
        self.handles.iter_mut().find(|h| h.name() == name)
    }

    fn insert(&mut self, handle: ProcessHandle) {
        self.handles.push(handle);
    }

    /// Terminates everything in reverse launch order and collects errors.
    fn terminate_all(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(mut handle) = self.handles.pop() {
            match handle.terminate(self.grace) {
                Ok(how) => debug!(process = %handle.name(), ?how, "Process stopped"),
                Err(e) => {
                    warn!(process = %handle.name(), "{}", e);
                    errors.push(e.to_string());
                }
            }
        }
        errors
    }
}

impl Drop for ProcessTable {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

/// Executes one run.
pub struct RunController {
    name: String,
    config: HarnessConfig,
    processes: BTreeMap<String, ProcessSpec>,
    steps: Vec<Step>,
    schedule: Schedule,
    continue_on_fail: bool,
    env: BTreeMap<String, String>,
    ports: PortAllocator,
    workspace: RunWorkspace,
    table: ProcessTable,
    abort: AbortHandle,
    keep_run_dir: bool,
    state: RunState,
}

impl RunController {
    /// Validates the step graph and takes ownership of the run's resources.
    ///
    /// # Errors
    ///
    /// Returns the schedule validation error; nothing has been started yet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        config: HarnessConfig,
        processes: BTreeMap<String, ProcessSpec>,
        steps: Vec<Step>,
        continue_on_fail: bool,
        env: BTreeMap<String, String>,
        ports: PortAllocator,
        workspace: RunWorkspace,
        abort: AbortHandle,
        keep_run_dir: bool,
    ) -> Result<Self> {
        let schedule = Schedule::build(&processes, &steps)?;
        let grace = config.teardown.grace_period();
        Ok(Self {
            name,
            config,
            processes,
            steps,
            schedule,
            continue_on_fail,
            env,
            ports,
            workspace,
            table: ProcessTable {
                handles: Vec::new(),
                grace,
            },
            abort,
            keep_run_dir,
            state: RunState::Pending,
        })
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs every step, tears down, and returns the verdict.
    pub fn run(mut self) -> RunReport {
        let started = Instant::now();
        let deadline = Deadline::new(self.config.run.timeout(), self.abort.clone());
        self.state = RunState::Running;
        info!(run = %self.name, run_id = %self.workspace.run_id(), steps = self.steps.len(), "Run started");

        let mut reports = Vec::with_capacity(self.steps.len());
        let mut any_failed = false;
        let mut halted = false;
        let mut abort_reason = None;

        for index in 0..self.steps.len() {
            let step_name = self.steps[index].name.clone();
            if halted {
                reports.push(StepReport::skipped(index + 1, &step_name));
                continue;
            }

            info!(run = %self.name, step = %step_name, "Step {} started", index + 1);
            let step_started = Instant::now();
            let mut report = self.run_step(index, &deadline);
            report.duration_ms = step_started.elapsed().as_millis() as u64;

            if report.failed() {
                any_failed = true;
                warn!(run = %self.name, step = %step_name, failures = report.failures.len(), "Step failed");
                if report.aborted() {
                    abort_reason = deadline.check().err().map(|e| match e {
                        HarnessError::Aborted(reason) => reason,
                        other => other.to_string(),
                    });
                    halted = true;
                } else if !self.continue_on_fail {
                    halted = true;
                }
            } else {
                info!(run = %self.name, step = %step_name, "Step passed");
            }
            reports.push(report);
        }

        let process_failures = self.check_declared_exits();
        if !process_failures.is_empty() {
            any_failed = true;
        }

        self.state = if abort_reason.is_some() || (any_failed && !self.continue_on_fail) {
            RunState::Failed
        } else if any_failed {
            RunState::PartiallyFailed
        } else {
            RunState::Passed
        };

        let teardown_errors = self.teardown();
        let ports = self.ports.names().clone();
        self.ports.release_all();

        let run_dir = if self.keep_run_dir
            || (self.config.run.keep_failed_runs && !self.state.is_success())
        {
            Some(self.workspace.keep())
        } else {
            None
        };

        info!(run = %self.name, state = %self.state, "Run finished");
        RunReport {
            name: self.name.clone(),
            run_id: Some(self.workspace.run_id().to_string()),
            state: self.state,
            skip_reason: None,
            abort_reason,
            steps: reports,
            process_failures,
            teardown_errors,
            ports,
            run_dir,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Return codes of declared processes that exited without being stopped.
    fn check_declared_exits(&mut self) -> Vec<StepFailure> {
        let mut failures = Vec::new();
        for handle in self.table.handles.iter_mut() {
            if !self.processes.contains_key(handle.name()) || handle.is_running() {
                continue;
            }
            let (Some(expected), Some(actual)) = (handle.expected_return_code(), handle.exit_code())
            else {
                continue;
            };
            if !actual.is(expected) {
                warn!(process = %handle.name(), %actual, expected, "Unexpected exit");
                failures.push(StepFailure::from(&HarnessError::UnexpectedReturnCode {
                    process: handle.name().to_string(),
                    expected,
                    actual: actual.to_string(),
                }));
            }
        }
        failures
    }

    fn teardown(&mut self) -> Vec<String> {
        debug!(run = %self.name, processes = self.table.handles.len(), "Tearing down");
        self.table.terminate_all()
    }

    fn launch_context(&self, output_dir: &Path, deadline: &Deadline) -> LaunchContext {
        LaunchContext {
            output_dir: output_dir.to_path_buf(),
            cwd: self.workspace.path().to_path_buf(),
            env: self.env.clone(),
            ready_timeout: self.config.readiness.timeout(),
            poll_interval: self.config.readiness.poll_interval(),
            grace_period: self.config.teardown.grace_period(),
            deadline: deadline.clone(),
        }
    }

    fn run_step(&mut self, index: usize, deadline: &Deadline) -> StepReport {
        let step = self.steps[index].clone();
        let mut report = StepReport::new(index + 1, &step.name);

        if let Err(e) = deadline.check() {
            report.fail(StepFailure::from(&e));
            return report;
        }

        if let Err(failure) = self.start_processes(index, deadline) {
            report.fail(failure);
            return report;
        }

        let mut command = None;
        if let Some(spec) = &step.command {
            let output_dir = self
                .workspace
                .dirs()
                .output
                .join(format!("step-{:02}", index + 1));
            let ctx = self.launch_context(&output_dir, deadline);

            let mut handle = match launch(spec, &ctx) {
                Ok(handle) => handle,
                Err(e) => {
                    report.fail(StepFailure::from(&e));
                    return report;
                }
            };

            if step.keep_running {
                // Give a long-lived command time to produce its output.
                let settle = Instant::now();
                while settle.elapsed() < self.config.run.quiescence() && handle.is_running() {
                    if let Err(e) = deadline.check() {
                        report.fail(StepFailure::from(&e));
                        return report;
                    }
                    deadline.sleep(self.config.readiness.poll_interval());
                }
                if let Some(code) = handle.exit_code() {
                    report.return_code = Some(code.to_string());
                    check_return_code(&handle, &mut report);
                }
            } else {
                let timeout = step.timeout.unwrap_or(self.config.run.step_timeout());
                let poll = self.config.readiness.poll_interval();
                match handle.wait(timeout, poll, deadline) {
                    Ok(code) => {
                        debug!(process = %handle.name(), %code, "Command finished");
                        report.return_code = Some(code.to_string());
                        check_return_code(&handle, &mut report);
                    }
                    Err(e) => {
                        if let Err(teardown) = handle.terminate(self.config.teardown.grace_period()) {
                            warn!(process = %handle.name(), "{}", teardown);
                        }
                        let abort = matches!(e, HarnessError::Aborted(_));
                        report.fail(StepFailure::from(&e));
                        if abort {
                            return report;
                        }
                    }
                }
            }
            command = Some(handle);
        }

        let outcomes = self.evaluate_checks(&step, command.as_ref());
        report.record_assertions(outcomes);

        if let Some(handle) = command {
            if step.keep_running {
                self.table.insert(handle);
            }
        }

        for name in &step.still_running_after {
            if let Some(failure) = self.require_alive(name) {
                report.fail(failure);
            }
        }

        report
    }

    /// Launches every planned process that is not running yet.
    fn start_processes(&mut self, index: usize, deadline: &Deadline) -> std::result::Result<(), StepFailure> {
        let order = match self.schedule.plan(index) {
            Some(plan) => plan.launch_order.clone(),
            None => return Ok(()),
        };

        for name in order {
            if let Some(handle) = self.table.get_mut(&name) {
                if handle.is_running() {
                    continue;
                }
                let status = handle
                    .exit_code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown status".into());
                return Err(StepFailure::new(
                    FailureKind::ProcessExited,
                    format!("process '{}' exited earlier with {}", name, status),
                ));
            }

            let spec = match self.processes.get(&name) {
                Some(spec) => spec.clone(),
                None => {
                    return Err(StepFailure::from(&HarnessError::UnknownProcess(name)));
                }
            };
            let output_dir = self.workspace.dirs().output.clone();
            let ctx = self.launch_context(&output_dir, deadline);
            info!(process = %name, "Starting process");
            let handle = launch(&spec, &ctx).map_err(|e| StepFailure::from(&e))?;
            self.table.insert(handle);
        }
        Ok(())
    }

    fn evaluate_checks(&self, step: &Step, command: Option<&ProcessHandle>) -> Vec<AssertionOutcome> {
        let mut outcomes = Vec::with_capacity(step.checks.len());
        for check in &step.checks {
            let target = match check {
                Check::Expect { target, .. } | Check::Golden { target, .. } => target,
            };
            let label = target.label();

            let text = match self.target_text(target, command) {
                Ok(text) => text,
                Err(reason) => {
                    let (description, rationale) = match check {
                        Check::Expect { expectation, .. } => {
                            (expectation.predicate.describe(), expectation.rationale.as_str())
                        }
                        Check::Golden { reference, .. } => (
                            format!("matches golden {}", reference.reference().display()),
                            reference.rationale(),
                        ),
                    };
                    outcomes.push(AssertionOutcome::unavailable(description, rationale, reason).on(&label));
                    continue;
                }
            };

            let outcome = match check {
                Check::Expect { expectation, .. } => evaluate(&text, expectation),
                Check::Golden { reference, .. } => reference.evaluate(&text),
            };
            if !outcome.passed {
                debug!(check = %outcome.description, "Assertion failed");
            }
            outcomes.push(outcome.on(&label));
        }
        outcomes
    }

    fn target_text(&self, target: &Target, command: Option<&ProcessHandle>) -> std::result::Result<String, String> {
        let output: &CapturedOutput = match target {
            Target::Default => match command {
                Some(handle) => handle.output(),
                None => return Err("step has no command".into()),
            },
            Target::Process(name) => match command.filter(|h| h.name() == name) {
                Some(handle) => handle.output(),
                None => match self.table.get(name) {
                    Some(handle) => handle.output(),
                    None => return Err(format!("process '{}' was never started", name)),
                },
            },
            Target::File(path) => {
                let path = if path.is_relative() {
                    self.workspace.path().join(path)
                } else {
                    path.clone()
                };
                return fs::read(&path)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e));
            }
        };
        output.text().map_err(|e| e.to_string())
    }

    fn require_alive(&mut self, name: &str) -> Option<StepFailure> {
        match self.table.get_mut(name) {
            Some(handle) => {
                if handle.is_running() {
                    return None;
                }
                let status = handle
                    .exit_code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown status".into());
                Some(StepFailure::new(
                    FailureKind::ProcessExited,
                    format!("process '{}' is no longer running (exited with {})", name, status),
                ))
            }
            None => Some(StepFailure::new(
                FailureKind::ProcessExited,
                format!("process '{}' is not running", name),
            )),
        }
    }
}

fn check_return_code(handle: &ProcessHandle, report: &mut StepReport) {
    let (Some(expected), Some(actual)) = (handle.expected_return_code(), handle.exit_code()) else {
        return;
    };
    if !actual.is(expected) {
        report.fail(StepFailure::from(&HarnessError::UnexpectedReturnCode {
            process: handle.name().to_string(),
            expected,
            actual: actual.to_string(),
        }));
    }
}
