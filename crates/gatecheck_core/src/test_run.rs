//! Run definitions.
//!
//! A `TestRun` collects processes, steps and policy, owns the run's port
//! reservations and directories while it is being defined, and hands all of
//! it to a [`RunController`](crate::controller::RunController) when run.

use crate::cancel::AbortHandle;
use crate::config::HarnessConfig;
use crate::controller::RunController;
use crate::error::{HarnessError, Result};
use crate::ports::PortAllocator;
use crate::process::ProcessSpec;
use crate::report::RunReport;
use crate::schedule::Schedule;
use crate::step::Step;
use crate::workspace::{RunDirs, RunWorkspace};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A run under construction.
pub struct TestRun {
    name: String,
    config: HarnessConfig,
    ports: PortAllocator,
    workspace: RunWorkspace,
    processes: BTreeMap<String, ProcessSpec>,
    steps: Vec<Step>,
    env: BTreeMap<String, String>,
    continue_on_fail: bool,
    keep_run_dir: bool,
    abort: AbortHandle,
}

impl TestRun {
    /// Creates the run's directories and port allocator.
    ///
    /// `test_dir` is the directory holding the scenario's fixtures.
    pub fn new(name: &str, config: HarnessConfig, test_dir: impl AsRef<Path>) -> Result<Self> {
        let ports = PortAllocator::new(config.ports.clone())?;
        let workspace = RunWorkspace::create(config.run.run_root.as_deref(), name, test_dir)?;
        debug!(run = %name, dir = %workspace.path().display(), "Run workspace created");

        Ok(Self {
            name: name.to_string(),
            config,
            ports,
            workspace,
            processes: BTreeMap::new(),
            steps: Vec::new(),
            env: BTreeMap::new(),
            continue_on_fail: false,
            keep_run_dir: false,
            abort: AbortHandle::new(),
        })
    }

    /// Run name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Harness configuration of this run.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run directories.
    pub fn dirs(&self) -> &RunDirs {
        self.workspace.dirs()
    }

    /// Reserves a port under `name`, or returns the one already reserved.
    pub fn reserve_port(&mut self, name: &str) -> Result<u16> {
        self.ports.reserve_named(name)
    }

    /// Port reserved under `name`.
    pub fn port(&self, name: &str) -> Option<u16> {
        self.ports.named(name)
    }

    /// Named reservations.
    pub fn ports(&self) -> &BTreeMap<String, u16> {
        self.ports.names()
    }

    /// Declares a process.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProcess` if the name is taken.
    pub fn process(&mut self, spec: ProcessSpec) -> Result<&mut Self> {
        if self.processes.contains_key(&spec.name) {
            return Err(HarnessError::DuplicateProcess(spec.name));
        }
        self.processes.insert(spec.name.clone(), spec);
        Ok(self)
    }

    /// Declared process by name.
    pub fn process_spec(&self, name: &str) -> Option<&ProcessSpec> {
        self.processes.get(name)
    }

    /// Appends a step.
    pub fn step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Number of steps defined so far.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Record failing steps and keep going instead of halting.
    pub fn continue_on_fail(&mut self, enabled: bool) -> &mut Self {
        self.continue_on_fail = enabled;
        self
    }

    /// Keep the run directory after the run, whatever the verdict.
    pub fn keep_run_dir(&mut self, enabled: bool) -> &mut Self {
        self.keep_run_dir = enabled;
        self
    }

    /// Sets a variable in every process's environment.
    pub fn env(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    /// Handle that aborts the run from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Checks process references and start-before edges without running.
    pub fn validate(&self) -> Result<()> {
        Schedule::build(&self.processes, &self.steps).map(|_| ())
    }

    /// Validates the run and executes it.
    ///
    /// # Errors
    ///
    /// Definition problems (unknown processes, cycles, shadowed names) are
    /// returned before any process starts. Step failures are not errors;
    /// they are recorded in the report.
    pub fn run(self) -> Result<RunReport> {
        let controller = RunController::new(
            self.name,
            self.config,
            self.processes,
            self.steps,
            self.continue_on_fail,
            self.env,
            self.ports,
            self.workspace,
            self.abort,
            self.keep_run_dir,
        )?;
        Ok(controller.run())
    }
}
