//! Process descriptors, launching and termination.
//!
//! Every child runs in its own process group so that a shell wrapper and
//! whatever it forks (`sh -c 'nc -l ...'`) receive the same signals.

use crate::cancel::Deadline;
use crate::error::{HarnessError, Result};
use crate::output::CapturedOutput;
use crate::readiness::Readiness;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Name used for a step's primary command.
pub const DEFAULT_PROCESS: &str = "default";

/// Declarative description of a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Unique name within a run.
    pub name: String,
    /// Executable.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment on top of the run environment.
    pub env: BTreeMap<String, String>,
    /// Working directory; the run directory when unset.
    pub cwd: Option<PathBuf>,
    /// Condition that marks the process as started.
    pub readiness: Readiness,
    /// Overrides the configured readiness timeout.
    pub ready_timeout: Option<Duration>,
    /// Exit code the process must end with, if checked.
    pub expected_return_code: Option<i32>,
    /// Processes that must be running before this one starts.
    pub start_before: Vec<String>,
}

impl ProcessSpec {
    /// A process running `program` directly.
    pub fn new(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            readiness: Readiness::Immediate,
            ready_timeout: None,
            expected_return_code: None,
            start_before: Vec::new(),
        }
    }

    /// A process running `script` through `sh -c`.
    pub fn shell(name: &str, script: &str) -> Self {
        Self::new(name, "sh").arg("-c").arg(script)
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the readiness predicate.
    pub fn ready(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Sets the readiness timeout for this process.
    pub fn ready_within(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Declares the expected exit code.
    pub fn return_code(mut self, code: i32) -> Self {
        self.expected_return_code = Some(code);
        self
    }

    /// Declares a process that must be started before this one.
    pub fn start_before(mut self, process: &str) -> Self {
        self.start_before.push(process.to_string());
        self
    }

    /// Renders the command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything `launch` needs besides the spec.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Directory for capture files.
    pub output_dir: PathBuf,
    /// Default working directory.
    pub cwd: PathBuf,
    /// Run-wide environment.
    pub env: BTreeMap<String, String>,
    /// Default readiness timeout.
    pub ready_timeout: Duration,
    /// Sleep between readiness probes.
    pub poll_interval: Duration,
    /// Grace period used when a process fails readiness.
    pub grace_period: Duration,
    /// Run deadline and abort flag.
    pub deadline: Deadline,
}

/// How `terminate` ended a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Already exited or already terminated; nothing was sent.
    AlreadyStopped,
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL after the grace period.
    Forced,
}

/// Observed end of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Normal exit with a code.
    Code(i32),
    /// Killed by a signal.
    Signal(i32),
    /// Platform gave neither.
    Unknown,
}

impl ExitCode {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }

    /// True if this is a normal exit with `code`.
    pub fn is(&self, code: i32) -> bool {
        matches!(self, Self::Code(c) if *c == code)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{}", code),
            Self::Signal(signal) => write!(f, "signal {}", signal),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Live handle to a launched process.
pub struct ProcessHandle {
    name: String,
    child: Child,
    output: CapturedOutput,
    expected_return_code: Option<i32>,
    exit: Option<ExitCode>,
    terminated: bool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Spawns `spec` and blocks until its readiness predicate holds.
///
/// # Errors
///
/// Returns `Spawn` if the program cannot be started, `NotReady` if the
/// process exits or the timeout elapses before it is ready, and `Aborted` if
/// the run is cancelled meanwhile. In the error cases the child is already
/// terminated.
pub fn launch(spec: &ProcessSpec, ctx: &LaunchContext) -> Result<ProcessHandle> {
    let mut handle = spawn(spec, ctx)?;
    let timeout = spec.ready_timeout.unwrap_or(ctx.ready_timeout);

    match wait_ready(&mut handle, &spec.readiness, timeout, ctx) {
        Ok(()) => {
            debug!(process = %spec.name, pid = handle.pid(), "Process ready");
            Ok(handle)
        }
        Err(e) => {
            if let Err(teardown) = handle.terminate(ctx.grace_period) {
                warn!(process = %spec.name, "{}", teardown);
            }
            Err(e)
        }
    }
}

fn spawn(spec: &ProcessSpec, ctx: &LaunchContext) -> Result<ProcessHandle> {
    let output = CapturedOutput::create(ctx.output_dir.join(format!("{}.out", spec.name)))?;
    let (stdout, stderr) = output.stdio()?;

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&ctx.env)
        .envs(&spec.env)
        .current_dir(spec.cwd.as_deref().unwrap_or(&ctx.cwd))
        .stdin(std::process::Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    debug!(process = %spec.name, command = %spec.command_line(), "Launching process");

    let child = command.spawn().map_err(|source| HarnessError::Spawn {
        process: spec.name.clone(),
        source,
    })?;

    Ok(ProcessHandle {
        name: spec.name.clone(),
        child,
        output,
        expected_return_code: spec.expected_return_code,
        exit: None,
        terminated: false,
    })
}

fn wait_ready(
    handle: &mut ProcessHandle,
    readiness: &Readiness,
    timeout: Duration,
    ctx: &LaunchContext,
) -> Result<()> {
    let started = Instant::now();
    let probe_timeout = ctx.poll_interval.max(Duration::from_millis(50));

    loop {
        ctx.deadline.check()?;

        if readiness.probe(&handle.output, started, probe_timeout) {
            return Ok(());
        }

        if !handle.is_running() {
            let status = handle.exit.unwrap_or(ExitCode::Unknown);
            return Err(HarnessError::NotReady {
                process: handle.name.clone(),
                reason: format!(
                    "exited with {} before {}",
                    status,
                    readiness.describe()
                ),
            });
        }

        if started.elapsed() >= timeout {
            return Err(HarnessError::NotReady {
                process: handle.name.clone(),
                reason: format!(
                    "no {} within {}ms",
                    readiness.describe(),
                    timeout.as_millis()
                ),
            });
        }

        debug!(process = %handle.name, "Waiting for {}", readiness.describe());
        ctx.deadline.sleep(ctx.poll_interval);
    }
}

impl ProcessHandle {
    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Captured merged output.
    pub fn output(&self) -> &CapturedOutput {
        &self.output
    }

    /// Declared exit code, if any.
    pub fn expected_return_code(&self) -> Option<i32> {
        self.expected_return_code
    }

    /// Exit status, once observed.
    pub fn exit_code(&self) -> Option<ExitCode> {
        self.exit
    }

    /// True once `terminate` has been called.
    pub fn was_terminated(&self) -> bool {
        self.terminated
    }

    /// True while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(ExitCode::from_status(status));
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(process = %self.name, "try_wait failed: {}", e);
                false
            }
        }
    }

    /// Waits for the process to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if it is still running after `timeout`, or
    /// `Aborted` if the deadline fires first. The process is left running in
    /// both cases.
    pub fn wait(&mut self, timeout: Duration, poll: Duration, deadline: &Deadline) -> Result<ExitCode> {
        let started = Instant::now();
        loop {
            if !self.is_running() {
                return Ok(self.exit.unwrap_or(ExitCode::Unknown));
            }
            deadline.check()?;
            if started.elapsed() >= timeout {
                return Err(HarnessError::Timeout {
                    process: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            deadline.sleep(poll);
        }
    }

    /// Stops the process group: SIGTERM, then SIGKILL once `grace` elapses.
    ///
    /// The group is signalled even when the leader has already exited, so
    /// background children it left behind are stopped too. Only the first
    /// call sends signals; later calls return `AlreadyStopped`.
    ///
    /// # Errors
    ///
    /// Returns `TeardownError` if the process cannot be reaped even after
    /// SIGKILL.
    pub fn terminate(&mut self, grace: Duration) -> Result<Termination> {
        if self.terminated {
            return Ok(Termination::AlreadyStopped);
        }
        self.terminated = true;

        if !self.is_running() {
            self.sweep_group(grace);
            return Ok(Termination::AlreadyStopped);
        }

        debug!(process = %self.name, pid = self.pid(), "Sending SIGTERM");
        signal_group(self.pid());

        let started = Instant::now();
        let poll = Duration::from_millis(20);
        while started.elapsed() < grace {
            if !self.is_running() {
                kill_group(self.pid());
                return Ok(Termination::Graceful);
            }
            std::thread::sleep(poll);
        }
        if !self.is_running() {
            kill_group(self.pid());
            return Ok(Termination::Graceful);
        }

        warn!(
            process = %self.name,
            grace_ms = grace.as_millis() as u64,
            "Process ignored SIGTERM, escalating to SIGKILL"
        );
        kill_group(self.pid());
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                debug!(process = %self.name, "kill after group kill: {}", e);
            }
        }

        match self.child.wait() {
            Ok(status) => {
                self.exit = Some(ExitCode::from_status(status));
                Ok(Termination::Forced)
            }
            Err(e) => Err(HarnessError::TeardownError {
                process: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl ProcessHandle {
    /// Stops whatever is left in the group of an exited leader.
    fn sweep_group(&self, grace: Duration) {
        let pid = self.pid();
        if !group_alive(pid) {
            return;
        }
        debug!(process = %self.name, pid, "Leader gone, signalling leftover group members");
        signal_group(pid);

        let started = Instant::now();
        while started.elapsed() < grace && group_alive(pid) {
            std::thread::sleep(Duration::from_millis(20));
        }
        kill_group(pid);
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.terminated {
            kill_group(self.pid());
        }
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// True while any member of the group can still be signalled.
#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    killpg(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {
    // No SIGTERM equivalent; the grace period just elapses and kill follows.
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
