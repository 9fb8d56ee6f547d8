//! Gatecheck Core Library
//!
//! A protocol-conformance harness for HTTP/1.1 to HTTP/2 gateways, providing:
//! - Collision-free port reservation across concurrent runs
//! - Multi-process lifecycle management with readiness predicates
//! - Ordered steps with start-before dependencies
//! - Assertions over captured output and log files
//!
//! The proxy under test, the HTTP clients and the origin servers are opaque
//! subprocesses; the harness never speaks HTTP itself.
//!
//! # Quick Start
//!
//! ```no_run
//! use gatecheck_core::{Expectation, HarnessConfig, ProcessSpec, Readiness, Step, TestRun};
//!
//! let mut run = TestRun::new("smoke", HarnessConfig::default(), ".").unwrap();
//! let port = run.reserve_port("origin").unwrap();
//!
//! run.process(
//!     ProcessSpec::shell("origin", &format!("nc -l 127.0.0.1 {}", port))
//!         .ready(Readiness::port(port)),
//! )
//! .unwrap();
//! run.step(
//!     Step::new("request")
//!         .start_before("origin")
//!         .shell(&format!("curl -sv http://127.0.0.1:{}/", port))
//!         .expect_output(Expectation::excludes("RST_STREAM", "stream must not be reset")),
//! );
//!
//! let report = run.run().unwrap();
//! println!("{}", report);
//! ```
//!
//! # Assertions
//!
//! Every expectation is evaluated and reported on its own:
//!
//! ```
//! use gatecheck_core::{evaluate_all, Expectation};
//!
//! let output = "< HTTP/2 200\n< content-type: text/plain\n";
//! let outcomes = evaluate_all(
//!     output,
//!     &[
//!         Expectation::contains("HTTP/2 200", "Response OK"),
//!         Expectation::excludes("< content-length", "chunked response has no length"),
//!     ],
//! );
//! assert!(outcomes.iter().all(|o| o.passed));
//! ```
//!
//! # Scenario Files
//!
//! Runs can also be described in TOML (see [`Scenario`]) and executed with
//! the `gatecheck` binary.

mod assertion;
mod cancel;
mod config;
mod controller;
mod error;
mod golden;
mod output;
mod ports;
mod process;
mod proxy;
mod readiness;
mod report;
mod scenario_file;
mod schedule;
mod skip;
mod step;
mod template;
mod test_run;
mod workspace;

pub use assertion::{evaluate, evaluate_all, AssertionOutcome, Expectation, Pattern, Predicate};
pub use cancel::{AbortHandle, Deadline};
pub use config::{HarnessConfig, PortConfig, ReadinessConfig, RunConfig, TeardownConfig};
pub use controller::RunController;
pub use error::{HarnessError, Result};
pub use golden::{apply_filters, first_difference, GoldenReference, LineFilter};
pub use output::CapturedOutput;
pub use ports::{PortAllocator, PortReservation};
pub use process::{
    launch, ExitCode, LaunchContext, ProcessHandle, ProcessSpec, Termination, DEFAULT_PROCESS,
};
pub use proxy::{InstalledProxy, ProxyFixture, RecordValue, DEFAULT_SSL_FILES, SSL_PORT_SUFFIX};
pub use readiness::Readiness;
pub use report::{FailureKind, RunReport, RunState, StepFailure, StepReport, StepStatus};
pub use scenario_file::{
    ExpectDef, GoldenDef, ProcessDef, ProxyDef, ReadyDef, RemapDef, Scenario, StepDef,
};
pub use schedule::{Schedule, StepPlan};
pub use skip::{Requirements, SkipCondition, SkipDecision};
pub use step::{Check, Step, Target};
pub use template::TemplateContext;
pub use test_run::TestRun;
pub use workspace::{RunDirs, RunWorkspace};
