//! Process lifecycle driven through the programmatic `TestRun` API.

use crate::harness::TestWorkspace;
use gatecheck_core::{
    Expectation, FailureKind, ProcessSpec, Readiness, RunState, Step, StepStatus, TestRun,
};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

fn is_alive(pid: &str) -> bool {
    Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn read_pid(path: &Path) -> String {
    fs::read_to_string(path).expect("pid file should exist")
}

#[test]
fn test_dependencies_start_in_order_and_stop_at_teardown() {
    let ws = TestWorkspace::empty().unwrap();
    let origin_pid = ws.path().join("origin.pid");
    let proxy_pid = ws.path().join("proxy.pid");
    let order = ws.path().join("order.log");

    let mut run = TestRun::new("lifecycle", ws.config(), ws.path()).unwrap();
    run.process(
        ProcessSpec::shell(
            "origin",
            &format!(
                "echo $$ > {}; echo origin >> {}; echo up; exec sleep 30",
                origin_pid.display(),
                order.display()
            ),
        )
        .ready(Readiness::OutputContains("up".into())),
    )
    .unwrap();
    run.process(
        ProcessSpec::shell(
            "proxy",
            &format!(
                "echo $$ > {}; echo proxy >> {}; echo up; exec sleep 30",
                proxy_pid.display(),
                order.display()
            ),
        )
        .ready(Readiness::OutputContains("up".into()))
        .start_before("origin"),
    )
    .unwrap();
    run.step(
        Step::new("request")
            .start_before("proxy")
            .shell(&format!("cat {}", order.display()))
            .return_code(0)
            .expect_output(Expectation::contains("origin\nproxy", "origin starts first"))
            .still_running_after("proxy")
            .still_running_after("origin"),
    );

    let report = run.run().unwrap();
    assert_eq!(report.state, RunState::Passed, "{}", report);
    assert!(report.teardown_errors.is_empty(), "{:?}", report.teardown_errors);

    assert!(!is_alive(&read_pid(&origin_pid)));
    assert!(!is_alive(&read_pid(&proxy_pid)));
    assert!(ws.leftover_runs().unwrap().is_empty());
}

#[test]
fn test_not_ready_process_fails_step() {
    let ws = TestWorkspace::empty().unwrap();
    let mut run = TestRun::new("not_ready", ws.config(), ws.path()).unwrap();
    let port = run.reserve_port("silent").unwrap();

    run.process(
        ProcessSpec::shell("silent", "exec sleep 30")
            .ready(Readiness::port(port))
            .ready_within(Duration::from_millis(300)),
    )
    .unwrap();
    run.step(Step::new("needs silent").start_before("silent").shell("true"));
    run.step(Step::new("after").shell("true"));

    let report = run.run().unwrap();
    assert_eq!(report.state, RunState::Failed);
    let step = report.step("needs silent").unwrap();
    assert_eq!(step.failures[0].kind, FailureKind::NotReady);
    assert_eq!(report.step("after").unwrap().status, StepStatus::Skipped);
}

#[test]
fn test_kept_command_must_survive_later_steps() {
    let ws = TestWorkspace::empty().unwrap();
    let mut run = TestRun::new("kept", ws.config(), ws.path()).unwrap();
    run.continue_on_fail(true);

    run.step(
        Step::new("start watcher")
            .command(ProcessSpec::shell("watcher", "echo watching; exec sleep 30"))
            .keep_running()
            .expect_output(Expectation::contains("watching", "watcher announces itself")),
    );
    run.step(Step::new("check alive").still_running_after("watcher"));
    run.step(
        Step::new("short lived")
            .command(ProcessSpec::shell("flash", "echo gone"))
            .keep_running(),
    );
    run.step(Step::new("check flash").still_running_after("flash"));

    let report = run.run().unwrap();
    assert_eq!(report.state, RunState::PartiallyFailed, "{}", report);
    assert_eq!(report.step("start watcher").unwrap().status, StepStatus::Passed);
    assert_eq!(report.step("check alive").unwrap().status, StepStatus::Passed);
    let check = report.step("check flash").unwrap();
    assert_eq!(check.status, StepStatus::Failed);
    assert_eq!(check.failures[0].kind, FailureKind::ProcessExited);
}

#[test]
fn test_step_timeout_terminates_command() {
    let ws = TestWorkspace::empty().unwrap();
    let mut run = TestRun::new("slow", ws.config(), ws.path()).unwrap();
    run.step(
        Step::new("hangs")
            .shell("exec sleep 30")
            .timeout(Duration::from_millis(300)),
    );

    let started = Instant::now();
    let report = run.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(
        report.step("hangs").unwrap().failures[0].kind,
        FailureKind::Timeout
    );
}

#[test]
fn test_abort_stops_run_and_reports_reason() {
    let ws = TestWorkspace::empty().unwrap();
    let mut run = TestRun::new("aborted", ws.config(), ws.path()).unwrap();
    run.step(Step::new("long").shell("exec sleep 30"));
    run.step(Step::new("next").shell("true"));

    let handle = run.abort_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        handle.abort("operator interrupt");
    });

    let report = run.run().unwrap();
    aborter.join().unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert!(report
        .abort_reason
        .as_deref()
        .unwrap_or_default()
        .contains("operator interrupt"));
    assert_eq!(report.step("long").unwrap().failures[0].kind, FailureKind::Aborted);
    assert_eq!(report.step("next").unwrap().status, StepStatus::Skipped);
}

#[test]
fn test_kept_run_dir_holds_outputs() {
    let ws = TestWorkspace::empty().unwrap();
    let mut run = TestRun::new("kept_dir", ws.config(), ws.path()).unwrap();
    run.keep_run_dir(true);
    run.step(Step::new("say").shell("echo hello from step"));

    let report = run.run().unwrap();
    let dir = report.run_dir.clone().expect("run dir should be kept");
    let captured =
        fs::read_to_string(dir.join("output").join("step-01").join("default.out")).unwrap();
    assert!(captured.contains("hello from step"));
}
