use crate::harness::{Assertion, Case, TestWorkspace};
use gatecheck_core::{FailureKind, RunState, Scenario, StepStatus};
use std::path::Path;

#[test]
fn test_selftest_scenario_passes() {
    Case::new("selftest_passes")
        .fixture("selftest", "scenario.toml")
        .assert_state(RunState::Passed)
        .assert_step("h2 get chunked", StepStatus::Passed)
        .assert_step("event log", StepStatus::Passed)
        .assert_failed_predicates("h2 get chunked", 0)
        .assert_predicate_passed("h2 get chunked", "origin: contains \"origin listening on")
        .assert_predicate_passed("event log", "TS_EVENT_VCONN_CLOSE\" exactly 2 time(s)")
        .assert_clean_teardown()
        .assert_run_dir_removed()
        .run()
        .expect("selftest scenario should pass");
}

#[test]
fn test_scenario_loaded_from_relative_path() {
    // Integration tests run from the package root.
    let scenario = Scenario::load(Path::new("fixtures/selftest/scenario.toml")).unwrap();
    assert!(scenario.test_dir().is_absolute());

    let workspace = TestWorkspace::empty().unwrap();
    let report = scenario.build(workspace.config()).unwrap().run().unwrap();

    for assertion in [
        Assertion::State(RunState::Passed),
        Assertion::FailedPredicates {
            step: "h2 get chunked".into(),
            count: 0,
        },
        Assertion::NoTeardownErrors,
    ] {
        assertion.check(&report).unwrap();
    }
}

#[test]
fn test_one_shot_origin_serves_the_step() {
    Case::new("one_shot")
        .fixture("selftest", "one_shot.toml")
        .assert_success()
        .assert_that(|report| {
            if report.state == RunState::Passed {
                anyhow::ensure!(report.steps[0].assertions.iter().all(|o| o.passed));
            }
            Ok(())
        })
        .run()
        .unwrap();
}

#[test]
fn test_crashed_origin_fails_the_run() {
    let text = r#"
name = "crashed_origin"

[[process]]
name = "origin"
command = "echo started; exit 4"
return_code = 0

[[process]]
name = "steady"
command = "echo up; exec sleep 30"
ready = { output_contains = "up" }
return_code = 0

[[step]]
name = "traffic"
start_before = ["origin", "steady"]
command = "sleep 0.3"
return_code = 0
"#;
    let report = Case::new("crashed_origin")
        .inline(text, env!("CARGO_MANIFEST_DIR"))
        .assert_state(RunState::Failed)
        .assert_step("traffic", StepStatus::Passed)
        .assert_process_failures(1)
        .run()
        .unwrap();

    let failure = &report.process_failures[0];
    assert_eq!(failure.kind, FailureKind::UnexpectedReturnCode);
    assert!(failure.message.contains("'origin' returned 4"), "{}", failure.message);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_predicates_fail_independently() {
    Case::new("length_leak")
        .fixture("selftest", "length_leak.toml")
        .assert_state(RunState::PartiallyFailed)
        .assert_step("h2 get with length", StepStatus::Failed)
        .assert_failed_predicates("h2 get with length", 1)
        .assert_predicate_failed("h2 get with length", "excludes \"< content-length\"")
        .assert_predicate_passed("h2 get with length", "excludes \"RST_STREAM\"")
        .assert_predicate_passed("h2 get with length", "contains \":status: 200\"")
        .assert_failure("h2 get with length", FailureKind::AssertionMismatch)
        .run()
        .unwrap();
}

#[test]
fn test_return_code_and_output_checked_together() {
    // stderr is captured alongside stdout, so the reset line is visible
    Case::new("reset_seen")
        .fixture("selftest", "length_leak.toml")
        .assert_step("h2 get reset", StepStatus::Failed)
        .assert_failure("h2 get reset", FailureKind::UnexpectedReturnCode)
        .assert_predicate_failed("h2 get reset", "excludes \"RST_STREAM\"")
        .assert_step("still runs", StepStatus::Passed)
        .run()
        .unwrap();
}

#[test]
fn test_halting_run_skips_remaining_steps() {
    let text = r#"
name = "halts"

[[step]]
name = "fails"
command = "echo oops; exit 3"
return_code = 0

[[step]]
name = "never runs"
command = "echo unreachable"
"#;
    let report = Case::new("halts")
        .inline(text, env!("CARGO_MANIFEST_DIR"))
        .assert_state(RunState::Failed)
        .assert_failure("fails", FailureKind::UnexpectedReturnCode)
        .assert_step("never runs", StepStatus::Skipped)
        .run()
        .unwrap();

    assert_eq!(report.exit_code(), 1);
    let failure = &report.steps[0].failures[0];
    assert!(failure.message.contains("returned 3, expected 0"), "{}", failure.message);
}

#[test]
fn test_missing_file_fails_predicate() {
    let text = r#"
name = "missing_file"

[[step]]
name = "look"
command = "true"

[[step.expect]]
file = "nowhere/outserver2"
contains = "chunked"
rationale = "Request should be chunked encoded"
"#;
    Case::new("missing_file")
        .inline(text, env!("CARGO_MANIFEST_DIR"))
        .assert_state(RunState::Failed)
        .assert_failed_predicates("look", 1)
        .assert_that(|report| {
            let outcome = &report.steps[0].assertions[0];
            anyhow::ensure!(
                outcome.detail.as_deref().unwrap_or_default().contains("cannot read"),
                "unexpected detail: {:?}",
                outcome.detail
            );
            anyhow::ensure!(outcome.rationale == "Request should be chunked encoded");
            Ok(())
        })
        .run()
        .unwrap();
}

#[test]
fn test_unmet_requirement_skips_run() {
    let text = r#"
name = "needs_tool"

[[skip_unless]]
has_program = { program = "gatecheck-no-such-tool", reason = "gatecheck-no-such-tool installed" }

[[step]]
name = "would fail"
command = "exit 1"
"#;
    let report = Case::new("needs_tool")
        .inline(text, env!("CARGO_MANIFEST_DIR"))
        .assert_state(RunState::Skipped)
        .assert_success()
        .assert_skip_reason("gatecheck-no-such-tool")
        .run()
        .unwrap();

    assert!(report.steps.is_empty());
    assert_eq!(report.exit_code(), 0);
}
