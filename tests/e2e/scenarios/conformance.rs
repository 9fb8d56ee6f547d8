//! Gateway conformance scenarios.
//!
//! They run only where `GATECHECK_PROXY_CMD` names a gateway binary,
//! `GATECHECK_SSL_DIR` holds `server.pem`/`server.key` and the HTTP/2
//! clients are installed. Elsewhere the runs report `skipped`.

use crate::harness::{fixture_dir, Case};
use gatecheck_core::{ReadyDef, RunState, Scenario, SkipDecision};

#[test]
fn test_chunked_encoding_h2() {
    let report = Case::new("chunked_encoding_h2")
        .fixture("chunked_encoding_h2", "scenario.toml")
        .assert_success()
        .run()
        .unwrap();

    if report.state == RunState::Passed {
        assert_eq!(report.steps.len(), 3);
    }
}

#[test]
fn test_hook_events() {
    let report = Case::new("test_hooks")
        .fixture("test_hooks", "scenario.toml")
        .assert_success()
        .run()
        .unwrap();

    if report.state == RunState::Passed {
        assert!(report.step("check log").is_some());
    }
}

#[test]
fn test_conformance_fixtures_are_gated() {
    for dir in ["chunked_encoding_h2", "test_hooks"] {
        let scenario = Scenario::load(&fixture_dir(dir).join("scenario.toml")).unwrap();
        assert!(!scenario.requirements().is_empty());
        assert!(scenario.continue_on_fail);
        if let SkipDecision::Skip { reason } = scenario.skip_decision() {
            assert!(
                reason.starts_with("requires") || reason.starts_with("skipped because"),
                "{}",
                reason
            );
        }
    }
}

#[test]
fn test_one_shot_origins_wait_without_connecting() {
    let scenario =
        Scenario::load(&fixture_dir("chunked_encoding_h2").join("scenario.toml")).unwrap();
    assert_eq!(scenario.processes.len(), 3);
    for process in &scenario.processes {
        assert!(
            matches!(process.ready, ReadyDef::DelayMs(_)),
            "'{}' would lose its only connection to a port check: {:?}",
            process.name,
            process.ready
        );
    }
}
