//! Run command.

use crate::Format;
use anyhow::{Context, Result};
use console::style;
use gatecheck_core::{
    HarnessConfig, RunReport, RunState, Scenario, SkipDecision, StepStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Runs a scenario and prints its report. Returns the process exit code.
pub fn run(scenario_path: &Path, config_path: &Path, format: Format, keep_run_dir: bool) -> Result<i32> {
    let config = HarnessConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("loading {}", scenario_path.display()))?;

    let report = match scenario.skip_decision() {
        SkipDecision::Skip { reason } => RunReport::skipped(&scenario.name, &reason),
        SkipDecision::Run => {
            let mut run = scenario
                .build(config)
                .with_context(|| format!("preparing scenario '{}'", scenario.name))?;
            run.keep_run_dir(keep_run_dir);

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            pb.set_message(format!("Running {}...", scenario.name));
            pb.enable_steady_tick(Duration::from_millis(100));

            let report = run.run();
            pb.finish_and_clear();
            report?
        }
    };

    match format {
        Format::Json => print_json(&report)?,
        Format::Text => print_text(&report),
    }
    Ok(report.exit_code())
}

fn print_json(report: &RunReport) -> Result<()> {
    let doc = serde_json::json!({
        "finished_at": chrono::Local::now().to_rfc3339(),
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn print_text(report: &RunReport) {
    let state = match report.state {
        RunState::Passed => style(report.state.to_string()).green().bold(),
        RunState::Skipped => style(report.state.to_string()).yellow().bold(),
        _ => style(report.state.to_string()).red().bold(),
    };
    println!(
        "{} {} {} ({} ms, {})",
        style("→").cyan(),
        style(&report.name).bold(),
        state,
        report.duration_ms,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(reason) = &report.skip_reason {
        println!("  {} {}", style("skipped:").yellow(), reason);
    }
    if let Some(reason) = &report.abort_reason {
        println!("  {} {}", style("aborted:").red(), reason);
    }

    for step in &report.steps {
        let mark = match step.status {
            StepStatus::Passed => style("✓").green(),
            StepStatus::Failed => style("×").red(),
            StepStatus::Skipped => style("-").dim(),
        };
        println!("  {} {}. {}", mark, step.index, step.name);

        for outcome in step.assertions.iter().filter(|o| !o.passed) {
            println!(
                "      {} {}",
                style(&outcome.description).red(),
                style(format!("({})", outcome.rationale)).dim()
            );
            if let Some(detail) = &outcome.detail {
                println!("        {}", detail);
            }
        }
        for failure in step
            .failures
            .iter()
            .filter(|f| f.kind != gatecheck_core::FailureKind::AssertionMismatch)
        {
            println!("      {}", style(&failure.message).red());
        }
    }

    for failure in &report.process_failures {
        println!("  {} {}", style("process:").red(), failure.message);
    }

    if !report.teardown_errors.is_empty() {
        println!();
        println!("{}", style("Teardown errors:").yellow().bold());
        for err in &report.teardown_errors {
            println!("  {} {}", style("⚠").yellow(), err);
        }
    }

    if let Some(dir) = &report.run_dir {
        println!();
        println!("  Run directory kept at {}", style(dir.display()).cyan());
    }
}
