//! Probe command.

use anyhow::{Context, Result};
use console::style;
use gatecheck_core::{Scenario, SkipDecision};
use std::path::Path;

/// Prints every skip condition of a scenario and whether it lets the run go.
pub fn run(scenario_path: &Path) -> Result<i32> {
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("loading {}", scenario_path.display()))?;
    let requirements = scenario.requirements();

    println!("{}", style(&scenario.name).bold());
    if requirements.is_empty() {
        println!("  no host requirements");
    }
    for (description, ok) in requirements.survey() {
        let mark = if ok {
            style("✓").green()
        } else {
            style("×").red()
        };
        println!("  {} {}", mark, description);
    }

    match requirements.evaluate() {
        SkipDecision::Run => println!("{} would run", style("→").cyan()),
        SkipDecision::Skip { reason } => {
            println!("{} would be skipped: {}", style("→").yellow(), reason)
        }
    }
    Ok(0)
}
