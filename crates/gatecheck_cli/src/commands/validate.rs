//! Validate command.

use anyhow::{Context, Result};
use console::style;
use gatecheck_core::{HarnessConfig, Scenario};
use std::path::Path;

/// Parses and compiles a scenario without starting anything.
///
/// Compiling reserves ports and creates a throwaway run directory, both
/// released again before returning.
pub fn run(scenario_path: &Path, config_path: &Path) -> Result<i32> {
    let config = HarnessConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("loading {}", scenario_path.display()))?;

    let run = scenario
        .build(config)
        .with_context(|| format!("compiling scenario '{}'", scenario.name))?;

    println!(
        "{} {} is valid: {} step(s), ports {}",
        style("✓").green(),
        style(&scenario.name).bold(),
        run.step_count(),
        run.ports()
            .iter()
            .map(|(name, port)| format!("{}={}", name, port))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(0)
}
