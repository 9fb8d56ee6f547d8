//! Gatecheck CLI - run protocol-conformance scenarios against a gateway.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "gatecheck")]
#[command(about = "Protocol-conformance harness for HTTP/1.1 to HTTP/2 gateways", long_about = None)]
#[command(version)]
struct Cli {
    /// Harness configuration file (defaults apply when missing)
    #[arg(long, global = true, default_value = "gatecheck.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Report format.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Format {
    /// Human-readable summary
    Text,
    /// JSON run report
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Scenario file (TOML)
        scenario: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
        /// Keep the run directory regardless of the verdict
        #[arg(long)]
        keep_run_dir: bool,
    },
    /// Check a scenario file without starting processes
    Validate {
        /// Scenario file (TOML)
        scenario: PathBuf,
    },
    /// Show which skip conditions of a scenario hold on this host
    Probe {
        /// Scenario file (TOML)
        scenario: PathBuf,
    },
}

fn main() {
    // Initialize tracing subscriber
    // Respects RUST_LOG environment variable (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let outcome: Result<i32> = match cli.command {
        Commands::Run {
            scenario,
            format,
            keep_run_dir,
        } => commands::run::run(&scenario, &cli.config, format, keep_run_dir),
        Commands::Validate { scenario } => commands::validate::run(&scenario, &cli.config),
        Commands::Probe { scenario } => commands::probe::run(&scenario),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), err);
            if let Some(hint) = err
                .downcast_ref::<gatecheck_core::HarnessError>()
                .and_then(|e| e.recovery_suggestion())
            {
                eprintln!("{} {}", console::style("hint:").cyan(), hint);
            }
            std::process::exit(1);
        }
    }
}
