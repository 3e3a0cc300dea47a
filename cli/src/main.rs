//! Credit-network simulator CLI
//!
//! Two entry points, per the core's external contract:
//! - `validate`: build the scenario, apply the setup actions, run the
//!   invariant check, report pass/fail.
//! - `run`: execute the full day loop to termination and write the run
//!   export (events + balances + metrics) as JSON.
//!
//! Exit status communicates success or fatal failure, not partial outcomes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use creditnet_core::{Orchestrator, Scenario};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "creditnet", about = "Multi-agent credit-network settlement simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a scenario file: setup actions plus the invariant check.
    Validate {
        /// Scenario JSON file
        scenario: PathBuf,
    },
    /// Run a scenario to termination and export the results.
    Run {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Output path for the run export (JSON). Defaults to stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn load_scenario(path: &PathBuf) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading scenario file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario file {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { scenario } => {
            let scenario = load_scenario(&scenario)?;
            Orchestrator::new(scenario).context("scenario validation failed")?;
            info!("scenario valid");
            println!("ok");
            Ok(())
        }
        Command::Run { scenario, out } => {
            let scenario = load_scenario(&scenario)?;
            let orchestrator = Orchestrator::new(scenario).context("scenario setup failed")?;
            let export = orchestrator
                .run_to_completion()
                .context("simulation failed")?;

            info!(
                run_id = %export.run_id,
                days = export.days_run,
                stop = ?export.stop_reason,
                events = export.events.len(),
                "run complete"
            );

            let json = serde_json::to_string_pretty(&export).context("serializing export")?;
            match out {
                Some(path) => fs::write(&path, json)
                    .with_context(|| format!("writing export to {}", path.display()))?,
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}
