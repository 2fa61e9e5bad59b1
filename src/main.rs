//! Binary entry point for storechain.
//!
//! Operates a configured chain of document stores from the command line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use storechain::StoreChainConfig;
use storechain::cli::{self, Command};
use storechain::observability;

/// Storechain - typed records through a chain of storage levels.
#[derive(Parser)]
#[command(name = "storechain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "STORECHAIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match StoreChainConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let logging = config.logging.clone().with_verbose(cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command, writing results to stdout.
async fn run_command(command: Command, config: &StoreChainConfig) -> anyhow::Result<()> {
    let name = format!("{command:?}");
    let mut stdout = std::io::stdout().lock();
    cli::run(command, config, &mut stdout)
        .await
        .with_context(|| format!("command failed: {name}"))?;
    stdout.flush().context("failed to flush output")?;
    Ok(())
}
