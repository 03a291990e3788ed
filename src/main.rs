//! # Main — CLI Entry Point
//!
//! Parses global options, initializes logging, and routes subcommands to the
//! execution functions in `cli.rs`.
//!
//! ## Subcommands
//!
//! - `run`: log in and walk the range collection, allocating numbers.
//! - `status`: print the saved progress record.
//! - `reset`: delete the saved progress record.
//! - `check`: log in, verify the session, and print the range count.
//!
//! ## Global Options
//!
//! - `--config`: TOML file with tuning overrides (delays, timeouts, endpoints).
//! - `--base-url` / `RANGEFILL_BASE_URL`: service root of the panel.
//! - `--username`, `--password` / `RANGEFILL_USERNAME`, `RANGEFILL_PASSWORD`.
//! - `--progress-file`: JSON file for resumable run state.
//! - `--target`, `--page-size`: per-range target and enumeration page size.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rangefill", about = "Top up every range on a number panel to a target count")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "RANGEFILL_CONFIG")]
    config: Option<PathBuf>,

    /// Service root of the panel (e.g. https://panel.example.com/ints/)
    #[arg(long, env = "RANGEFILL_BASE_URL")]
    base_url: Option<String>,

    /// Panel account username
    #[arg(long, env = "RANGEFILL_USERNAME")]
    username: Option<String>,

    /// Panel account password
    #[arg(long, env = "RANGEFILL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to the progress file used for resuming runs
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Numbers each range should hold
    #[arg(long)]
    target: Option<u32>,

    /// Ranges fetched per enumeration page
    #[arg(long)]
    page_size: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk every range and allocate numbers up to the target
    Run,
    /// Show the saved progress record
    Status,
    /// Delete the saved progress record
    Reset,
    /// Log in and report the range count without allocating
    Check,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run => cli::run_harvest(&cli),
        Commands::Status => cli::run_status(&cli),
        Commands::Reset => cli::run_reset(&cli),
        Commands::Check => cli::run_check(&cli),
    }
}
