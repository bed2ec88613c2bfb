//! Cadence command-line driver
//!
//! Usage:
//! - `cadence synth <graph.json> --workers N [-o table.cqs]`
//! - `cadence inspect <table.cqs> [--tapes]`
//! - `cadence emit <table.cqs> [--module NAME] [-o schedule.rs]`
//! - `cadence run <table.cqs> [--tags N] [--trigger 0,2 | --script tags.json]`

mod commands;

use std::process;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

use commands::{emit, inspect, run, synth};

#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Synthesize and run quasi-static multi-worker schedules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize a schedule table from a precedence graph
    Synth(synth::SynthArgs),
    /// Print the variants and tapes of a schedule table
    Inspect(inspect::InspectArgs),
    /// Write a schedule table as Rust source with static arrays
    Emit(emit::EmitArgs),
    /// Replay a schedule table with placeholder reaction bodies
    Run(run::RunArgs),
}

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cadence_runtime=info,cadence_compiler=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Synth(args) => synth::run(args),
        Commands::Inspect(args) => inspect::run(args),
        Commands::Emit(args) => emit::run(args),
        Commands::Run(args) => run::run(args),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}
