//! keel operator CLI
//!
//! Runs synthetic workloads against the dispatcher and inspects
//! configuration files.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Central task dispatcher tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a dispatcher with a synthetic multi-producer workload
    Soak {
        /// Dispatcher config file (keel.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long producers keep submitting, in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        duration_ms: u64,
        /// Number of producer threads
        #[arg(short, long, default_value_t = 4)]
        producers: usize,
        /// Cyclic tasks per producer
        #[arg(long, default_value_t = 1)]
        cyclic: usize,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a config file and print the effective settings
    Config {
        /// Config file (defaults are printed when omitted)
        file: Option<PathBuf>,
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Soak {
            config,
            duration_ms,
            producers,
            cyclic,
            json,
        } => commands::soak::execute(config, duration_ms, producers, cyclic, json),

        Commands::Config { file, json } => commands::config::execute(file, json),
    }
}
