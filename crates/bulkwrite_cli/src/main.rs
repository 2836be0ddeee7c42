//! Bulkwrite CLI
//!
//! Command-line tools for exercising the bulk mutation retry engine.
//!
//! # Commands
//!
//! - `simulate` - Apply a batch against the in-memory emulator with injected faults
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::{FaultOptions, SimulateOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bulkwrite command-line tools.
#[derive(Parser)]
#[command(name = "bulkwrite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a batch against the in-memory emulator
    Simulate {
        /// Fully qualified table name
        #[arg(short, long, default_value = "projects/demo/instances/demo/tables/events")]
        table: String,

        /// Number of generated rows (ignored with --input)
        #[arg(short, long, default_value = "100")]
        rows: usize,

        /// Every n-th generated row writes a server-stamped cell (0 disables)
        #[arg(long, default_value = "0")]
        stamped_every: usize,

        /// JSON file with the rows to apply
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Seed for fault injection
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Probability of a transient per-entry rejection
        #[arg(long, default_value = "0.0")]
        transient_rate: f64,

        /// Probability of applying an entry but reporting a timeout
        #[arg(long, default_value = "0.0")]
        lost_ack_rate: f64,

        /// Probability of a permanent per-entry rejection
        #[arg(long, default_value = "0.0")]
        permanent_rate: f64,

        /// Probability of cutting a response stream short
        #[arg(long, default_value = "0.0")]
        truncate_rate: f64,

        /// Deliver entry statuses out of order
        #[arg(long)]
        shuffle: bool,

        /// Maximum number of retryable failures before giving up
        #[arg(short, long, default_value = "10")]
        max_retries: u32,

        /// Initial backoff delay in milliseconds (0 disables backoff)
        #[arg(long, default_value = "0")]
        backoff_ms: u64,

        /// Replay every mutation, including server-stamped cells
        #[arg(long)]
        always_retry: bool,

        /// Exit with an error if any mutation failed
        #[arg(long)]
        strict: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_directive(cli.verbose)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            table,
            rows,
            stamped_every,
            input,
            seed,
            transient_rate,
            lost_ack_rate,
            permanent_rate,
            truncate_rate,
            shuffle,
            max_retries,
            backoff_ms,
            always_retry,
            strict,
            format,
        } => {
            let options = SimulateOptions {
                table,
                rows,
                stamped_every,
                input,
                faults: FaultOptions {
                    seed,
                    transient_rate,
                    lost_ack_rate,
                    permanent_rate,
                    truncate_rate,
                    shuffle,
                },
                max_retries,
                backoff_ms,
                always_retry,
                strict,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("bulkwrite CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("bulkwrite engine v{}", bulkwrite_engine::VERSION);
        }
    }

    Ok(())
}
