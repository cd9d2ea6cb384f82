//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send documents to every contact in a list
    Send {
        /// Contact list (JSON array)
        #[arg(long)]
        contacts: PathBuf,
        /// Contacts per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Seconds between two documents
        #[arg(long)]
        pdf_interval: Option<f64>,
        /// Seconds between two batches
        #[arg(long)]
        batch_interval: Option<f64>,
        /// Share of simulated delivery failures (0.0 - 1.0)
        #[arg(long)]
        failure_rate: Option<f64>,
        /// Simulated send latency in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,
        /// Retry failed contacts once the list is done
        #[arg(long)]
        retry_failed: bool,
    },
    /// Check a contact list without sending
    Validate {
        /// Contact list (JSON array)
        #[arg(long)]
        contacts: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}
