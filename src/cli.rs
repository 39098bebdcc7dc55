//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chronix CLI.
#[derive(Parser)]
#[command(name = "chronix")]
#[command(about = "Durable scheduler for deferred and recurring tasks")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/chronix.toml", global = true, env = "CHRONIX_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler and HTTP server in foreground (default)
    Run {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the configuration file and exit
    Check,
}
