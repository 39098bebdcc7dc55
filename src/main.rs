//! Chronix - durable scheduler for deferred and recurring tasks.
//!
//! Main entry point for the Chronix CLI and server.

mod cli;
mod server;

use clap::Parser;

use chronix_config::{ConfigLoader, ConfigValidator};

use crate::cli::{Cli, Commands};
use crate::server::{init_tracing, run_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Check) => {
            let warnings = ConfigValidator::validate(&config).into_result()?;
            for warning in &warnings {
                println!("warning: {}: {}", warning.path, warning.message);
            }
            println!("{}: ok", cli.config.display());
            Ok(())
        }
        Some(Commands::Run { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(&config.logging)?;
            run_server(config).await
        }
        None => {
            init_tracing(&config.logging)?;
            run_server(config).await
        }
    }
}
