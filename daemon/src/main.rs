//! intake daemon binary
//!
//! Accepts TCP connections and appends each connection's byte stream to
//! a durable append-only log.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use intaked::bootstrap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "intaked")]
#[command(about = "A daemon that appends incoming TCP byte streams to a durable log")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind, overriding the config file
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Append log path, overriding the config file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = intake_core::utils::init_tracing(&cli.log_level) {
        eprintln!("{}", e);
        return ExitCode::from(2);
    }

    info!("Starting intake daemon");

    let config = match bootstrap::resolve_config(
        cli.config.as_deref(),
        cli.host,
        cli.port,
        cli.log_file,
    ) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match bootstrap::run(config).await {
        Ok(()) => {
            info!("Daemon stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Daemon failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
