//! Manager entry point: supervises one trader process per configured account.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use qtrader_common::config::AppConfig;
use qtrader_manager::manager::Manager;

#[derive(Debug, Parser)]
#[command(name = "run_manager", about = "Multi-account trading manager")]
struct Args {
    /// Application config file (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .init();

    let config: AppConfig = match std::fs::read_to_string(&args.config) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %args.config.display(), error = %e, "config invalid");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "config unreadable");
            return ExitCode::FAILURE;
        }
    };

    let manager = Manager::new(config);
    manager.start();
    info!("manager running, ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal wait failed");
    }
    manager.stop().await;
    ExitCode::SUCCESS
}
