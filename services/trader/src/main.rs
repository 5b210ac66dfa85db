//! Trader subprocess entry point: one process per trading account.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use qtrader_common::config::{AccountConfig, AppConfig};
use qtrader_trader::trader::Trader;

#[derive(Debug, Parser)]
#[command(name = "run_trader", about = "Per-account trader process")]
struct Args {
    /// Account to trade
    #[arg(long)]
    account_id: String,

    /// Application config file (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> Result<(AccountConfig, PathBuf), String> {
    let app: AppConfig = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("config {} unreadable: {e}", path.display()))?;
            serde_json::from_str(&raw)
                .map_err(|e| format!("config {} invalid: {e}", path.display()))?
        }
        None => AppConfig::default(),
    };

    let account = match app.account(&args.account_id) {
        Some(account) => account.clone(),
        None if args.config.is_none() => {
            // No config file: run a default sim account under this id.
            let mut account = AccountConfig {
                account_id: args.account_id.clone(),
                enabled: true,
                auto_spawn: false,
                debug: args.debug,
                trading: Default::default(),
                gateway: Default::default(),
                strategies: Default::default(),
            };
            account.gateway.kind = "sim".to_string();
            account
        }
        None => {
            return Err(format!(
                "account {} not present in config",
                args.account_id
            ))
        }
    };
    Ok((account, app.socket.socket_dir))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let (account, socket_dir) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    info!(account_id = %args.account_id, "trader starting");
    let trader = match Trader::start(account, socket_dir).await {
        Ok(trader) => trader,
        Err(e) => {
            error!(error = %e, "trader failed to start");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "signal handler install failed");
            trader.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("terminate received"),
    }

    trader.shutdown().await;
    // Signal-driven stops exit nonzero so supervisors notice.
    ExitCode::FAILURE
}
