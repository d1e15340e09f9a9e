#![forbid(unsafe_code)]

//! `sim-warden` — supervisor binary.
//!
//! Bootstraps configuration, connects the pid registry database, runs
//! the startup reconciliation sweep, starts the watchdog loop, and
//! waits for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sim_warden::config::GlobalConfig;
use sim_warden::orchestrator::supervisor::Supervisor;
use sim_warden::persistence::db;
use sim_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sim-warden", about = "Simulation worker supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("sim-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    info!("configuration loaded");

    let database = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let supervisor = Arc::new(Supervisor::new(Arc::clone(&config), database));

    // Stale pids from a previous run must be cleared before the watchdog
    // can adopt anything.
    supervisor.reconcile_at_startup().await?;
    supervisor.start_watchdog().await;
    info!("supervisor ready");

    shutdown_signal().await;
    info!("shutdown signal received");

    supervisor.shutdown().await;
    info!("sim-warden shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
