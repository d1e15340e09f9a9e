//! Post-launch handshake with a spawned server worker.
//!
//! Two forms, matching the two launch forms: a one-shot local control
//! call pushing the resolved storage location (single-writer backend), or
//! a bounded liveness poll against the front end's health endpoint
//! (multi-worker backend, which may take variable time to accept
//! connections). Every wait here is bounded.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use crate::config::{BackendKind, GlobalConfig};
use crate::models::worker::WorkerDescriptor;
use crate::{AppError, Result};

/// Run the handshake appropriate for the configured backend.
///
/// Idempotent: re-running it against an already-configured worker is
/// harmless, which is what makes a stop racing an in-flight start safe.
///
/// # Errors
///
/// Returns `AppError::Handshake` if the control call fails or the health
/// poll budget is exhausted.
pub async fn run(descriptor: &WorkerDescriptor, config: &GlobalConfig) -> Result<()> {
    match config.backend.kind {
        BackendKind::Sqlite => push_storage_location(descriptor, config).await,
        BackendKind::Postgres => await_health(descriptor, config).await,
    }
}

/// Bounded warm-up delay, then a one-shot local control call telling the
/// worker where its embedded database lives.
///
/// # Errors
///
/// Returns `AppError::Handshake` if the control call fails, or
/// `AppError::Config` if no sqlite path is configured.
pub async fn push_storage_location(
    descriptor: &WorkerDescriptor,
    config: &GlobalConfig,
) -> Result<()> {
    let sqlite_path = config
        .backend
        .sqlite_path
        .as_ref()
        .ok_or_else(|| AppError::Config("backend.sqlite_path is not set".into()))?;

    tokio::time::sleep(Duration::from_secs(config.launcher.warmup_seconds)).await;

    let url = format!(
        "http://127.0.0.1:{}/control/storage",
        descriptor.control_port
    );
    let body = json!({ "path": sqlite_path.to_string_lossy() });

    let response = client(config)?
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|err| AppError::Handshake(format!("storage push to {url} failed: {err}")))?;

    if !response.status().is_success() {
        return Err(AppError::Handshake(format!(
            "storage push to {url} returned {}",
            response.status()
        )));
    }

    info!(worker = %descriptor.worker_id(), port = descriptor.control_port, "storage location pushed");
    Ok(())
}

/// Poll the front end's liveness endpoint with a bounded retry budget.
///
/// # Errors
///
/// Returns `AppError::Handshake` when every attempt fails.
pub async fn await_health(descriptor: &WorkerDescriptor, config: &GlobalConfig) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/health", descriptor.control_port);
    let interval = Duration::from_millis(config.launcher.health_retry_interval_ms);
    let client = client(config)?;

    for attempt in 1..=config.launcher.health_retries {
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(worker = %descriptor.worker_id(), attempt, "front end is live");
                return Ok(());
            }
            Ok(response) => {
                debug!(attempt, status = %response.status(), "health probe not ready");
            }
            Err(err) => {
                debug!(attempt, %err, "health probe connection failed");
            }
        }
        tokio::time::sleep(interval).await;
    }

    Err(AppError::Handshake(format!(
        "front end at {url} not live after {} attempts",
        config.launcher.health_retries
    )))
}

fn client(config: &GlobalConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.launcher.request_timeout_seconds))
        .build()
        .map_err(|err| AppError::Handshake(format!("failed to build http client: {err}")))
}
