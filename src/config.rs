//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Storage engine the simulation workers write their data to.
///
/// The supervisor itself never opens this storage; the kind only decides
/// the server launch form and is forwarded to clients as a positional
/// argument.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Embedded single-writer engine; the server worker must be the only
    /// OS process driving it.
    Sqlite,
    /// Server-class multi-client engine; tolerates a multi-worker front end.
    Postgres,
}

impl BackendKind {
    /// Stable string form passed to workers on their command line.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Simulation storage backend settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Which engine the workers use.
    pub kind: BackendKind,
    /// Path to the embedded database file (sqlite backend).
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// Front-end launch command for the multi-worker path (postgres
    /// backend), e.g. `["gunicorn", "sim_server.wsgi"]`.
    #[serde(default)]
    pub app_server_command: Vec<String>,
}

/// Worker launch settings: entry points and post-launch handshake budgets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LauncherConfig {
    /// Entry script for server workers.
    pub server_entry: PathBuf,
    /// Entry script for client workers.
    pub client_entry: PathBuf,
    /// Server worker configuration file passed as a launch argument.
    pub server_config: PathBuf,
    /// Warm-up delay before the one-shot storage push (sqlite path).
    #[serde(default = "default_warmup_seconds")]
    pub warmup_seconds: u64,
    /// Liveness poll attempts for the multi-worker front end (postgres path).
    #[serde(default = "default_health_retries")]
    pub health_retries: u32,
    /// Delay between liveness poll attempts.
    #[serde(default = "default_health_retry_interval_ms")]
    pub health_retry_interval_ms: u64,
    /// Per-request timeout for handshake HTTP calls.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_warmup_seconds() -> u64 {
    2
}

fn default_health_retries() -> u32 {
    10
}

fn default_health_retry_interval_ms() -> u64 {
    500
}

fn default_request_timeout_seconds() -> u64 {
    5
}

/// Graceful-then-forceful termination protocol timings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminationConfig {
    /// How long to wait for a graceful exit before escalating.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
    /// Interval between liveness polls while waiting for exit.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for the process to disappear after a forced kill.
    #[serde(default = "default_force_kill_wait_seconds")]
    pub force_kill_wait_seconds: u64,
}

fn default_grace_period_seconds() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_force_kill_wait_seconds() -> u64 {
    2
}

/// Watchdog supervision loop settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchdogConfig {
    /// Whether the supervision loop runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval between health-check ticks.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Heartbeat file age beyond which a live pid is classified Hung.
    #[serde(default = "default_heartbeat_stale_seconds")]
    pub heartbeat_stale_seconds: u64,
    /// Base delay for exponential restart backoff.
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    /// Cap on the restart backoff delay.
    #[serde(default = "default_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_seconds() -> u64 {
    10
}

fn default_heartbeat_stale_seconds() -> u64 {
    120
}

fn default_backoff_base_seconds() -> u64 {
    5
}

fn default_backoff_max_seconds() -> u64 {
    300
}

fn default_interpreter() -> String {
    "python3".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the supervisor's own `SQLite` database file.
    pub db_path: PathBuf,
    /// Root directory under which each worker gets its log directory.
    pub log_root: PathBuf,
    /// Interpreter used when no isolated runtime environment is detected.
    /// Either an absolute path or a whitespace-separated launch command.
    #[serde(default = "default_interpreter")]
    pub default_interpreter: String,
    /// Simulation storage backend.
    pub backend: BackendConfig,
    /// Worker launch settings.
    pub launcher: LauncherConfig,
    /// Termination protocol timings.
    #[serde(default = "default_termination")]
    pub termination: TerminationConfig,
    /// Watchdog loop settings.
    #[serde(default = "default_watchdog")]
    pub watchdog: WatchdogConfig,
}

fn default_termination() -> TerminationConfig {
    TerminationConfig {
        grace_period_seconds: default_grace_period_seconds(),
        poll_interval_ms: default_poll_interval_ms(),
        force_kill_wait_seconds: default_force_kill_wait_seconds(),
    }
}

fn default_watchdog() -> WatchdogConfig {
    WatchdogConfig {
        enabled: true,
        tick_interval_seconds: default_tick_interval_seconds(),
        heartbeat_stale_seconds: default_heartbeat_stale_seconds(),
        backoff_base_seconds: default_backoff_base_seconds(),
        backoff_max_seconds: default_backoff_max_seconds(),
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Log directory for a worker, created on demand by the launcher.
    #[must_use]
    pub fn worker_log_dir(&self, worker_id: &str) -> PathBuf {
        self.log_root.join(worker_id)
    }

    fn validate(&self) -> Result<()> {
        if self.default_interpreter.trim().is_empty() {
            return Err(AppError::Config(
                "default_interpreter must not be empty".into(),
            ));
        }

        if self.watchdog.tick_interval_seconds == 0 {
            return Err(AppError::Config(
                "watchdog.tick_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.watchdog.heartbeat_stale_seconds == 0 {
            return Err(AppError::Config(
                "watchdog.heartbeat_stale_seconds must be greater than zero".into(),
            ));
        }

        if self.watchdog.backoff_base_seconds == 0 {
            return Err(AppError::Config(
                "watchdog.backoff_base_seconds must be greater than zero".into(),
            ));
        }

        if self.termination.grace_period_seconds == 0 {
            return Err(AppError::Config(
                "termination.grace_period_seconds must be greater than zero".into(),
            ));
        }

        if self.termination.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "termination.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.backend.kind == BackendKind::Sqlite && self.backend.sqlite_path.is_none() {
            return Err(AppError::Config(
                "backend.sqlite_path is required for the sqlite backend".into(),
            ));
        }

        if self.backend.kind == BackendKind::Postgres && self.backend.app_server_command.is_empty()
        {
            return Err(AppError::Config(
                "backend.app_server_command is required for the postgres backend".into(),
            ));
        }

        Ok(())
    }
}
