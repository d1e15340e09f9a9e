//! Worker model and lifecycle helpers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the log file a worker appends to as its heartbeat.
///
/// The watchdog inspects only this file's modification time, never its
/// content.
pub const HEARTBEAT_FILE_NAME: &str = "heartbeat.log";

/// Kind of supervised worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Serves one experiment's simulation protocol.
    Server,
    /// Drives one population through simulated activity.
    Client,
}

impl WorkerKind {
    /// Stable string form used in the database and in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// Externally visible lifecycle state of a worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No live process and no intent to run.
    Stopped,
    /// Start command in progress (spawn + handshake).
    Starting,
    /// Live process under watchdog supervision.
    Running,
    /// Pause command in progress.
    Pausing,
    /// Terminated with accumulated state intact; resumable.
    Paused,
    /// Start with resume in progress.
    Resuming,
    /// Stop command in progress.
    Stopping,
    /// Watchdog-autonomous kill-and-relaunch window.
    Restarting,
    /// Watchdog exhausted its restart attempts; awaiting backoff retry.
    Crashed,
}

impl LifecycleState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped | Self::Crashed, Self::Starting)
                | (Self::Starting | Self::Resuming, Self::Running | Self::Stopped)
                | (
                    Self::Running,
                    Self::Pausing | Self::Stopping | Self::Restarting
                )
                | (Self::Pausing, Self::Paused)
                | (Self::Paused, Self::Resuming | Self::Stopping)
                | (Self::Restarting, Self::Running | Self::Crashed)
                | (Self::Crashed, Self::Restarting | Self::Stopping)
                | (Self::Stopping | Self::Pausing, Self::Stopped)
        )
    }
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Whether the supervisor currently believes the worker is live.
    pub running: bool,
    /// Persisted OS process id, if any.
    pub pid: Option<i64>,
    /// Derived lifecycle state.
    pub state: LifecycleState,
}

/// Identity and launch parameters for one logical worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerDescriptor {
    /// Server or client.
    pub kind: WorkerKind,
    /// Owning experiment.
    pub experiment_id: String,
    /// Population driven by a client worker; `None` for servers.
    pub population_id: Option<String>,
    /// Client instance id within the experiment; `None` for servers.
    pub client_id: Option<String>,
    /// Local port the server worker's control endpoint listens on.
    pub control_port: u16,
    /// Whether a client start should resume accumulated state.
    pub resume: bool,
}

impl WorkerDescriptor {
    /// Descriptor for an experiment's server worker.
    #[must_use]
    pub fn server(experiment_id: impl Into<String>, control_port: u16) -> Self {
        Self {
            kind: WorkerKind::Server,
            experiment_id: experiment_id.into(),
            population_id: None,
            client_id: None,
            control_port,
            resume: false,
        }
    }

    /// Descriptor for a population's client worker.
    #[must_use]
    pub fn client(
        experiment_id: impl Into<String>,
        client_id: impl Into<String>,
        population_id: impl Into<String>,
        resume: bool,
    ) -> Self {
        Self {
            kind: WorkerKind::Client,
            experiment_id: experiment_id.into(),
            population_id: Some(population_id.into()),
            client_id: Some(client_id.into()),
            control_port: 0,
            resume,
        }
    }

    /// Stable identifier unique per logical worker, used as the database
    /// key and the watchdog registration key.
    #[must_use]
    pub fn worker_id(&self) -> String {
        match (&self.kind, &self.population_id) {
            (WorkerKind::Server, _) => format!("server-{}", self.experiment_id),
            (WorkerKind::Client, Some(population)) => {
                format!("client-{}-{}", self.experiment_id, population)
            }
            (WorkerKind::Client, None) => format!("client-{}", self.experiment_id),
        }
    }

    /// Heartbeat file path inside the worker's log directory.
    #[must_use]
    pub fn heartbeat_file(&self, log_dir: &Path) -> PathBuf {
        log_dir.join(HEARTBEAT_FILE_NAME)
    }
}
