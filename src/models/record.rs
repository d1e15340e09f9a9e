//! Durable process record: the persisted worker-to-pid mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::worker::{WorkerDescriptor, WorkerKind};

/// One row of the durable pid registry.
///
/// Invariant: `pid` is non-null iff the supervisor currently believes the
/// worker is live. The belief is re-validated against the OS by the
/// reconciliation sweep at every application startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessRecord {
    /// Stable logical worker identifier.
    pub worker_id: String,
    /// Server or client.
    pub kind: WorkerKind,
    /// Owning experiment.
    pub experiment_id: String,
    /// Population for client workers.
    pub population_id: Option<String>,
    /// OS process id, null when not believed live.
    pub pid: Option<i64>,
    /// Whether an operator asked for this worker to be running.
    pub desired_running: bool,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    /// Build a fresh record for a descriptor with no live process.
    #[must_use]
    pub fn new(descriptor: &WorkerDescriptor) -> Self {
        Self {
            worker_id: descriptor.worker_id(),
            kind: descriptor.kind,
            experiment_id: descriptor.experiment_id.clone(),
            population_id: descriptor.population_id.clone(),
            pid: None,
            desired_running: false,
            updated_at: Utc::now(),
        }
    }
}
