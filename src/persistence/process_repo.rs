//! Process record repository for `SQLite` persistence.
//!
//! Every writer of the pid column — start, stop, pause, the watchdog's
//! restart callback, and the startup reconciliation sweep — goes through
//! this repository. Each mutating operation is a single statement, so
//! `SQLite`'s writer serialization guarantees that two writers can never
//! disagree about which pid is currently authoritative.

use std::sync::Arc;

use chrono::Utc;

use crate::models::record::ProcessRecord;
use crate::models::worker::{WorkerDescriptor, WorkerKind};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for process records.
#[derive(Clone)]
pub struct ProcessRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ProcessRecordRow {
    worker_id: String,
    kind: String,
    experiment_id: String,
    population_id: Option<String>,
    pid: Option<i64>,
    desired_running: i64,
    updated_at: String,
}

impl ProcessRecordRow {
    /// Convert a database row into the domain model.
    fn into_record(self) -> Result<ProcessRecord> {
        let kind = parse_kind(&self.kind)?;
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(ProcessRecord {
            worker_id: self.worker_id,
            kind,
            experiment_id: self.experiment_id,
            population_id: self.population_id,
            pid: self.pid,
            desired_running: self.desired_running != 0,
            updated_at,
        })
    }
}

fn parse_kind(s: &str) -> Result<WorkerKind> {
    match s {
        "server" => Ok(WorkerKind::Server),
        "client" => Ok(WorkerKind::Client),
        other => Err(AppError::Db(format!("invalid worker kind: {other}"))),
    }
}

impl ProcessRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a freshly spawned pid for a worker, creating the row if it
    /// does not exist and marking the worker desired-running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn persist_pid(&self, descriptor: &WorkerDescriptor, pid: u32) -> Result<()> {
        let worker_id = descriptor.worker_id();
        let updated_at = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO process_record
                 (worker_id, kind, experiment_id, population_id, pid, desired_running, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(worker_id) DO UPDATE SET
                 pid = excluded.pid,
                 desired_running = 1,
                 updated_at = excluded.updated_at",
        )
        .bind(&worker_id)
        .bind(descriptor.kind.as_str())
        .bind(&descriptor.experiment_id)
        .bind(&descriptor.population_id)
        .bind(i64::from(pid))
        .bind(&updated_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Null out the pid for a worker. A no-op for unknown worker ids.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn clear_pid(&self, worker_id: &str) -> Result<()> {
        sqlx::query("UPDATE process_record SET pid = NULL, updated_at = ?1 WHERE worker_id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(worker_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Record whether an operator wants this worker running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_desired_running(&self, worker_id: &str, desired: bool) -> Result<()> {
        sqlx::query(
            "UPDATE process_record SET desired_running = ?1, updated_at = ?2 WHERE worker_id = ?3",
        )
        .bind(i64::from(desired))
        .bind(Utc::now().to_rfc3339())
        .bind(worker_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Retrieve a record by worker id.
    ///
    /// Returns `Ok(None)` if the worker has never been started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, worker_id: &str) -> Result<Option<ProcessRecord>> {
        let row: Option<ProcessRecordRow> =
            sqlx::query_as("SELECT * FROM process_record WHERE worker_id = ?1")
                .bind(worker_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ProcessRecordRow::into_record).transpose()
    }

    /// List every record still carrying a non-null pid. The startup
    /// reconciliation sweep terminates and clears each of these.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_with_pid(&self) -> Result<Vec<ProcessRecord>> {
        let rows: Vec<ProcessRecordRow> =
            sqlx::query_as("SELECT * FROM process_record WHERE pid IS NOT NULL")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ProcessRecordRow::into_record).collect()
    }

    /// Delete a worker's row entirely, used when its logical entity is
    /// deleted upstream. The caller must have stopped the worker first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn remove(&self, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM process_record WHERE worker_id = ?1")
            .bind(worker_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }
}
