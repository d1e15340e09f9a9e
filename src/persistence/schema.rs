//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every supervisor startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS process_record (
    worker_id       TEXT PRIMARY KEY NOT NULL,
    kind            TEXT NOT NULL CHECK(kind IN ('server','client')),
    experiment_id   TEXT NOT NULL,
    population_id   TEXT,
    pid             INTEGER,
    desired_running INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_record_experiment ON process_record(experiment_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
