//! Worker lifecycle supervision facade.
//!
//! One `Supervisor` is constructed at application startup and injected
//! into whatever needs to drive workers; there are no module-level
//! globals. It owns the durable pid registry, the watchdog, and the
//! start/pause/stop/status operations collaborators call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, info_span, warn};

use crate::config::GlobalConfig;
use crate::models::worker::{LifecycleState, WorkerDescriptor, WorkerKind, WorkerStatus};
use crate::persistence::db::Database;
use crate::persistence::process_repo::ProcessRepo;
use crate::{AppError, Result};

use super::watchdog::{Health, RestartFn, Watchdog};
use super::{environment, handshake, spawner, termination};

/// Application-wide worker supervisor.
pub struct Supervisor {
    config: Arc<GlobalConfig>,
    repo: ProcessRepo,
    watchdog: Arc<Watchdog>,
    /// In-memory lifecycle overlay: transitional states around in-flight
    /// operations, plus the sticky `Paused` marker. Never persisted.
    overlay: Mutex<HashMap<String, LifecycleState>>,
}

impl Supervisor {
    /// Build a supervisor over a connected database.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, db: Arc<Database>) -> Self {
        let watchdog = Arc::new(Watchdog::new(config.watchdog.clone()));
        Self {
            config,
            repo: ProcessRepo::new(db),
            watchdog,
            overlay: Mutex::new(HashMap::new()),
        }
    }

    /// The watchdog supervising this instance's workers.
    #[must_use]
    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    /// The durable pid registry.
    #[must_use]
    pub fn repo(&self) -> &ProcessRepo {
        &self.repo
    }

    /// Reconciliation sweep: run the full termination protocol against
    /// every persisted pid left over from a previous run, then
    /// unconditionally clear it. Must complete before the watchdog
    /// starts so no stale pid is ever reported as running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be read or written.
    pub async fn reconcile_at_startup(&self) -> Result<()> {
        let span = info_span!("reconcile_at_startup");
        let _guard = span.enter();

        let stale = self.repo.list_with_pid().await?;
        let count = stale.len();

        for record in stale {
            let Some(pid) = record.pid.and_then(|p| u32::try_from(p).ok()) else {
                self.repo.clear_pid(&record.worker_id).await?;
                continue;
            };

            if let Err(err) = termination::terminate(pid, &self.config.termination).await {
                warn!(worker = %record.worker_id, pid, %err, "stale process survived reconciliation kill");
            }
            self.repo.clear_pid(&record.worker_id).await?;
            info!(worker = %record.worker_id, pid, "stale pid reconciled");
        }

        info!(count, "startup reconciliation complete");
        Ok(())
    }

    /// Start the watchdog loop. Call once, after `reconcile_at_startup`.
    pub async fn start_watchdog(&self) {
        self.watchdog.start().await;
    }

    /// Start a worker: resolve the interpreter, spawn detached, persist
    /// the pid, run the post-launch handshake, and register with the
    /// watchdog.
    ///
    /// # Errors
    ///
    /// Returns `AppError::EnvironmentResolution` or `AppError::Spawn`
    /// synchronously with their concrete cause; `AppError::Handshake` if
    /// the worker never became reachable (the spawned process is then
    /// terminated and its pid cleared); `AppError::Config` if the worker
    /// is already running.
    pub async fn start(&self, descriptor: &WorkerDescriptor) -> Result<u32> {
        let worker_id = descriptor.worker_id();
        let span = info_span!("start_worker", worker = %worker_id);
        let _guard = span.enter();

        if self.status(descriptor).await?.running {
            return Err(AppError::Config(format!(
                "worker {worker_id} is already running"
            )));
        }

        let transitional = if descriptor.resume {
            LifecycleState::Resuming
        } else {
            LifecycleState::Starting
        };
        self.overlay
            .lock()
            .await
            .insert(worker_id.clone(), transitional);

        let result = self.spawn_and_persist(descriptor).await;
        let pid = match result {
            Ok(pid) => pid,
            Err(err) => {
                self.overlay.lock().await.remove(&worker_id);
                return Err(err);
            }
        };

        let restart = self.restart_callback(descriptor);
        let log_dir = self.config.worker_log_dir(&worker_id);
        self.watchdog
            .register(
                &worker_id,
                pid,
                descriptor.heartbeat_file(&log_dir),
                descriptor.kind,
                restart,
            )
            .await;

        self.overlay.lock().await.remove(&worker_id);
        info!(pid, "worker started");
        Ok(pid)
    }

    /// Stop a worker: unregister from the watchdog first so no tick can
    /// resurrect it, then terminate and clear the persisted pid. The pid
    /// is cleared even when the process survives the forced kill, so the
    /// worker slot cannot deadlock future starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be updated.
    pub async fn stop(&self, descriptor: &WorkerDescriptor) -> Result<()> {
        let worker_id = descriptor.worker_id();
        let span = info_span!("stop_worker", worker = %worker_id);
        let _guard = span.enter();

        self.overlay
            .lock()
            .await
            .insert(worker_id.clone(), LifecycleState::Stopping);

        let outcome = self.unregister_and_terminate(&worker_id).await;
        self.repo.set_desired_running(&worker_id, false).await?;
        self.overlay.lock().await.remove(&worker_id);

        outcome?;
        info!("worker stopped");
        Ok(())
    }

    /// Pause a client worker: the same unregister/terminate/clear
    /// protocol as stop, but the worker's accumulated state stays intact
    /// so a future start with `resume = true` can pick it up.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for server workers, which cannot be
    /// paused; `AppError::Db` if the registry cannot be updated.
    pub async fn pause(&self, descriptor: &WorkerDescriptor) -> Result<()> {
        if descriptor.kind != WorkerKind::Client {
            return Err(AppError::Config(
                "only client workers can be paused".into(),
            ));
        }

        let worker_id = descriptor.worker_id();
        let span = info_span!("pause_worker", worker = %worker_id);
        let _guard = span.enter();

        self.overlay
            .lock()
            .await
            .insert(worker_id.clone(), LifecycleState::Pausing);

        let outcome = self.unregister_and_terminate(&worker_id).await;
        self.repo.set_desired_running(&worker_id, false).await?;
        self.overlay
            .lock()
            .await
            .insert(worker_id.clone(), LifecycleState::Paused);

        outcome?;
        info!("worker paused");
        Ok(())
    }

    /// Stop a worker and delete its registry row, for logical deletion
    /// of the worker's owning entity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be updated.
    pub async fn remove(&self, descriptor: &WorkerDescriptor) -> Result<()> {
        self.stop(descriptor).await?;
        let worker_id = descriptor.worker_id();
        self.repo.remove(&worker_id).await?;
        self.overlay.lock().await.remove(&worker_id);
        Ok(())
    }

    /// Current status of a worker, derived from the persisted record,
    /// the watchdog's health view, and the transitional overlay. A
    /// worker with no record reports as stopped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be read.
    pub async fn status(&self, descriptor: &WorkerDescriptor) -> Result<WorkerStatus> {
        let worker_id = descriptor.worker_id();
        let record = self.repo.get(&worker_id).await?;
        let pid = record.as_ref().and_then(|r| r.pid);

        if let Some(state) = self.overlay.lock().await.get(&worker_id).copied() {
            let running = matches!(
                state,
                LifecycleState::Running | LifecycleState::Restarting
            );
            return Ok(WorkerStatus {
                running,
                pid,
                state,
            });
        }

        // The watchdog's view wins even with no persisted pid: a failed
        // restart clears the pid but keeps the registration crashed.
        let state = match self.watchdog.health(&worker_id).await {
            Some(Health::Crashed) => LifecycleState::Crashed,
            Some(Health::Restarting) => LifecycleState::Restarting,
            _ if pid.is_some() => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        };

        Ok(WorkerStatus {
            running: matches!(
                state,
                LifecycleState::Running | LifecycleState::Restarting
            ),
            pid,
            state,
        })
    }

    /// Tear down the supervisor: stop the watchdog and discard its
    /// registrations. Persisted pids are left for the next startup's
    /// reconciliation sweep.
    pub async fn shutdown(&self) {
        self.watchdog.stop().await;
    }

    /// Terminate any persisted remnant, relaunch, persist the new pid,
    /// and re-run the handshake. Shared by `start` and the watchdog's
    /// restart callback.
    async fn spawn_and_persist(&self, descriptor: &WorkerDescriptor) -> Result<u32> {
        spawn_and_persist(&self.config, &self.repo, descriptor).await
    }

    async fn unregister_and_terminate(&self, worker_id: &str) -> Result<()> {
        self.watchdog.unregister(worker_id).await;

        let record = self.repo.get(worker_id).await?;
        let Some(pid) = record.and_then(|r| r.pid).and_then(|p| u32::try_from(p).ok()) else {
            return Ok(());
        };

        let outcome = termination::terminate(pid, &self.config.termination).await;
        if let Err(ref err) = outcome {
            // Anomaly: pid is cleared regardless so future starts are
            // not deadlocked on this worker slot.
            warn!(pid, %err, "termination protocol did not confirm exit");
        }
        self.repo.clear_pid(worker_id).await?;
        Ok(())
    }

    /// Build the watchdog restart callback for a descriptor. The
    /// callback terminates any still-partially-alive remnant, relaunches
    /// via the spawner, and re-persists the new pid.
    fn restart_callback(&self, descriptor: &WorkerDescriptor) -> RestartFn {
        let config = Arc::clone(&self.config);
        let repo = self.repo.clone();
        let descriptor = descriptor.clone();

        Arc::new(move || {
            let config = Arc::clone(&config);
            let repo = repo.clone();
            let descriptor = descriptor.clone();
            Box::pin(async move { spawn_and_persist(&config, &repo, &descriptor).await })
        })
    }
}

/// Terminate any persisted remnant for this worker, spawn a fresh
/// process, persist its pid, and run the post-launch handshake. On
/// handshake failure the fresh process is terminated and the pid cleared
/// before the error propagates.
async fn spawn_and_persist(
    config: &Arc<GlobalConfig>,
    repo: &ProcessRepo,
    descriptor: &WorkerDescriptor,
) -> Result<u32> {
    let worker_id = descriptor.worker_id();

    if let Some(remnant) = repo
        .get(&worker_id)
        .await?
        .and_then(|r| r.pid)
        .and_then(|p| u32::try_from(p).ok())
    {
        if let Err(err) = termination::terminate(remnant, &config.termination).await {
            warn!(pid = remnant, %err, "remnant survived termination before relaunch");
        }
        repo.clear_pid(&worker_id).await?;
    }

    let invocation = environment::resolve(config)?;
    let pid = spawner::launch(&invocation, descriptor, config)?;
    repo.persist_pid(descriptor, pid).await?;

    if descriptor.kind == WorkerKind::Server {
        if let Err(err) = handshake::run(descriptor, config).await {
            warn!(pid, %err, "handshake failed, terminating fresh worker");
            if let Err(kill_err) = termination::terminate(pid, &config.termination).await {
                warn!(pid, %kill_err, "failed to terminate worker after handshake failure");
            }
            repo.clear_pid(&worker_id).await?;
            return Err(err);
        }
    }

    Ok(pid)
}
