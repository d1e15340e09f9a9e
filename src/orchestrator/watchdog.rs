//! Self-healing watchdog loop.
//!
//! One background task per application process supervises every
//! registered worker: each tick walks the registrations serially, probes
//! pid liveness, checks heartbeat-file freshness, and drives dead or hung
//! workers through their restart callback. It is the only component
//! allowed to autonomously kill-and-relaunch a worker.
//!
//! Registrations live only in memory. A deliberate stop must unregister
//! before terminating, otherwise a tick may observe the dying process and
//! restart it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::models::worker::WorkerKind;
use crate::Result;

use super::termination::pid_alive;

/// Future returned by a restart callback, yielding the replacement pid.
pub type RestartFuture = Pin<Box<dyn Future<Output = Result<u32>> + Send>>;

/// Restart callback. Must terminate any still-partially-alive remnant,
/// relaunch the worker, and re-persist the new pid before returning it.
pub type RestartFn = Arc<dyn Fn() -> RestartFuture + Send + Sync>;

/// Supervision health of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Last check saw a live, fresh worker.
    Healthy,
    /// A restart attempt is in flight this tick.
    Restarting,
    /// The restart callback failed; retried later with backoff.
    Crashed,
}

/// Per-worker supervision state, keyed by worker id in the registry map.
struct Registration {
    pid: u32,
    heartbeat_file: PathBuf,
    kind: WorkerKind,
    restart: RestartFn,
    /// Set at registration and on successful restart, not refreshed per
    /// tick; doubles as the freshness reference while the heartbeat file
    /// does not exist yet.
    last_ok: Instant,
    consecutive_failures: u32,
    next_attempt: Option<Instant>,
    health: Health,
}

/// Why a registration was routed to the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Dead,
    Hung,
}

/// Single background supervisor for all registered workers.
pub struct Watchdog {
    config: WatchdogConfig,
    registrations: Arc<Mutex<HashMap<String, Registration>>>,
    runner: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Watchdog {
    /// Create a watchdog with no registrations and no running loop.
    #[must_use]
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            registrations: Arc::new(Mutex::new(HashMap::new())),
            runner: Mutex::new(None),
        }
    }

    /// Start the polling loop. Idempotent: a second call while the loop
    /// is running is a no-op. Honors the `enabled` config flag.
    pub async fn start(&self) {
        if !self.config.enabled {
            info!("watchdog disabled by configuration");
            return;
        }

        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("watchdog already running");
            return;
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let registrations = Arc::clone(&self.registrations);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let tick = Duration::from_secs(config.tick_interval_seconds);
            loop {
                tokio::select! {
                    () = loop_cancel.cancelled() => {
                        info!("watchdog loop shutting down");
                        break;
                    }
                    () = tokio::time::sleep(tick) => {}
                }
                run_tick(&registrations, &config).await;
            }
        });

        *runner = Some((cancel, handle));
        info!(
            tick_seconds = self.config.tick_interval_seconds,
            stale_seconds = self.config.heartbeat_stale_seconds,
            "watchdog started"
        );
    }

    /// Signal the loop, join it within a bounded timeout, and discard all
    /// in-memory registrations. Persisted pids are independently
    /// reconciled at the next application startup.
    pub async fn stop(&self) {
        let runner = self.runner.lock().await.take();
        if let Some((cancel, handle)) = runner {
            cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("watchdog loop did not join within timeout");
            }
        }

        self.registrations.lock().await.clear();
        info!("watchdog stopped");
    }

    /// Register a worker for supervision. Idempotent upsert: a second
    /// call with the same id replaces the pid and callback rather than
    /// duplicating an entry.
    pub async fn register(
        &self,
        worker_id: &str,
        pid: u32,
        heartbeat_file: PathBuf,
        kind: WorkerKind,
        restart: RestartFn,
    ) {
        let mut map = self.registrations.lock().await;
        map.insert(
            worker_id.to_owned(),
            Registration {
                pid,
                heartbeat_file,
                kind,
                restart,
                last_ok: Instant::now(),
                consecutive_failures: 0,
                next_attempt: None,
                health: Health::Healthy,
            },
        );
        info!(worker = worker_id, pid, kind = kind.as_str(), "worker registered");
    }

    /// Remove a worker from supervision. Must be called before any
    /// deliberate termination so no later tick can resurrect it.
    pub async fn unregister(&self, worker_id: &str) {
        let removed = self.registrations.lock().await.remove(worker_id);
        if removed.is_some() {
            info!(worker = worker_id, "worker unregistered");
        }
    }

    /// Supervision health for a registration, if present.
    pub async fn health(&self, worker_id: &str) -> Option<Health> {
        self.registrations
            .lock()
            .await
            .get(worker_id)
            .map(|reg| reg.health)
    }

    /// Currently supervised pid for a registration, if present.
    pub async fn supervised_pid(&self, worker_id: &str) -> Option<u32> {
        self.registrations
            .lock()
            .await
            .get(worker_id)
            .map(|reg| reg.pid)
    }

    /// Run one health-check pass immediately, outside the timer.
    ///
    /// Used by tests and by operators forcing an early sweep; the
    /// periodic loop calls the same routine.
    pub async fn check_now(&self) {
        run_tick(&self.registrations, &self.config).await;
    }
}

/// One serial pass over every registration.
async fn run_tick(registrations: &Arc<Mutex<HashMap<String, Registration>>>, config: &WatchdogConfig) {
    let ids: Vec<String> = registrations.lock().await.keys().cloned().collect();

    for id in ids {
        check_one(registrations, config, &id).await;
    }
}

/// Health-check a single registration and run recovery if needed.
async fn check_one(
    registrations: &Arc<Mutex<HashMap<String, Registration>>>,
    config: &WatchdogConfig,
    worker_id: &str,
) {
    let window = Duration::from_secs(config.heartbeat_stale_seconds);

    // Short critical section: snapshot what the checks need, then mark
    // the entry restarting only if a fault is found.
    let (pid, restart, fault) = {
        let mut map = registrations.lock().await;
        let Some(reg) = map.get_mut(worker_id) else {
            return;
        };

        // A concurrent pass already owns this registration's restart; the
        // stale pid must not be classified a second time.
        if reg.health == Health::Restarting {
            return;
        }

        if let Some(next_attempt) = reg.next_attempt {
            if Instant::now() < next_attempt {
                return;
            }
        }

        let fault = classify(reg, window);
        let Some(fault) = fault else {
            reg.health = Health::Healthy;
            reg.consecutive_failures = 0;
            reg.next_attempt = None;
            return;
        };

        warn!(
            worker = worker_id,
            pid = reg.pid,
            kind = reg.kind.as_str(),
            ?fault,
            "worker fault detected"
        );
        reg.health = Health::Restarting;
        (reg.pid, Arc::clone(&reg.restart), fault)
    };

    debug!(worker = worker_id, old_pid = pid, ?fault, "invoking restart callback");
    let outcome = restart().await;

    let mut map = registrations.lock().await;
    let Some(reg) = map.get_mut(worker_id) else {
        // Deliberately stopped while the restart was in flight. The stop
        // path's termination protocol converges on whatever was spawned.
        warn!(worker = worker_id, "worker unregistered during restart");
        return;
    };

    match outcome {
        Ok(new_pid) => {
            info!(worker = worker_id, old_pid = pid, new_pid, "worker restarted");
            reg.pid = new_pid;
            reg.last_ok = Instant::now();
            reg.consecutive_failures = 0;
            reg.next_attempt = None;
            reg.health = Health::Healthy;
        }
        Err(err) => {
            reg.consecutive_failures = reg.consecutive_failures.saturating_add(1);
            let delay = backoff_delay(
                config.backoff_base_seconds,
                config.backoff_max_seconds,
                reg.consecutive_failures,
            );
            reg.next_attempt = Some(Instant::now() + delay);
            reg.health = Health::Crashed;
            warn!(
                worker = worker_id,
                failures = reg.consecutive_failures,
                retry_in_seconds = delay.as_secs(),
                %err,
                "restart callback failed"
            );
        }
    }
}

/// Classify a registration as dead, hung, or healthy.
fn classify(reg: &Registration, window: Duration) -> Option<Fault> {
    if !pid_alive(reg.pid) {
        return Some(Fault::Dead);
    }
    // Both clocks must be stale: a fresh registration gets a full window
    // to write its first heartbeat even when a stale file from the
    // previous incarnation is still on disk.
    if reg.last_ok.elapsed() > window
        && heartbeat_age(&reg.heartbeat_file).is_none_or(|age| age > window)
    {
        return Some(Fault::Hung);
    }
    None
}

/// Age of the heartbeat file's last modification, `None` if the file
/// does not exist or its metadata is unreadable.
fn heartbeat_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// Bounded exponential backoff: base doubled per consecutive failure,
/// capped, never a tight loop.
#[must_use]
pub fn backoff_delay(base_seconds: u64, max_seconds: u64, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let delay = base_seconds
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(max_seconds);
    Duration::from_secs(delay)
}
