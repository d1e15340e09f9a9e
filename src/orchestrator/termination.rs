//! Graceful-then-forceful process termination, cross-platform.
//!
//! The protocol: send a graceful termination signal, poll for the process
//! to disappear within the grace period, then escalate to an
//! unconditional forced kill. `terminate` is idempotent and total — an
//! already-dead pid completes without error. Whether a termination is a
//! "pause" or a "stop" is entirely the caller's distinction.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::TerminationConfig;
use crate::{AppError, Result};

/// OS-level existence probe for a pid.
///
/// Confirms only that a process with this id exists in the process table,
/// not that it is the same logical worker the pid was recorded for.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    platform::pid_alive(pid)
}

/// Run the full termination protocol against a pid.
///
/// # Errors
///
/// Returns `AppError::TerminationTimeout` if the process survives even
/// the forced-kill step; callers log this as an anomaly and still clear
/// the persisted pid so the worker slot is not deadlocked.
pub async fn terminate(pid: u32, config: &TerminationConfig) -> Result<()> {
    if !pid_alive(pid) {
        return Ok(());
    }

    let poll = Duration::from_millis(config.poll_interval_ms);
    let grace = Duration::from_secs(config.grace_period_seconds);

    platform::send_graceful(pid);
    if wait_gone(pid, grace, poll).await {
        info!(pid, "process exited gracefully");
        return Ok(());
    }

    warn!(pid, "process survived grace period, forcing kill");
    platform::force_kill(pid);

    let force_wait = Duration::from_secs(config.force_kill_wait_seconds);
    if wait_gone(pid, force_wait, poll).await {
        info!(pid, "process exited after forced kill");
        return Ok(());
    }

    Err(AppError::TerminationTimeout(pid))
}

/// Poll until the pid disappears or the deadline passes.
async fn wait_gone(pid: u32, total: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !pid_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    fn as_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().map(Pid::from_raw)
    }

    pub fn pid_alive(pid: u32) -> bool {
        let Some(pid) = as_pid(pid) else {
            return false;
        };
        // Signal 0 probes existence. EPERM means the process exists but
        // belongs to someone else, which still counts as alive.
        matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
    }

    pub fn send_graceful(pid: u32) {
        if let Some(pid) = as_pid(pid) {
            // ESRCH here just means it is already gone.
            let _ = kill(pid, Signal::SIGTERM);
        }
    }

    pub fn force_kill(pid: u32) {
        if let Some(pid) = as_pid(pid) {
            let _ = kill(pid, Signal::SIGKILL);
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::process::Command;

    pub fn pid_alive(pid: u32) -> bool {
        let filter = format!("PID eq {pid}");
        Command::new("tasklist")
            .args(["/FI", &filter, "/NH", "/FO", "CSV"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{pid}\"")))
            .unwrap_or(false)
    }

    pub fn send_graceful(pid: u32) {
        let _ = Command::new("taskkill").args(["/PID", &pid.to_string()]).output();
    }

    pub fn force_kill(pid: u32) {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output();
    }
}
