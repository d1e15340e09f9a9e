//! Hung-worker detection tests: a live pid with a stale heartbeat is
//! killed and relaunched.

#![cfg(unix)]

use std::time::Duration;

use sim_warden::models::worker::WorkerDescriptor;
use sim_warden::orchestrator::termination::pid_alive;

use super::test_helpers::harness_with_stale;

#[tokio::test]
async fn stale_heartbeat_file_triggers_a_restart() {
    let h = harness_with_stale(1).await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    let worker_id = descriptor.worker_id();

    let old_pid = h.supervisor.start(&descriptor).await.expect("start");
    h.touch_heartbeat(&worker_id);

    // Process stays alive but its heartbeat ages past the window.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    h.supervisor.watchdog().check_now().await;

    let new_pid = h
        .supervisor
        .watchdog()
        .supervised_pid(&worker_id)
        .await
        .expect("still supervised");
    assert_ne!(new_pid, old_pid);
    assert!(pid_alive(new_pid));
    assert!(!pid_alive(old_pid), "hung remnant must be terminated");

    h.supervisor.stop(&descriptor).await.expect("stop");
}

#[tokio::test]
async fn missing_heartbeat_file_counts_as_stale_after_the_window() {
    let h = harness_with_stale(1).await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    let worker_id = descriptor.worker_id();

    // The worker never writes a heartbeat at all.
    let old_pid = h.supervisor.start(&descriptor).await.expect("start");
    tokio::time::sleep(Duration::from_millis(1300)).await;
    h.supervisor.watchdog().check_now().await;

    let new_pid = h
        .supervisor
        .watchdog()
        .supervised_pid(&worker_id)
        .await
        .expect("still supervised");
    assert_ne!(new_pid, old_pid);

    h.supervisor.stop(&descriptor).await.expect("stop");
}

#[tokio::test]
async fn fresh_heartbeat_keeps_the_worker_untouched() {
    let h = harness_with_stale(1).await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    let worker_id = descriptor.worker_id();

    let pid = h.supervisor.start(&descriptor).await.expect("start");
    tokio::time::sleep(Duration::from_millis(1300)).await;

    // Heartbeat written just in time: the registration clock is past the
    // window but the file is fresh.
    h.touch_heartbeat(&worker_id);
    h.supervisor.watchdog().check_now().await;

    assert_eq!(
        h.supervisor.watchdog().supervised_pid(&worker_id).await,
        Some(pid)
    );
    assert!(pid_alive(pid));

    h.supervisor.stop(&descriptor).await.expect("stop");
}
