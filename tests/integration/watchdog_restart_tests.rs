//! End-to-end watchdog recovery tests: crash a real worker process and
//! drive the health-check pass by hand.

#![cfg(unix)]

use std::time::Duration;

use sim_warden::models::worker::{LifecycleState, WorkerDescriptor};
use sim_warden::orchestrator::termination::pid_alive;

use super::test_helpers::{crash, harness, wait_until};

#[tokio::test]
async fn crashed_worker_is_relaunched_with_a_new_pid() {
    let h = harness().await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    let worker_id = descriptor.worker_id();

    let old_pid = h.supervisor.start(&descriptor).await.expect("start");
    crash(old_pid);
    wait_until("crashed pid to leave the process table", Duration::from_secs(5), || {
        !pid_alive(old_pid)
    })
    .await;

    h.supervisor.watchdog().check_now().await;

    let new_pid = h
        .supervisor
        .watchdog()
        .supervised_pid(&worker_id)
        .await
        .expect("still supervised");
    assert_ne!(new_pid, old_pid);
    assert!(pid_alive(new_pid));

    // The replacement pid is also re-persisted for the next restart.
    let status = h.supervisor.status(&descriptor).await.expect("status");
    assert_eq!(status.state, LifecycleState::Running);
    assert_eq!(status.pid, Some(i64::from(new_pid)));

    h.supervisor.stop(&descriptor).await.expect("stop");
}

#[tokio::test]
async fn deliberately_stopped_worker_is_never_resurrected() {
    let h = harness().await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);

    h.supervisor.start(&descriptor).await.expect("start");
    h.supervisor.stop(&descriptor).await.expect("stop");

    // The dead pid is exactly what a tick would flag, but the stop
    // already unregistered the worker.
    h.supervisor.watchdog().check_now().await;
    h.supervisor.watchdog().check_now().await;

    let status = h.supervisor.status(&descriptor).await.expect("status");
    assert!(!status.running);
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.pid, None);
}

#[tokio::test]
async fn failed_relaunch_surfaces_as_crashed() {
    let h = harness().await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    let worker_id = descriptor.worker_id();

    let pid = h.supervisor.start(&descriptor).await.expect("start");

    // Remove the entry script so the restart callback cannot relaunch,
    // then crash the worker.
    std::fs::remove_file(h.client_entry()).expect("remove client script");
    crash(pid);
    wait_until("crashed pid to leave the process table", Duration::from_secs(5), || {
        !pid_alive(pid)
    })
    .await;

    h.supervisor.watchdog().check_now().await;

    let status = h.supervisor.status(&descriptor).await.expect("status");
    assert_eq!(status.state, LifecycleState::Crashed);
    assert!(!status.running);
    assert!(h
        .supervisor
        .watchdog()
        .supervised_pid(&worker_id)
        .await
        .is_some(), "crashed worker stays registered for backoff retry");

    h.supervisor.stop(&descriptor).await.expect("stop");
}
