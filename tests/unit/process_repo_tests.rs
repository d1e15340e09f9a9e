//! Unit tests for the durable pid registry repository.

use std::sync::Arc;

use sim_warden::models::worker::{WorkerDescriptor, WorkerKind};
use sim_warden::persistence::db;
use sim_warden::persistence::process_repo::ProcessRepo;

async fn test_repo() -> ProcessRepo {
    let pool = db::connect_memory().await.expect("db connect");
    ProcessRepo::new(Arc::new(pool))
}

#[tokio::test]
async fn persist_creates_row_with_pid_and_desired_running() {
    let repo = test_repo().await;
    let descriptor = WorkerDescriptor::server("exp1", 8700);

    repo.persist_pid(&descriptor, 1234).await.expect("persist");

    let record = repo
        .get("server-exp1")
        .await
        .expect("get")
        .expect("row exists");
    assert_eq!(record.pid, Some(1234));
    assert!(record.desired_running);
    assert_eq!(record.kind, WorkerKind::Server);
    assert_eq!(record.experiment_id, "exp1");
}

#[tokio::test]
async fn persist_twice_replaces_pid_without_duplicating() {
    let repo = test_repo().await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);

    repo.persist_pid(&descriptor, 100).await.expect("persist");
    repo.persist_pid(&descriptor, 200).await.expect("persist again");

    let with_pid = repo.list_with_pid().await.expect("list");
    assert_eq!(with_pid.len(), 1);
    assert_eq!(with_pid[0].pid, Some(200));
    assert_eq!(with_pid[0].population_id.as_deref(), Some("popA"));
}

#[tokio::test]
async fn clear_pid_nulls_the_column() {
    let repo = test_repo().await;
    let descriptor = WorkerDescriptor::server("exp1", 8700);
    repo.persist_pid(&descriptor, 1234).await.expect("persist");

    repo.clear_pid("server-exp1").await.expect("clear");

    let record = repo
        .get("server-exp1")
        .await
        .expect("get")
        .expect("row exists");
    assert_eq!(record.pid, None);
    assert!(repo.list_with_pid().await.expect("list").is_empty());
}

#[tokio::test]
async fn clear_pid_for_unknown_worker_is_a_noop() {
    let repo = test_repo().await;
    repo.clear_pid("server-ghost").await.expect("clear unknown");
    assert!(repo.get("server-ghost").await.expect("get").is_none());
}

#[tokio::test]
async fn set_desired_running_toggles_flag() {
    let repo = test_repo().await;
    let descriptor = WorkerDescriptor::client("exp1", "c1", "popA", false);
    repo.persist_pid(&descriptor, 55).await.expect("persist");

    repo.set_desired_running("client-exp1-popA", false)
        .await
        .expect("toggle off");

    let record = repo
        .get("client-exp1-popA")
        .await
        .expect("get")
        .expect("row exists");
    assert!(!record.desired_running);
    // The pid column is untouched by the flag.
    assert_eq!(record.pid, Some(55));
}

#[tokio::test]
async fn list_with_pid_skips_cleared_rows() {
    let repo = test_repo().await;
    let server = WorkerDescriptor::server("exp1", 8700);
    let client = WorkerDescriptor::client("exp1", "c1", "popA", false);
    repo.persist_pid(&server, 10).await.expect("persist server");
    repo.persist_pid(&client, 20).await.expect("persist client");
    repo.clear_pid("server-exp1").await.expect("clear server");

    let with_pid = repo.list_with_pid().await.expect("list");
    assert_eq!(with_pid.len(), 1);
    assert_eq!(with_pid[0].worker_id, "client-exp1-popA");
}

#[tokio::test]
async fn remove_deletes_the_row() {
    let repo = test_repo().await;
    let descriptor = WorkerDescriptor::server("exp1", 8700);
    repo.persist_pid(&descriptor, 1234).await.expect("persist");

    repo.remove("server-exp1").await.expect("remove");

    assert!(repo.get("server-exp1").await.expect("get").is_none());
}
