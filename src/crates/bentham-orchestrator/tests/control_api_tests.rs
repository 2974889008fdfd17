//! Pause, resume, cancel, and submission validation.

mod common;

use bentham_core::adapter::AdapterRegistry;
use bentham_core::study::StudyStatus;
use bentham_orchestrator::{Orchestrator, OrchestratorError};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn slow_engine(dir: &TempDir, delay: Duration) -> (Arc<ScriptedAdapter>, Orchestrator) {
    let adapter = Arc::new(ScriptedAdapter::new("api").with_delay(delay));
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(adapter.clone());
    let engine = Orchestrator::new(fast_config(dir.path()), registry)
        .await
        .unwrap();
    engine.start();
    (adapter, engine)
}

#[tokio::test]
async fn pause_gates_dispatch_and_resume_restores_it() {
    let dir = TempDir::new().unwrap();
    let (adapter, engine) = slow_engine(&dir, Duration::ZERO).await;

    engine
        .submit_study(manifest("pausable", "api", 6, 0))
        .await
        .unwrap();
    assert!(engine.pause_study("pausable").await);

    // Paused studies dispatch nothing beyond what was already in flight.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let frozen = adapter.invocation_count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(adapter.invocation_count(), frozen);
    let report = engine.study_status("pausable").await.unwrap();
    assert_eq!(report.status, StudyStatus::Paused);

    // Resuming picks up exactly the queued work.
    assert!(engine.resume_study("pausable").await);
    let status = wait_for_terminal(&engine, "pausable", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Completed);
    assert_eq!(adapter.invocation_count(), 6);

    engine.shutdown().await;
}

#[tokio::test]
async fn pause_of_unknown_or_terminal_study_is_refused() {
    let dir = TempDir::new().unwrap();
    let (_, engine) = slow_engine(&dir, Duration::ZERO).await;

    assert!(!engine.pause_study("missing").await);

    engine
        .submit_study(manifest("done", "api", 1, 0))
        .await
        .unwrap();
    wait_for_terminal(&engine, "done", Duration::from_secs(5)).await;
    assert!(!engine.pause_study("done").await);
    assert!(!engine.resume_study("done").await);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancel_skips_all_pending_cells() {
    let dir = TempDir::new().unwrap();
    // Slow adapter so most cells are still queued at cancel time.
    let (adapter, engine) = slow_engine(&dir, Duration::from_millis(50)).await;

    engine
        .submit_study(manifest("doomed", "api", 10, 0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(engine.cancel_study("doomed").await);

    let report = engine.study_status("doomed").await.unwrap();
    assert_eq!(report.status, StudyStatus::Cancelled);

    // Cancel is not idempotent in its return value: the second call finds
    // a terminal study.
    assert!(!engine.cancel_study("doomed").await);

    // Dispatch stops; at most the in-flight jobs run to completion.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(adapter.invocation_count() <= 2, "only in-flight jobs may finish");

    engine.shutdown().await;
}

#[tokio::test]
async fn empty_manifests_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (_, engine) = slow_engine(&dir, Duration::ZERO).await;

    let mut bad = manifest("empty", "api", 1, 0);
    bad.queries.clear();
    match engine.submit_study(bad).await {
        Err(OrchestratorError::Submission(_)) => {}
        other => panic!("expected submission error, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn duplicate_submission_of_running_study_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (_, engine) = slow_engine(&dir, Duration::from_millis(100)).await;

    engine
        .submit_study(manifest("dup", "api", 4, 0))
        .await
        .unwrap();
    match engine.submit_study(manifest("dup", "api", 4, 0)).await {
        Err(OrchestratorError::StudyState { study_id, .. }) => assert_eq!(study_id, "dup"),
        other => panic!("expected study-state error, got {other:?}"),
    }

    engine.shutdown().await;
}
