//! End-to-end study execution scenarios.

mod common;

use bentham_core::adapter::{AdapterRegistry, QueryResult};
use bentham_core::error::ErrorKind;
use bentham_core::events::ExecutionEvent;
use bentham_core::study::StudyStatus;
use bentham_orchestrator::Orchestrator;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn engine_with(adapter: Arc<ScriptedAdapter>, dir: &TempDir) -> Orchestrator {
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(adapter);
    let engine = Orchestrator::new(fast_config(dir.path()), registry)
        .await
        .expect("engine builds");
    engine.start();
    engine
}

#[tokio::test]
async fn happy_path_two_cells() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api"));
    let engine = engine_with(adapter.clone(), &dir).await;
    let mut events = engine.events().subscribe();

    let receipt = engine
        .submit_study(manifest("happy", "api", 2, 0))
        .await
        .unwrap();
    assert_eq!(receipt.study_id, "happy");

    let status = wait_for_terminal(&engine, "happy", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Completed);

    let report = engine.study_status("happy").await.unwrap();
    assert_eq!(report.progress.total_cells, 2);
    assert_eq!(report.progress.completed_cells, 2);
    assert_eq!(report.progress.failed_cells, 0);
    assert_eq!(report.progress.progress_percent, 100);
    assert_eq!(adapter.invocation_count(), 2);

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "job_completed"), 2);
    assert_eq!(count_kind(&events, "job_failed"), 0);
    assert_eq!(count_kind(&events, "study_completed"), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn retry_then_succeed_respects_jitter_bounds() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api"));
    adapter.script_cell(
        "0-api-us-east",
        vec![
            QueryResult::error(ErrorKind::RateLimited, "429").with_retryable(true),
            QueryResult::ok("recovered on the second attempt", 2),
        ],
    );
    let engine = engine_with(adapter.clone(), &dir).await;
    let mut events = engine.events().subscribe();

    engine
        .submit_study(manifest("retry", "api", 1, 3))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "retry", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Completed);
    assert_eq!(adapter.invocation_count(), 2);

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "job_failed"), 1);
    assert_eq!(count_kind(&events, "job_completed"), 1);

    // Base delay is 100 ms with ±20 % jitter; the second attempt must not
    // start before the lower jitter bound (scheduling adds slack on top).
    let failed_at = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::JobFailed { timestamp, .. } => Some(*timestamp),
            _ => None,
        })
        .unwrap();
    let second_start = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::JobStarted {
                attempt: 2,
                timestamp,
                ..
            } => Some(*timestamp),
            _ => None,
        })
        .unwrap();
    let gap_ms = second_start
        .signed_duration_since(failed_at)
        .num_milliseconds();
    assert!(gap_ms >= 75, "retry came back too fast: {gap_ms} ms");
    assert!(gap_ms <= 400, "retry took too long: {gap_ms} ms");

    // Attempts are visible in the final report's retry bookkeeping.
    let report = engine.study_status("retry").await.unwrap();
    assert_eq!(report.progress.completed_cells, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn exhausted_retries_leave_partial_study() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api").with_fallback(
        QueryResult::error(ErrorKind::Network, "connection reset").with_retryable(true),
    ));
    // Second cell succeeds so the study is partial rather than failed.
    adapter.script_cell(
        "1-api-us-east",
        vec![QueryResult::ok("one good answer", 2)],
    );
    let engine = engine_with(adapter.clone(), &dir).await;

    engine
        .submit_study(manifest("exhaust", "api", 2, 2))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "exhaust", Duration::from_secs(10)).await;
    assert_eq!(status, StudyStatus::Partial);

    let report = engine.study_status("exhaust").await.unwrap();
    assert_eq!(report.progress.completed_cells, 1);
    assert_eq!(report.progress.failed_cells, 1);

    // maxRetries = 2 means exactly three attempts on the failing cell,
    // plus the single successful attempt on the other.
    assert_eq!(adapter.invocation_count(), 4);

    engine.shutdown().await;
}

#[tokio::test]
async fn zero_retries_fail_on_first_error() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api").with_fallback(
        QueryResult::error(ErrorKind::Network, "reset").with_retryable(true),
    ));
    let engine = engine_with(adapter.clone(), &dir).await;
    let mut events = engine.events().subscribe();

    engine
        .submit_study(manifest("zero", "api", 1, 0))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "zero", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Failed);
    assert_eq!(adapter.invocation_count(), 1);

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, "job_failed"), 1);
    assert_eq!(count_kind(&events, "job_completed"), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn non_retryable_error_fails_immediately() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api")
        .with_fallback(QueryResult::error(ErrorKind::ContentPolicy, "refused")));
    let engine = engine_with(adapter.clone(), &dir).await;

    engine
        .submit_study(manifest("policy", "api", 1, 5))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "policy", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Failed);

    // Retry budget was generous, but CONTENT_POLICY is fatal to the cell.
    assert_eq!(adapter.invocation_count(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn quality_gate_failures_retry_and_then_pass() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("api"));
    adapter.script_cell(
        "0-api-us-east",
        vec![
            QueryResult::ok("   ", 1),
            QueryResult::ok("substantial answer this time", 1),
        ],
    );
    let engine = engine_with(adapter.clone(), &dir).await;
    let mut events = engine.events().subscribe();

    engine
        .submit_study(manifest("gates", "api", 1, 2))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "gates", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Completed);

    let events = drain_events(&mut events);
    let gate_failures: Vec<_> = events
        .iter()
        .filter(|e| matches!(
            e,
            ExecutionEvent::JobFailed { error_code, .. } if error_code == "QUALITY_GATE_FAILED"
        ))
        .collect();
    assert_eq!(gate_failures.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn missing_adapter_fails_the_cell() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(AdapterRegistry::new());
    let engine = Orchestrator::new(fast_config(dir.path()), registry)
        .await
        .unwrap();
    engine.start();
    let mut events = engine.events().subscribe();

    engine
        .submit_study(manifest("orphan", "unregistered", 1, 3))
        .await
        .unwrap();
    let status = wait_for_terminal(&engine, "orphan", Duration::from_secs(5)).await;
    assert_eq!(status, StudyStatus::Failed);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::JobFailed { error_code, will_retry, .. }
            if error_code == "ADAPTER_NOT_FOUND" && !will_retry
    )));

    engine.shutdown().await;
}
