//! Common test utilities: a scriptable surface adapter and engine setup.

use async_trait::async_trait;
use bentham_core::adapter::{QueryContext, QueryResult, RequiredResources, SurfaceAdapter};
use bentham_core::events::ExecutionEvent;
use bentham_core::study::{
    CompletionCriteria, EvidenceLevel, QualityGates, SessionIsolation, StudyManifest,
    StudyPriority, StudyStatus,
};
use bentham_orchestrator::{Orchestrator, PlatformConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// An adapter whose behavior is scripted per cell.
///
/// Each cell key maps to a queue of responses consumed one per attempt;
/// when a cell's script runs dry (or has none), the fallback response is
/// used. Records every invocation.
pub struct ScriptedAdapter {
    surface: String,
    resources: RequiredResources,
    scripts: Mutex<HashMap<String, Vec<QueryResult>>>,
    fallback: QueryResult,
    pub invocations: AtomicUsize,
    pub delay: Duration,
    credential_failures: Mutex<HashMap<String, usize>>,
}

impl ScriptedAdapter {
    pub fn new(surface: &str) -> Self {
        Self {
            surface: surface.to_string(),
            resources: RequiredResources::default(),
            scripts: Mutex::new(HashMap::new()),
            fallback: QueryResult::ok("a sufficiently long canned answer", 3),
            invocations: AtomicUsize::new(0),
            delay: Duration::ZERO,
            credential_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn needs_credential(mut self) -> Self {
        self.resources.needs_credential = true;
        self
    }

    pub fn needs_session(mut self) -> Self {
        self.resources.needs_session = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_fallback(mut self, fallback: QueryResult) -> Self {
        self.fallback = fallback;
        self
    }

    /// Queue scripted responses for one cell, consumed per attempt.
    pub fn script_cell(&self, cell_key: &str, responses: Vec<QueryResult>) {
        self.scripts
            .lock()
            .insert(cell_key.to_string(), responses);
    }

    /// Fail the first `failures` calls made with the given credential id.
    pub fn fail_credential(&self, credential_id: &str, failures: usize) {
        self.credential_failures
            .lock()
            .insert(credential_id.to_string(), failures);
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SurfaceAdapter for ScriptedAdapter {
    fn surface_id(&self) -> &str {
        &self.surface
    }

    fn required_resources(&self) -> RequiredResources {
        self.resources
    }

    async fn execute_query(&self, query: &str, context: &QueryContext) -> QueryResult {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(credential_id) = &context.credential_id {
            let mut failures = self.credential_failures.lock();
            if let Some(remaining) = failures.get_mut(credential_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return QueryResult::error(
                        bentham_core::ErrorKind::RateLimited,
                        format!("scripted failure for {credential_id}"),
                    );
                }
            }
        }

        // The cell key is recoverable from the query text in these tests
        // because each query is unique; scripts are keyed by cell key and
        // consumed front-first.
        let mut scripts = self.scripts.lock();
        for (key, responses) in scripts.iter_mut() {
            if query_matches(query, key) && !responses.is_empty() {
                return responses.remove(0);
            }
        }
        self.fallback.clone()
    }
}

fn query_matches(query: &str, cell_key: &str) -> bool {
    // Test queries are formatted "q<index>"; cell keys start "<index>-".
    cell_key
        .split('-')
        .next()
        .map_or(false, |index| query == format!("q{index}"))
}

/// A manifest over one surface/location with `n` queries named q0..qN.
pub fn manifest(study_id: &str, surface: &str, queries: usize, max_retries: u32) -> StudyManifest {
    StudyManifest {
        id: study_id.to_string(),
        tenant_id: "tenant-1".to_string(),
        name: format!("{study_id} study"),
        queries: (0..queries).map(|i| format!("q{i}")).collect(),
        surfaces: vec![surface.to_string()],
        locations: vec!["us-east".to_string()],
        quality_gates: QualityGates::default(),
        completion: CompletionCriteria {
            required_surfaces: vec![surface.to_string()],
            coverage_threshold: 1.0,
        },
        max_retries,
        evidence_level: EvidenceLevel::Metadata,
        session_isolation: SessionIsolation::Shared,
        deadline: None,
        priority: StudyPriority::Normal,
    }
}

/// A platform config tuned for fast tests.
pub fn fast_config(checkpoint_dir: &Path) -> PlatformConfig {
    let mut config = PlatformConfig::default();
    config.workers.count = 2;
    config.execution.scheduler_interval_ms = 10;
    config.execution.job_timeout_secs = 5;
    config.execution.base_retry_delay_ms = 100;
    config.execution.max_retry_delay_ms = 2_000;
    config.execution.no_credentials_backoff_secs = 1;
    config.checkpoint.dir = checkpoint_dir.to_path_buf();
    config.checkpoint.save_every_results = 1;
    config.credential_pool.error_cooldown_ms = 100;
    config.credential_pool.sweep_interval_ms = 20;
    config.session_pool.min_idle = 0;
    config.session_pool.warmup_interval_secs = 3600;
    config.session_pool.keep_alive_interval_secs = 3600;
    config.session_pool.health_check_interval_secs = 3600;
    config
}

/// Wait until the study reaches a terminal status, or panic after the
/// timeout.
pub async fn wait_for_terminal(
    engine: &Orchestrator,
    study_id: &str,
    timeout: Duration,
) -> StudyStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let report = engine.study_status(study_id).await.expect("study exists");
        if report.status.is_terminal() {
            return report.status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "study {study_id} still {:?} after {timeout:?}",
                report.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain currently buffered events from a subscription.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Count events of a kind in a slice.
pub fn count_kind(events: &[ExecutionEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}
