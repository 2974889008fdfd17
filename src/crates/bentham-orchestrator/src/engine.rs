//! The orchestration engine and its control API.
//!
//! One [`Orchestrator`] drives every submitted study: it expands manifests
//! into jobs, feeds the priority queue, assigns jobs to worker slots on a
//! scheduler tick, applies retry policy, keeps checkpoints current, and
//! emits lifecycle events. The control surface consumed by the gateway is
//! `submit_study` / `study_status` / `pause_study` / `resume_study` /
//! `cancel_study` / `shutdown`.

use crate::config::PlatformConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::JobExecutor;
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;
use crate::study::{StudyProgress, StudyRuntime, StudyStatusReport};
use crate::troubleshooter::Troubleshooter;
use crate::worker::{WorkerPool, WorkerSlot};
use bentham_checkpoint::{CheckpointManager, CheckpointStore, FileCheckpointStore, StudyCheckpoint};
use bentham_core::adapter::AdapterRegistry;
use bentham_core::cell::{CellKey, CellResult, CellStatus};
use bentham_core::error::ErrorKind;
use bentham_core::events::{EventBus, ExecutionEvent};
use bentham_core::job::{Job, JobOutcome, JobResult};
use bentham_core::study::{StudyManifest, StudyStatus};
use bentham_pools::{CredentialPoolManager, SessionConfig, SessionHooks, SessionPool};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// What `submit_study` returns to the gateway.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub study_id: String,
    pub estimated_completion_time: DateTime<Utc>,
}

type StudyHandle = Arc<Mutex<StudyRuntime>>;

struct EngineInner {
    config: PlatformConfig,
    registry: Arc<AdapterRegistry>,
    credentials: Arc<CredentialPoolManager>,
    sessions: SessionPool,
    events: Arc<EventBus>,
    store: Arc<dyn CheckpointStore>,
    queue: Mutex<JobQueue>,
    workers: WorkerPool,
    studies: RwLock<HashMap<String, StudyHandle>>,
    executor: JobExecutor,
    retry_policy: RetryPolicy,
    troubleshooter: Troubleshooter,
    shutdown_flag: AtomicBool,
    shutdown_notify: Notify,
    dispatch_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// The execution core's orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<EngineInner>,
}

impl Orchestrator {
    /// Build an orchestrator with no-op session hooks.
    pub async fn new(config: PlatformConfig, registry: Arc<AdapterRegistry>) -> Result<Self> {
        Self::with_session_hooks(
            config,
            registry,
            Arc::new(bentham_pools::NoopSessionHooks),
        )
        .await
    }

    /// Build an orchestrator with deployment-supplied session hooks.
    pub async fn with_session_hooks(
        config: PlatformConfig,
        registry: Arc<AdapterRegistry>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(&config.checkpoint.dir).await?);
        let credentials = Arc::new(CredentialPoolManager::new(
            config.credential_pool.pool_config(),
            events.clone(),
        ));
        let sessions = SessionPool::new(
            config.session_pool.pool_config(),
            SessionConfig::default(),
            hooks,
        );
        let executor = JobExecutor::new(registry.clone(), credentials.clone(), sessions.clone());
        let workers =
            WorkerPool::uniform(config.workers.count, config.workers.max_concurrent_jobs);
        let retry_policy = RetryPolicy::new(
            Duration::from_millis(config.execution.base_retry_delay_ms),
            Duration::from_millis(config.execution.max_retry_delay_ms),
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                credentials,
                sessions,
                events,
                store,
                queue: Mutex::new(JobQueue::new()),
                workers,
                studies: RwLock::new(HashMap::new()),
                executor,
                retry_policy,
                troubleshooter: Troubleshooter::new(),
                shutdown_flag: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                dispatch_handle: std::sync::Mutex::new(None),
            }),
        })
    }

    /// Event bus for listener registration.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Adapter registry this engine dispatches through.
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.inner.registry
    }

    /// Credential pools.
    pub fn credentials(&self) -> &Arc<CredentialPoolManager> {
        &self.inner.credentials
    }

    /// Session pool.
    pub fn sessions(&self) -> &SessionPool {
        &self.inner.sessions
    }

    /// Launch the session pool ticks and the dispatch loop.
    pub fn start(&self) {
        self.inner.sessions.start();
        for worker in self.inner.workers.workers() {
            self.inner
                .events
                .emit(ExecutionEvent::worker_started(worker.id()));
        }

        let engine = self.clone();
        let interval = self.inner.config.execution.scheduler_interval();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = engine.inner.shutdown_notify.notified() => break,
                    _ = tick.tick() => {
                        if engine.inner.shutdown_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        engine.dispatch_once().await;
                    }
                }
            }
            debug!("dispatch loop stopped");
        });
        *self.inner.dispatch_handle.lock().expect("dispatch handle") = Some(handle);
        info!(
            workers = self.inner.workers.workers().len(),
            "orchestrator started"
        );
    }

    /// Submit a validated study. Resumes from an existing checkpoint when
    /// one is on disk; previously terminal cells are never re-executed.
    pub async fn submit_study(&self, manifest: StudyManifest) -> Result<SubmitReceipt> {
        if manifest.queries.is_empty()
            || manifest.surfaces.is_empty()
            || manifest.locations.is_empty()
        {
            return Err(OrchestratorError::Submission(
                "manifest must contain at least one query, surface, and location".to_string(),
            ));
        }
        {
            let studies = self.inner.studies.read().await;
            if let Some(handle) = studies.get(&manifest.id) {
                let runtime = handle.lock().await;
                if !runtime.status.is_terminal() {
                    return Err(OrchestratorError::StudyState {
                        study_id: manifest.id.clone(),
                        status: format!("{:?}", runtime.status).to_lowercase(),
                    });
                }
            }
        }

        // A missing checkpoint means a fresh study; a corrupt one is an
        // error the caller must see, never a silent restart.
        let snapshot = match self.inner.store.load(&manifest.id).await? {
            Some(snapshot) => {
                info!(
                    study_id = %manifest.id,
                    completed = snapshot.completed_cells,
                    remaining = snapshot.remaining_cells().len(),
                    "resuming study from checkpoint"
                );
                snapshot
            }
            None => StudyCheckpoint::create(
                &manifest.id,
                &manifest.name,
                manifest.surfaces.clone(),
                manifest.locations.clone(),
                manifest.queries.len(),
            ),
        };

        let checkpoint = Arc::new(CheckpointManager::new(
            self.inner.store.clone(),
            snapshot.clone(),
            self.inner.config.checkpoint.manager_config(),
        ));
        checkpoint.save().await?;

        let runtime = StudyRuntime::new(manifest.clone(), checkpoint.clone(), &snapshot);
        let job_timeout = self.job_timeout_for(&manifest);

        let mut exhausted_cells = Vec::new();
        let mut enqueued = 0usize;
        {
            let mut queue = self.inner.queue.lock().await;
            for key in snapshot.remaining_cells() {
                let Some(cell) = CellKey::decode(&key, &manifest.locations) else {
                    warn!(study_id = %manifest.id, cell_key = %key, "undecodable cell key in checkpoint");
                    continue;
                };
                let retry = snapshot.retry_states.get(&key);
                if retry.is_some_and(|r| r.exhausted) {
                    exhausted_cells.push((key, retry.cloned().unwrap_or_default()));
                    continue;
                }
                let Some(query_text) = manifest.queries.get(cell.query_index as usize) else {
                    warn!(study_id = %manifest.id, cell_key = %key, "query index out of range");
                    continue;
                };

                let mut job = Job::new(
                    &manifest.id,
                    &manifest.tenant_id,
                    cell,
                    manifest.priority,
                    query_text.clone(),
                    manifest.evidence_level,
                    manifest.session_isolation,
                    job_timeout,
                );
                job.attempt = retry.map_or(0, |r| r.attempts) + 1;
                queue.push(job);
                enqueued += 1;
            }
        }

        // Cells that exhausted their budget in a previous run are closed
        // out as failed rather than re-queued.
        for (key, retry) in exhausted_cells {
            let result = CellResult {
                cell_key: key.clone(),
                status: CellStatus::Failed,
                attempt: retry.attempts,
                response_text: None,
                structured_response: None,
                error_code: retry.last_error_code,
                error_message: retry.last_error,
                response_time_ms: 0,
                session_id: None,
                credential_id: None,
                completed_at: Utc::now(),
            };
            if let Err(err) = checkpoint.record_result(result).await {
                error!(study_id = %manifest.id, cell_key = %key, error = %err, "failed to close out exhausted cell");
            }
        }

        let study_id = manifest.id.clone();
        let estimated_completion_time = self.estimate_completion(enqueued);
        let handle = Arc::new(Mutex::new(runtime));
        self.inner
            .studies
            .write()
            .await
            .insert(study_id.clone(), handle.clone());

        // A resumed study with nothing left to run must still finalize.
        if enqueued == 0 {
            self.check_study_done(&handle, &study_id).await;
        }

        info!(study_id = %study_id, cells = enqueued, "study submitted");
        Ok(SubmitReceipt {
            study_id,
            estimated_completion_time,
        })
    }

    /// Status, progress, and per-surface coverage for a study.
    pub async fn study_status(&self, study_id: &str) -> Result<StudyStatusReport> {
        let handle = self
            .study(study_id)
            .await
            .ok_or_else(|| OrchestratorError::StudyNotFound(study_id.to_string()))?;
        let runtime = handle.lock().await;
        let snapshot = runtime.checkpoint.snapshot().await;
        Ok(StudyStatusReport {
            study_id: study_id.to_string(),
            status: runtime.status,
            progress: StudyProgress {
                total_cells: snapshot.total_cells,
                completed_cells: snapshot.completed_cells,
                failed_cells: snapshot.failed_cells,
                progress_percent: snapshot.progress_percent,
            },
            surfaces: runtime.surface_coverage(),
        })
    }

    /// Gate dispatch for a study's cells; running jobs complete.
    pub async fn pause_study(&self, study_id: &str) -> bool {
        let Some(handle) = self.study(study_id).await else {
            return false;
        };
        let mut runtime = handle.lock().await;
        if runtime.status == StudyStatus::Running {
            runtime.status = StudyStatus::Paused;
            info!(study_id = %study_id, "study paused");
            true
        } else {
            false
        }
    }

    /// Reopen dispatch for a paused study.
    pub async fn resume_study(&self, study_id: &str) -> bool {
        let Some(handle) = self.study(study_id).await else {
            return false;
        };
        let resumed = {
            let mut runtime = handle.lock().await;
            if runtime.status == StudyStatus::Paused {
                runtime.status = StudyStatus::Running;
                true
            } else {
                false
            }
        };
        if resumed {
            info!(study_id = %study_id, "study resumed");
            // The last in-flight job may have finished while paused; the
            // drain check must not wait for another result.
            self.check_study_done(&handle, study_id).await;
        }
        resumed
    }

    /// Cancel a study: every non-terminal cell is marked skipped and its
    /// queued jobs are dropped. Running jobs complete but are no longer
    /// recorded.
    pub async fn cancel_study(&self, study_id: &str) -> bool {
        let Some(handle) = self.study(study_id).await else {
            return false;
        };
        let checkpoint = {
            let mut runtime = handle.lock().await;
            if runtime.status.is_terminal() {
                return false;
            }
            runtime.status = StudyStatus::Cancelled;
            runtime.checkpoint.clone()
        };

        self.inner.queue.lock().await.drain_study(study_id);

        let snapshot = checkpoint.snapshot().await;
        for key in snapshot.remaining_cells() {
            let result = CellResult {
                cell_key: key,
                status: CellStatus::Skipped,
                attempt: 0,
                response_text: None,
                structured_response: None,
                error_code: None,
                error_message: None,
                response_time_ms: 0,
                session_id: None,
                credential_id: None,
                completed_at: Utc::now(),
            };
            if let Err(err) = checkpoint.record_result(result).await {
                error!(study_id = %study_id, error = %err, "failed to record skipped cell");
            }
        }
        if let Err(err) = checkpoint.save().await {
            error!(study_id = %study_id, error = %err, "failed to persist cancelled checkpoint");
        }

        let snapshot = checkpoint.snapshot().await;
        self.inner.events.emit(ExecutionEvent::study_completed(
            study_id,
            "cancelled",
            snapshot.completed_cells,
            snapshot.failed_cells,
        ));
        info!(study_id = %study_id, "study cancelled");
        true
    }

    /// Stop dispatch, drain in-flight jobs (bounded), stop the pools.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutdown_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator shutting down");
        self.inner.shutdown_notify.notify_waiters();
        let handle = self.inner.dispatch_handle.lock().expect("dispatch handle").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline =
            Instant::now() + Duration::from_secs(self.inner.config.execution.shutdown_timeout_secs);
        while self.inner.workers.active_jobs() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.inner.workers.active_jobs() > 0 {
            warn!("shutdown timeout reached with jobs still in flight");
        }

        for worker in self.inner.workers.workers() {
            self.inner
                .events
                .emit(ExecutionEvent::worker_stopped(worker.id()));
        }
        self.inner.credentials.shutdown();
        self.inner.sessions.shutdown().await;
        info!("orchestrator stopped");
    }

    async fn study(&self, study_id: &str) -> Option<StudyHandle> {
        self.inner.studies.read().await.get(study_id).cloned()
    }

    fn job_timeout_for(&self, manifest: &StudyManifest) -> Duration {
        let configured = self.inner.config.execution.job_timeout();
        match manifest.deadline {
            Some(deadline) => {
                let budget = deadline
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                configured.min(budget)
            }
            None => configured,
        }
    }

    fn estimate_completion(&self, cells: usize) -> DateTime<Utc> {
        let slots =
            self.inner.config.workers.count * self.inner.config.workers.max_concurrent_jobs;
        let per_cell = self.inner.config.execution.per_cell_estimate_secs;
        let secs = (cells as u64).saturating_mul(per_cell) / slots.max(1) as u64;
        Utc::now() + ChronoDuration::seconds(secs as i64)
    }

    /// One dispatch pass: fill every free worker slot with an eligible job.
    async fn dispatch_once(&self) {
        let dispatchable = self.dispatchable_studies().await;
        if dispatchable.is_empty() {
            return;
        }
        let now = Instant::now();

        for worker in self.inner.workers.workers() {
            while worker.has_capacity() {
                let job = {
                    let mut queue = self.inner.queue.lock().await;
                    queue.pop_eligible(now, &worker.filter(), |study| {
                        dispatchable.contains(study)
                    })
                };
                let Some(job) = job else { break };

                if let Some(handle) = self.study(&job.study_id).await {
                    handle.lock().await.in_flight += 1;
                }
                let slot = worker.claim();
                let engine = self.clone();
                let worker_id = worker.id().to_string();
                tokio::spawn(async move {
                    engine.run_job(worker_id, job, slot).await;
                });
            }
        }
    }

    async fn dispatchable_studies(&self) -> HashSet<String> {
        let studies = self.inner.studies.read().await;
        let mut dispatchable = HashSet::new();
        for (id, handle) in studies.iter() {
            if handle.lock().await.status == StudyStatus::Running {
                dispatchable.insert(id.clone());
            }
        }
        dispatchable
    }

    async fn run_job(&self, worker_id: String, job: Job, slot: WorkerSlot) {
        self.inner.events.emit(ExecutionEvent::job_started(
            &worker_id,
            &job.id,
            &job.study_id,
            job.cell.encode(),
            job.attempt,
        ));

        let Some(handle) = self.study(&job.study_id).await else {
            drop(slot);
            return;
        };
        let (gates, max_retries) = {
            let runtime = handle.lock().await;
            (
                runtime.manifest.quality_gates.clone(),
                runtime.manifest.max_retries,
            )
        };

        let result = self.inner.executor.execute(&job, &gates).await;
        self.handle_result(&worker_id, handle, job, result, max_retries)
            .await;
        drop(slot);
    }

    async fn handle_result(
        &self,
        worker_id: &str,
        handle: StudyHandle,
        job: Job,
        result: JobResult,
        max_retries: u32,
    ) {
        let key = job.cell.encode();

        match result.outcome {
            JobOutcome::Success {
                response_text,
                structured_response,
                response_time_ms,
            } => {
                let cell_result = CellResult {
                    cell_key: key.clone(),
                    status: CellStatus::Completed,
                    attempt: job.attempt,
                    response_text: Some(response_text),
                    structured_response,
                    error_code: None,
                    error_message: None,
                    response_time_ms,
                    session_id: result.session_id,
                    credential_id: result.credential_id,
                    completed_at: Utc::now(),
                };

                {
                    let mut runtime = handle.lock().await;
                    runtime.in_flight -= 1;
                    if runtime.status == StudyStatus::Running
                        || runtime.status == StudyStatus::Paused
                    {
                        runtime.record_completion(&job.cell);
                        if let Err(err) = runtime.checkpoint.record_result(cell_result).await {
                            error!(cell_key = %key, error = %err, "failed to checkpoint result");
                        }
                        runtime
                            .checkpoint
                            .record_retry(&key, job.attempt, None, None, false)
                            .await;
                    }
                }

                self.inner.troubleshooter.record_success(&key);
                self.inner.events.emit(ExecutionEvent::job_completed(
                    worker_id,
                    &job.id,
                    &job.study_id,
                    &key,
                    job.attempt,
                    result.metrics.total_ms,
                ));
                self.check_study_done(&handle, &job.study_id).await;
            }
            JobOutcome::Failure { error } => {
                let will_retry = error.effective_retryable() && job.attempt <= max_retries;

                {
                    let mut runtime = handle.lock().await;
                    runtime.in_flight -= 1;
                    if runtime.status == StudyStatus::Running
                        || runtime.status == StudyStatus::Paused
                    {
                        runtime
                            .checkpoint
                            .record_retry(
                                &key,
                                job.attempt,
                                Some(error.message.clone()),
                                Some(error.kind),
                                !will_retry,
                            )
                            .await;
                        if !will_retry {
                            let cell_result = CellResult {
                                cell_key: key.clone(),
                                status: CellStatus::Failed,
                                attempt: job.attempt,
                                response_text: None,
                                structured_response: None,
                                error_code: Some(error.kind),
                                error_message: Some(error.message.clone()),
                                response_time_ms: result.metrics.response_ms,
                                session_id: result.session_id.clone(),
                                credential_id: result.credential_id.clone(),
                                completed_at: Utc::now(),
                            };
                            if let Err(err) = runtime.checkpoint.record_result(cell_result).await {
                                error!(cell_key = %key, error = %err, "failed to checkpoint failure");
                            }
                        }
                    }
                }

                self.inner.events.emit(ExecutionEvent::job_failed(
                    worker_id,
                    &job.id,
                    &job.study_id,
                    &key,
                    job.attempt,
                    error.kind.code(),
                    will_retry,
                ));
                if let Some(severity) = self.inner.troubleshooter.record_failure(&key) {
                    self.inner.events.emit(ExecutionEvent::incident_opened(
                        &job.study_id,
                        &key,
                        severity.as_str(),
                        &error.message,
                    ));
                }

                if will_retry {
                    let mut delay = self.inner.retry_policy.delay_for_attempt(job.attempt);
                    if error.kind == ErrorKind::NoCredentials {
                        delay = delay.max(Duration::from_secs(
                            self.inner.config.execution.no_credentials_backoff_secs,
                        ));
                    }
                    debug!(
                        cell_key = %key,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling retry"
                    );
                    let next = job.next_attempt();
                    self.inner
                        .queue
                        .lock()
                        .await
                        .push_delayed(next, Instant::now() + delay);
                } else {
                    self.check_study_done(&handle, &job.study_id).await;
                }
            }
        }
    }

    /// Evaluate early completion and queue-drain outcomes after a terminal
    /// cell.
    async fn check_study_done(&self, handle: &StudyHandle, study_id: &str) {
        let outcome = {
            let runtime = handle.lock().await;
            if runtime.status != StudyStatus::Running {
                None
            } else if runtime.criteria_met() {
                Some(StudyStatus::Completed)
            } else {
                let queue_empty = !self.inner.queue.lock().await.has_study_jobs(study_id);
                if queue_empty && runtime.in_flight == 0 {
                    Some(runtime.drained_outcome())
                } else {
                    None
                }
            }
        };

        if let Some(status) = outcome {
            self.finalize_study(handle, study_id, status).await;
        }
    }

    async fn finalize_study(&self, handle: &StudyHandle, study_id: &str, status: StudyStatus) {
        let checkpoint = {
            let mut runtime = handle.lock().await;
            if runtime.status.is_terminal() {
                return;
            }
            runtime.status = status;
            runtime.checkpoint.clone()
        };

        // Early completion leaves cells behind; they are skipped, not run.
        let dropped = self.inner.queue.lock().await.drain_study(study_id);
        for job in dropped {
            let result = CellResult {
                cell_key: job.cell.encode(),
                status: CellStatus::Skipped,
                attempt: 0,
                response_text: None,
                structured_response: None,
                error_code: None,
                error_message: None,
                response_time_ms: 0,
                session_id: None,
                credential_id: None,
                completed_at: Utc::now(),
            };
            if let Err(err) = checkpoint.record_result(result).await {
                error!(study_id = %study_id, error = %err, "failed to record skipped cell");
            }
        }

        let snapshot = checkpoint.snapshot().await;
        if let Err(err) = checkpoint.finalize().await {
            error!(study_id = %study_id, error = %err, "checkpoint finalize failed");
        }

        let status_label = match status {
            StudyStatus::Completed => "completed",
            StudyStatus::Partial => "partial",
            StudyStatus::Failed => "failed",
            StudyStatus::Cancelled => "cancelled",
            other => {
                warn!(study_id = %study_id, status = ?other, "finalize with non-terminal status");
                "completed"
            }
        };
        self.inner.events.emit(ExecutionEvent::study_completed(
            study_id,
            status_label,
            snapshot.completed_cells,
            snapshot.failed_cells,
        ));
        info!(
            study_id = %study_id,
            status = status_label,
            completed = snapshot.completed_cells,
            failed = snapshot.failed_cells,
            "study finalized"
        );
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.inner.workers.workers().len())
            .finish()
    }
}
