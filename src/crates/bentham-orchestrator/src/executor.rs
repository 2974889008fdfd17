//! Per-job execution.
//!
//! One call to [`JobExecutor::execute`] is one attempt at one cell: look up
//! the adapter, acquire the resources it declares, run the query bounded by
//! the job timeout, apply the study's quality gates, and report outcomes
//! back to the pools. Retry decisions belong to the engine; this module
//! only classifies.

use bentham_core::adapter::{AdapterRegistry, QueryContext};
use bentham_core::error::{ErrorKind, ExecutionError};
use bentham_core::job::{ExecutionMetrics, Job, JobResult};
use bentham_core::study::{QualityGates, SessionIsolation};
use bentham_pools::{CheckinDisposition, CheckoutOptions, CredentialPoolManager, SessionPool};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes job attempts against registered adapters.
pub struct JobExecutor {
    registry: Arc<AdapterRegistry>,
    credentials: Arc<CredentialPoolManager>,
    sessions: SessionPool,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        credentials: Arc<CredentialPoolManager>,
        sessions: SessionPool,
    ) -> Self {
        Self {
            registry,
            credentials,
            sessions,
        }
    }

    /// Run one attempt end to end.
    pub async fn execute(&self, job: &Job, gates: &QualityGates) -> JobResult {
        let started = Instant::now();
        let mut metrics = ExecutionMetrics::default();

        // 1. Adapter lookup; a missing adapter can never succeed on retry.
        let adapter = match self.registry.get(&job.cell.surface_id) {
            Some(adapter) => adapter,
            None => {
                let error = ExecutionError::new(
                    ErrorKind::AdapterNotFound,
                    format!("no adapter registered for surface {}", job.cell.surface_id),
                );
                metrics.total_ms = started.elapsed().as_millis() as u64;
                return JobResult::failure(job.cell.clone(), job.attempt, error, metrics);
            }
        };
        let resources = adapter.required_resources();

        // 2. Credential acquisition.
        let credential = if resources.needs_credential {
            match self.credentials.get_next(&job.cell.surface_id).await {
                Some(credential) => Some(credential),
                None => {
                    let error = ExecutionError::new(
                        ErrorKind::NoCredentials,
                        format!("no credential available for surface {}", job.cell.surface_id),
                    );
                    metrics.total_ms = started.elapsed().as_millis() as u64;
                    return JobResult::failure(job.cell.clone(), job.attempt, error, metrics);
                }
            }
        } else {
            None
        };
        let credential_id = credential.as_ref().map(|c| c.id.clone());

        // 3. Session acquisition, only when the adapter declares the need.
        let session = if resources.needs_session {
            let wait_started = Instant::now();
            let options = CheckoutOptions {
                engine: None,
                proxy_url: None,
                study_id: Some(job.study_id.clone()),
                tenant_id: Some(job.tenant_id.clone()),
                bind_to_study: job.session_isolation == SessionIsolation::PerStudy,
            };
            let checkout = self.sessions.checkout(options).await;
            metrics.session_wait_ms = wait_started.elapsed().as_millis() as u64;
            match checkout {
                Ok(Some(checkout)) => Some(checkout),
                Ok(None) => {
                    // The credential was never exercised; only the session
                    // shortage is reported.
                    let error = ExecutionError::new(
                        ErrorKind::SessionInvalid,
                        "session pool saturated".to_string(),
                    );
                    metrics.total_ms = started.elapsed().as_millis() as u64;
                    return self.failure(job, error, metrics, None, credential_id);
                }
                Err(err) => {
                    let error =
                        ExecutionError::new(ErrorKind::Internal, format!("session pool: {err}"));
                    metrics.total_ms = started.elapsed().as_millis() as u64;
                    return self.failure(job, error, metrics, None, credential_id);
                }
            }
        } else {
            None
        };
        let session_id = session.as_ref().map(|s| s.session_id.clone());

        // 4. Context construction.
        let context = QueryContext {
            session_id: session_id.clone(),
            credential_id: credential_id.clone(),
            location_id: job.cell.location_id.clone(),
            evidence_level: job.evidence_level,
            timeout: job.timeout,
            study_id: job.study_id.clone(),
            tenant_id: job.tenant_id.clone(),
            correlation_id: job.correlation_id.clone(),
        };

        // 5. The adapter call, bounded by the job timeout.
        let response_started = Instant::now();
        let outcome =
            tokio::time::timeout(job.timeout, adapter.execute_query(&job.query_text, &context))
                .await;
        metrics.response_ms = response_started.elapsed().as_millis() as u64;

        let query_result = match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    job_id = %job.id,
                    cell_key = %job.cell,
                    timeout_ms = job.timeout.as_millis() as u64,
                    "adapter call timed out"
                );
                let error = ExecutionError::new(
                    ErrorKind::Timeout,
                    format!("adapter exceeded {} ms", job.timeout.as_millis()),
                );
                self.report_credential(&job.cell.surface_id, &credential_id, false).await;
                self.check_in_session(&session_id, CheckinDisposition::error()).await;
                metrics.total_ms = started.elapsed().as_millis() as u64;
                return JobResult::failure(job.cell.clone(), job.attempt, error, metrics)
                    .into_attributed(session_id, credential_id);
            }
        };

        if !query_result.success {
            let error: ExecutionError = query_result
                .error
                .map(Into::into)
                .unwrap_or_else(|| {
                    ExecutionError::new(ErrorKind::ExecutionFailed, "adapter reported failure")
                });
            self.report_credential(&job.cell.surface_id, &credential_id, false).await;
            self.check_in_session(&session_id, CheckinDisposition::error()).await;
            metrics.total_ms = started.elapsed().as_millis() as u64;
            return JobResult::failure(job.cell.clone(), job.attempt, error, metrics)
                .into_attributed(session_id, credential_id);
        }

        // 6. Quality gates, in order: content-required, then min-length.
        // The surface answered, so the credential gets a success either way.
        let response_text = query_result.response_text.clone().unwrap_or_default();
        let gate_error = if gates.require_actual_content && response_text.trim().is_empty() {
            Some("response is empty".to_string())
        } else if response_text.len() < gates.min_response_length {
            Some(format!(
                "response length {} below minimum {}",
                response_text.len(),
                gates.min_response_length
            ))
        } else {
            None
        };

        self.report_credential(&job.cell.surface_id, &credential_id, true).await;
        let disposition = if job.session_isolation == SessionIsolation::PerCell {
            CheckinDisposition::recycle()
        } else {
            CheckinDisposition::ok()
        };
        self.check_in_session(&session_id, disposition).await;
        metrics.total_ms = started.elapsed().as_millis() as u64;

        if let Some(message) = gate_error {
            debug!(job_id = %job.id, cell_key = %job.cell, %message, "quality gate rejected response");
            let error = ExecutionError::new(ErrorKind::QualityGateFailed, message);
            return JobResult::failure(job.cell.clone(), job.attempt, error, metrics)
                .into_attributed(session_id, credential_id);
        }

        JobResult::success(
            job.cell.clone(),
            job.attempt,
            response_text,
            query_result.structured_response,
            query_result.response_time_ms,
            metrics,
        )
        .into_attributed(session_id, credential_id)
    }

    fn failure(
        &self,
        job: &Job,
        error: ExecutionError,
        metrics: ExecutionMetrics,
        session_id: Option<String>,
        credential_id: Option<String>,
    ) -> JobResult {
        JobResult::failure(job.cell.clone(), job.attempt, error, metrics)
            .into_attributed(session_id, credential_id)
    }

    async fn report_credential(&self, surface_id: &str, credential_id: &Option<String>, ok: bool) {
        if let Some(id) = credential_id {
            let pool = self.credentials.pool(surface_id);
            let outcome = if ok {
                pool.report_success(id).await
            } else {
                pool.report_error(id).await
            };
            if let Err(err) = outcome {
                warn!(credential_id = %id, error = %err, "credential outcome report failed");
            }
        }
    }

    async fn check_in_session(&self, session_id: &Option<String>, disposition: CheckinDisposition) {
        if let Some(id) = session_id {
            if let Err(err) = self.sessions.check_in(id, disposition).await {
                warn!(session_id = %id, error = %err, "session check-in failed");
            }
        }
    }
}

trait Attributed {
    fn into_attributed(self, session_id: Option<String>, credential_id: Option<String>) -> Self;
}

impl Attributed for JobResult {
    fn into_attributed(
        mut self,
        session_id: Option<String>,
        credential_id: Option<String>,
    ) -> Self {
        self.session_id = session_id;
        self.credential_id = credential_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bentham_core::adapter::{QueryResult, RequiredResources, SurfaceAdapter};
    use bentham_core::cell::CellKey;
    use bentham_core::events::EventBus;
    use bentham_core::job::JobOutcome;
    use bentham_core::study::{EvidenceLevel, SessionIsolation, StudyPriority};
    use bentham_pools::{
        Credential, CredentialMaterial, CredentialPoolConfig, NoopSessionHooks, SessionConfig,
        SessionPoolConfig,
    };
    use std::time::Duration;

    struct ScriptedAdapter {
        surface: String,
        resources: RequiredResources,
        response: QueryResult,
        delay: Duration,
    }

    #[async_trait]
    impl SurfaceAdapter for ScriptedAdapter {
        fn surface_id(&self) -> &str {
            &self.surface
        }

        fn required_resources(&self) -> RequiredResources {
            self.resources
        }

        async fn execute_query(&self, _query: &str, _context: &QueryContext) -> QueryResult {
            tokio::time::sleep(self.delay).await;
            self.response.clone()
        }
    }

    fn executor_with(adapter: ScriptedAdapter) -> (JobExecutor, Arc<CredentialPoolManager>) {
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(Arc::new(adapter));

        let credentials = Arc::new(CredentialPoolManager::new(
            CredentialPoolConfig::default(),
            Arc::new(EventBus::new()),
        ));
        let sessions = SessionPool::new(
            SessionPoolConfig {
                min_idle: 0,
                ..Default::default()
            },
            SessionConfig {
                max_pages: 100,
                ..Default::default()
            },
            Arc::new(NoopSessionHooks),
        );
        (
            JobExecutor::new(registry, credentials.clone(), sessions),
            credentials,
        )
    }

    fn job(surface: &str, timeout: Duration) -> Job {
        Job::new(
            "study-1",
            "tenant-1",
            CellKey::new(0, surface, "us-east"),
            StudyPriority::Normal,
            "what is rust",
            EvidenceLevel::Metadata,
            SessionIsolation::Shared,
            timeout,
        )
    }

    fn gates() -> QualityGates {
        QualityGates::default()
    }

    #[tokio::test]
    async fn missing_adapter_is_non_retryable() {
        let (executor, _) = executor_with(ScriptedAdapter {
            surface: "other".to_string(),
            resources: RequiredResources::default(),
            response: QueryResult::ok("hi", 1),
            delay: Duration::ZERO,
        });

        let result = executor.execute(&job("unregistered", Duration::from_secs(5)), &gates()).await;
        match result.outcome {
            JobOutcome::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::AdapterNotFound);
                assert!(!error.effective_retryable());
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn missing_credential_is_retryable() {
        let (executor, _) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources {
                needs_credential: true,
                ..Default::default()
            },
            response: QueryResult::ok("hi", 1),
            delay: Duration::ZERO,
        });

        let result = executor.execute(&job("api", Duration::from_secs(5)), &gates()).await;
        match result.outcome {
            JobOutcome::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::NoCredentials);
                assert!(error.effective_retryable());
            }
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn success_reports_credential_and_attributes_result() {
        let (executor, credentials) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources {
                needs_credential: true,
                ..Default::default()
            },
            response: QueryResult::ok("a perfectly fine answer", 7),
            delay: Duration::ZERO,
        });
        credentials
            .add_credential(Credential::new(
                "cred-0",
                "api",
                CredentialMaterial::ApiKey { key: "sk".to_string() },
            ))
            .await;

        let result = executor.execute(&job("api", Duration::from_secs(5)), &gates()).await;
        assert!(result.outcome.is_success());
        assert_eq!(result.credential_id.as_deref(), Some("cred-0"));

        let usage = credentials.pool("api").usage("cred-0").await.unwrap();
        assert_eq!(usage.successful_uses, 1);
        assert_eq!(usage.failed_uses, 0);
    }

    #[tokio::test]
    async fn timeout_is_classified_and_reported() {
        let (executor, credentials) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources {
                needs_credential: true,
                ..Default::default()
            },
            response: QueryResult::ok("late", 1),
            delay: Duration::from_millis(200),
        });
        credentials
            .add_credential(Credential::new(
                "cred-0",
                "api",
                CredentialMaterial::ApiKey { key: "sk".to_string() },
            ))
            .await;

        let result = executor
            .execute(&job("api", Duration::from_millis(20)), &gates())
            .await;
        match result.outcome {
            JobOutcome::Failure { error } => assert_eq!(error.kind, ErrorKind::Timeout),
            _ => panic!("expected timeout"),
        }

        let usage = credentials.pool("api").usage("cred-0").await.unwrap();
        assert_eq!(usage.failed_uses, 1);
    }

    #[tokio::test]
    async fn empty_response_fails_content_gate() {
        let (executor, _) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources::default(),
            response: QueryResult::ok("   ", 1),
            delay: Duration::ZERO,
        });

        let result = executor.execute(&job("api", Duration::from_secs(5)), &gates()).await;
        match result.outcome {
            JobOutcome::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::QualityGateFailed);
                assert!(error.effective_retryable());
            }
            _ => panic!("expected gate failure"),
        }
    }

    #[tokio::test]
    async fn short_response_fails_min_length_gate() {
        let (executor, _) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources::default(),
            response: QueryResult::ok("hi", 1),
            delay: Duration::ZERO,
        });

        let gates = QualityGates {
            min_response_length: 10,
            require_actual_content: true,
        };
        let result = executor.execute(&job("api", Duration::from_secs(5)), &gates).await;
        match result.outcome {
            JobOutcome::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::QualityGateFailed)
            }
            _ => panic!("expected gate failure"),
        }
    }

    #[tokio::test]
    async fn adapter_retryable_override_survives() {
        let (executor, _) = executor_with(ScriptedAdapter {
            surface: "api".to_string(),
            resources: RequiredResources::default(),
            response: QueryResult::error(ErrorKind::Auth, "401").with_retryable(true),
            delay: Duration::ZERO,
        });

        let result = executor.execute(&job("api", Duration::from_secs(5)), &gates()).await;
        match result.outcome {
            JobOutcome::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::Auth);
                assert!(error.effective_retryable());
            }
            _ => panic!("expected failure"),
        }
    }
}
