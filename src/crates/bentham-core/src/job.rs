//! Jobs: the in-flight representation of a cell attempt.

use crate::cell::CellKey;
use crate::error::ExecutionError;
use crate::study::{EvidenceLevel, SessionIsolation, StudyPriority};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One attempt at one cell, while queued or executing.
///
/// Jobs reference pool handles by id rather than carrying them; a job
/// exists only between enqueue and the completion of its attempt.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique id of this attempt.
    pub id: String,

    /// Owning study.
    pub study_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// The cell being attempted.
    pub cell: CellKey,

    /// Attempt number, 1-based.
    pub attempt: u32,

    /// Priority inherited from the study.
    pub priority: StudyPriority,

    /// The query text for this cell.
    pub query_text: String,

    /// Evidence level inherited from the study.
    pub evidence_level: EvidenceLevel,

    /// Session sharing mode inherited from the study.
    pub session_isolation: SessionIsolation,

    /// Per-attempt timeout (min of study deadline budget and the
    /// configured job timeout).
    pub timeout: Duration,

    /// Correlation id threaded through adapter calls and events.
    pub correlation_id: String,
}

impl Job {
    /// Create the first attempt for a cell.
    pub fn new(
        study_id: impl Into<String>,
        tenant_id: impl Into<String>,
        cell: CellKey,
        priority: StudyPriority,
        query_text: impl Into<String>,
        evidence_level: EvidenceLevel,
        session_isolation: SessionIsolation,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            study_id: study_id.into(),
            tenant_id: tenant_id.into(),
            cell,
            attempt: 1,
            priority,
            query_text: query_text.into(),
            evidence_level,
            session_isolation,
            timeout,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Derive the next attempt of this job, with a fresh job id.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.id = Uuid::new_v4().to_string();
        next.attempt += 1;
        next
    }
}

/// Wall-clock breakdown of one job execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// End-to-end time for the attempt.
    pub total_ms: u64,

    /// Time spent waiting for a session checkout.
    pub session_wait_ms: u64,

    /// Time spent waiting for a proxy slot.
    pub proxy_wait_ms: u64,

    /// Time spent inside the adapter call.
    pub response_ms: u64,
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The adapter returned an accepted response.
    Success {
        response_text: String,
        structured_response: Option<serde_json::Value>,
        response_time_ms: u64,
    },
    /// The attempt failed; retryability comes from the error.
    Failure { error: ExecutionError },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }
}

/// The result of one job attempt, handed to the checkpoint manager.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// The cell that was attempted.
    pub cell: CellKey,

    /// Attempt number, 1-based.
    pub attempt: u32,

    /// Success or classified failure.
    pub outcome: JobOutcome,

    /// Timing breakdown.
    pub metrics: ExecutionMetrics,

    /// Session used, if the adapter required one.
    pub session_id: Option<String>,

    /// Credential used, if the adapter required one.
    pub credential_id: Option<String>,
}

impl JobResult {
    /// Build a success result.
    pub fn success(
        cell: CellKey,
        attempt: u32,
        response_text: String,
        structured_response: Option<serde_json::Value>,
        response_time_ms: u64,
        metrics: ExecutionMetrics,
    ) -> Self {
        Self {
            cell,
            attempt,
            outcome: JobOutcome::Success {
                response_text,
                structured_response,
                response_time_ms,
            },
            metrics,
            session_id: None,
            credential_id: None,
        }
    }

    /// Build a failure result.
    pub fn failure(cell: CellKey, attempt: u32, error: ExecutionError, metrics: ExecutionMetrics) -> Self {
        Self {
            cell,
            attempt,
            outcome: JobOutcome::Failure { error },
            metrics,
            session_id: None,
            credential_id: None,
        }
    }

    /// Attach the session id used by this attempt.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the credential id used by this attempt.
    pub fn with_credential(mut self, credential_id: impl Into<String>) -> Self {
        self.credential_id = Some(credential_id.into());
        self
    }
}
