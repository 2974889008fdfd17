//! Lifecycle event emission for observability.
//!
//! Workers and pools report their transitions as [`ExecutionEvent`]s on an
//! [`EventBus`]. Listeners subscribe for an unbounded channel, so emission
//! never blocks dispatch; a listener that falls behind buffers, a listener
//! that drops its receiver is pruned on the next emit.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Health grade of a resource pool, as carried by events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealthLevel {
    Healthy,
    Degraded,
    Critical,
}

/// Events emitted by the execution core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A worker joined the dispatch pool.
    WorkerStarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker left the dispatch pool.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was handed to a worker.
    JobStarted {
        worker_id: String,
        job_id: String,
        study_id: String,
        cell_key: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt produced an accepted response.
    JobCompleted {
        worker_id: String,
        job_id: String,
        study_id: String,
        cell_key: String,
        attempt: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt failed.
    JobFailed {
        worker_id: String,
        job_id: String,
        study_id: String,
        cell_key: String,
        attempt: u32,
        error_code: String,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A study reached a terminal state.
    StudyCompleted {
        study_id: String,
        status: String,
        completed_cells: usize,
        failed_cells: usize,
        timestamp: DateTime<Utc>,
    },
    /// Repeated failures crossed an incident threshold.
    IncidentOpened {
        study_id: String,
        cell_key: String,
        severity: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A credential pool's health grade changed.
    PoolHealthChanged {
        surface_id: String,
        previous: PoolHealthLevel,
        current: PoolHealthLevel,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::WorkerStarted { timestamp, .. }
            | ExecutionEvent::WorkerStopped { timestamp, .. }
            | ExecutionEvent::JobStarted { timestamp, .. }
            | ExecutionEvent::JobCompleted { timestamp, .. }
            | ExecutionEvent::JobFailed { timestamp, .. }
            | ExecutionEvent::StudyCompleted { timestamp, .. }
            | ExecutionEvent::IncidentOpened { timestamp, .. }
            | ExecutionEvent::PoolHealthChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Snake_case tag of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::WorkerStarted { .. } => "worker_started",
            ExecutionEvent::WorkerStopped { .. } => "worker_stopped",
            ExecutionEvent::JobStarted { .. } => "job_started",
            ExecutionEvent::JobCompleted { .. } => "job_completed",
            ExecutionEvent::JobFailed { .. } => "job_failed",
            ExecutionEvent::StudyCompleted { .. } => "study_completed",
            ExecutionEvent::IncidentOpened { .. } => "incident_opened",
            ExecutionEvent::PoolHealthChanged { .. } => "pool_health_changed",
        }
    }

    /// Create a WorkerStarted event.
    pub fn worker_started(worker_id: impl Into<String>) -> Self {
        ExecutionEvent::WorkerStarted {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a WorkerStopped event.
    pub fn worker_stopped(worker_id: impl Into<String>) -> Self {
        ExecutionEvent::WorkerStopped {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(
        worker_id: impl Into<String>,
        job_id: impl Into<String>,
        study_id: impl Into<String>,
        cell_key: impl Into<String>,
        attempt: u32,
    ) -> Self {
        ExecutionEvent::JobStarted {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
            study_id: study_id.into(),
            cell_key: cell_key.into(),
            attempt,
            timestamp: Utc::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        worker_id: impl Into<String>,
        job_id: impl Into<String>,
        study_id: impl Into<String>,
        cell_key: impl Into<String>,
        attempt: u32,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::JobCompleted {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
            study_id: study_id.into(),
            cell_key: cell_key.into(),
            attempt,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Create a JobFailed event.
    pub fn job_failed(
        worker_id: impl Into<String>,
        job_id: impl Into<String>,
        study_id: impl Into<String>,
        cell_key: impl Into<String>,
        attempt: u32,
        error_code: impl Into<String>,
        will_retry: bool,
    ) -> Self {
        ExecutionEvent::JobFailed {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
            study_id: study_id.into(),
            cell_key: cell_key.into(),
            attempt,
            error_code: error_code.into(),
            will_retry,
            timestamp: Utc::now(),
        }
    }

    /// Create a StudyCompleted event.
    pub fn study_completed(
        study_id: impl Into<String>,
        status: impl Into<String>,
        completed_cells: usize,
        failed_cells: usize,
    ) -> Self {
        ExecutionEvent::StudyCompleted {
            study_id: study_id.into(),
            status: status.into(),
            completed_cells,
            failed_cells,
            timestamp: Utc::now(),
        }
    }

    /// Create an IncidentOpened event.
    pub fn incident_opened(
        study_id: impl Into<String>,
        cell_key: impl Into<String>,
        severity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ExecutionEvent::IncidentOpened {
            study_id: study_id.into(),
            cell_key: cell_key.into(),
            severity: severity.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a PoolHealthChanged event.
    pub fn pool_health_changed(
        surface_id: impl Into<String>,
        previous: PoolHealthLevel,
        current: PoolHealthLevel,
    ) -> Self {
        ExecutionEvent::PoolHealthChanged {
            surface_id: surface_id.into(),
            previous,
            current,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out bus for [`ExecutionEvent`]s.
///
/// Emission is synchronous and never blocks: each subscriber holds an
/// unbounded channel, and events for the same (worker, job) pair are
/// emitted from a single call site so subscribers observe them in order.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<mpsc::UnboundedSender<ExecutionEvent>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Register a listener and return it as a stream.
    pub fn subscribe_stream(&self) -> UnboundedReceiverStream<ExecutionEvent> {
        UnboundedReceiverStream::new(self.subscribe())
    }

    /// Emit an event to every live subscriber.
    pub fn emit(&self, event: ExecutionEvent) {
        tracing::debug!(event_type = event.kind(), "execution event");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ExecutionEvent::job_started("w1", "j1", "s1", "0-a-x", 1));
        bus.emit(ExecutionEvent::job_completed("w1", "j1", "s1", "0-a-x", 1, 5));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "job_started");
        assert_eq!(second.kind(), "job_completed");
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _keep = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.emit(ExecutionEvent::worker_started("w1"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn event_serialization_uses_snake_case_tags() {
        let event = ExecutionEvent::worker_started("w1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"worker_started\""));

        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "worker_started");
    }
}
