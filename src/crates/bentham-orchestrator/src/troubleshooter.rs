//! Failure classification and incident escalation.
//!
//! The troubleshooter is the canonical mapping from error kinds to
//! retryability and suggested delays (the orchestrator's retry scheduling
//! uses the exponential policy in [`crate::retry`]; suggested delays feed
//! floors like the no-credentials back-pressure wait). It also tracks
//! consecutive failures per cell to decide when an incident should be
//! opened.

use bentham_core::error::{ErrorKind, ExecutionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Escalation level for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentSeverity {
    Warning,
    Critical,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Warning => "warning",
            IncidentSeverity::Critical => "critical",
        }
    }
}

/// Consecutive failures on one cell before an incident opens.
const INCIDENT_THRESHOLD: u32 = 3;

/// Streak length at which an incident escalates to critical.
const CRITICAL_THRESHOLD: u32 = 5;

/// Classifies failures and escalates repeat offenders.
#[derive(Debug, Default)]
pub struct Troubleshooter {
    streaks: Mutex<HashMap<String, u32>>,
}

impl Troubleshooter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a failure should be retried. Adapter-reported overrides win
    /// over the per-kind defaults.
    pub fn is_retryable(&self, error: &ExecutionError) -> bool {
        error.effective_retryable()
    }

    /// Per-kind suggested delay before the next attempt.
    pub fn suggested_retry_delay(&self, kind: ErrorKind) -> Option<Duration> {
        kind.suggested_retry_delay()
    }

    /// Record a failure for a cell. Returns a severity when the streak
    /// crosses an incident threshold.
    ///
    /// Severity is reported through `incident_opened` events only; it does
    /// not modulate backoff.
    pub fn record_failure(&self, cell_key: &str) -> Option<IncidentSeverity> {
        let mut streaks = self.streaks.lock();
        let streak = streaks.entry(cell_key.to_string()).or_insert(0);
        *streak += 1;
        match *streak {
            n if n == CRITICAL_THRESHOLD => Some(IncidentSeverity::Critical),
            n if n == INCIDENT_THRESHOLD => Some(IncidentSeverity::Warning),
            _ => None,
        }
    }

    /// Reset a cell's failure streak after a success.
    pub fn record_success(&self, cell_key: &str) {
        self.streaks.lock().remove(cell_key);
    }

    /// Drop all streaks for a study's cells once it finalizes.
    pub fn clear_study(&self, study_prefix_keys: &[String]) {
        let mut streaks = self.streaks.lock();
        for key in study_prefix_keys {
            streaks.remove(key);
        }
    }
}
