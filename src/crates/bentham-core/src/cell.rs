//! Cells: the atomic unit of work.
//!
//! A cell is the triple (query index, surface id, location id). In memory a
//! cell is always the three-field [`CellKey`]; the delimited
//! `"{q}-{surface}-{location}"` form exists only at serialization
//! boundaries (checkpoint maps, event details). Because surface and
//! location ids may themselves contain hyphens, decoding requires the
//! manifest's location-id table.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one cell within a study.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellKey {
    /// Index into the manifest's query list.
    pub query_index: u32,

    /// Surface the query runs against.
    pub surface_id: String,

    /// Location the query runs from.
    pub location_id: String,
}

impl CellKey {
    /// Create a cell key.
    pub fn new(query_index: u32, surface_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            query_index,
            surface_id: surface_id.into(),
            location_id: location_id.into(),
        }
    }

    /// The on-disk delimited form: `"{q}-{surface}-{location}"`.
    ///
    /// Write-only-stable: decoding requires the known location ids, see
    /// [`CellKey::decode`].
    pub fn encode(&self) -> String {
        format!("{}-{}-{}", self.query_index, self.surface_id, self.location_id)
    }

    /// Decode a delimited key using the manifest's location-id table.
    ///
    /// The longest known location id that suffixes the key wins, which
    /// resolves ambiguity when both surface and location ids contain
    /// hyphens. Returns `None` when no known location matches or the
    /// remainder is not `"{q}-{surface}"`.
    pub fn decode(encoded: &str, known_locations: &[String]) -> Option<Self> {
        let mut candidates: Vec<&String> = known_locations.iter().collect();
        candidates.sort_by_key(|loc| std::cmp::Reverse(loc.len()));

        for location in candidates {
            let suffix = format!("-{location}");
            if let Some(rest) = encoded.strip_suffix(suffix.as_str()) {
                if let Some((index, surface)) = rest.split_once('-') {
                    if surface.is_empty() {
                        continue;
                    }
                    if let Ok(query_index) = index.parse::<u32>() {
                        return Some(Self::new(query_index, surface, location.as_str()));
                    }
                }
            }
        }
        None
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Materialize the frozen execution-queue order for a study.
///
/// Cells are grouped by surface, then location, with query index innermost;
/// identical manifests always produce identical orders. Priority ordering
/// between studies happens in the queue, not here.
pub fn expand_cells(surfaces: &[String], locations: &[String], query_count: usize) -> Vec<CellKey> {
    let mut cells = Vec::with_capacity(surfaces.len() * locations.len() * query_count);
    for surface in surfaces {
        for location in locations {
            for query_index in 0..query_count {
                cells.push(CellKey::new(query_index as u32, surface.clone(), location.clone()));
            }
        }
    }
    cells
}

/// Lifecycle status of a cell.
///
/// Transitions are monotonic: `pending → in_progress → terminal`, and
/// terminal statuses are sticky.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl CellStatus {
    /// Whether the status is terminal (sticky).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CellStatus::Completed | CellStatus::Failed | CellStatus::Skipped)
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: CellStatus) -> bool {
        match self {
            CellStatus::Pending => matches!(
                next,
                CellStatus::InProgress | CellStatus::Skipped | CellStatus::Failed
            ),
            CellStatus::InProgress => next.is_terminal() || next == CellStatus::InProgress,
            _ => false,
        }
    }
}

/// The latest recorded outcome for a cell, as persisted in the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CellResult {
    /// Encoded cell key (see [`CellKey::encode`]).
    pub cell_key: String,

    /// Status after this attempt.
    pub status: CellStatus,

    /// Attempt number that produced this result (1-based).
    pub attempt: u32,

    /// Response text, for completed cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,

    /// Structured payload returned by the adapter, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_response: Option<serde_json::Value>,

    /// Error code for failed cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,

    /// Error message for failed cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Adapter-reported response time.
    #[serde(default)]
    pub response_time_ms: u64,

    /// Session used, when the adapter required one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Credential used, when the adapter required one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,

    /// When the attempt finished.
    pub completed_at: DateTime<Utc>,
}

/// Per-cell retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Attempts made so far; never decreases.
    pub attempts: u32,

    /// Message of the most recent error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Code of the most recent error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<ErrorKind>,

    /// Once set, no further attempts are made even if the retry budget
    /// later rises.
    #[serde(default)]
    pub exhausted: bool,
}

impl RetryState {
    /// Record a failed attempt.
    pub fn record_attempt(&mut self, error: Option<String>, code: Option<ErrorKind>) {
        self.attempts += 1;
        self.last_error = error;
        self.last_error_code = code;
    }

    /// Merge a replacement record, keeping attempts monotonic and
    /// exhaustion sticky.
    pub fn replace_with(&mut self, attempts: u32, error: Option<String>, code: Option<ErrorKind>, exhausted: bool) {
        self.attempts = self.attempts.max(attempts);
        self.last_error = error;
        self.last_error_code = code;
        self.exhausted = self.exhausted || exhausted;
    }
}
