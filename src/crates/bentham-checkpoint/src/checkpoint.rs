//! The per-study checkpoint document.
//!
//! A [`StudyCheckpoint`] is the durable, resume-enabling snapshot of a
//! study's progress: per-cell results, per-cell retry state, the frozen
//! execution-queue order, and derived counters. One JSON document per study
//! is written at `<checkpointDir>/<studyId>.checkpoint.json` with camelCase
//! keys.
//!
//! # Counters are derived, not incremented
//!
//! `completed_cells` / `failed_cells` are recomputed from the result map on
//! every [`StudyCheckpoint::record_result`]. The map is the source of
//! truth, which makes `record_result` idempotent: applying the same result
//! twice changes nothing but `updated_at`.
//!
//! # Invariants
//!
//! - `completed_cells + failed_cells ≤ total_cells`
//! - `progress_percent = round(100 · (completed + failed) / total)`
//! - retry-state attempt counts never decrease across saves
//! - a cell with a terminal status never leaves it

use bentham_core::cell::{CellKey, CellResult, CellStatus, RetryState};
use bentham_core::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: &str = "1.0.0";

/// Study-level facts frozen into the checkpoint at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    /// Surface ids of the study.
    pub surfaces: Vec<String>,

    /// Location ids of the study; also the decode table for cell keys.
    pub locations: Vec<String>,

    /// Number of queries in the manifest.
    pub query_count: usize,

    /// When execution started.
    pub start_time: DateTime<Utc>,
}

/// Outcome of a resume check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCheck {
    /// False once every cell is terminal.
    pub can_resume: bool,

    /// Number of cells still to run.
    pub remaining: usize,
}

/// Durable snapshot of one study's progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyCheckpoint {
    /// Format version, currently "1.0.0".
    pub version: String,

    /// Owning study.
    pub study_id: String,

    /// Display name of the study.
    pub study_name: String,

    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,

    /// When the checkpoint was last updated.
    pub updated_at: DateTime<Utc>,

    /// Total cells in the study.
    pub total_cells: usize,

    /// Cells whose latest result is `completed`.
    pub completed_cells: usize,

    /// Cells whose latest result is `failed`.
    pub failed_cells: usize,

    /// round(100 · (completed + failed) / total).
    pub progress_percent: u32,

    /// Latest result per cell, keyed by encoded cell key.
    pub cell_results: HashMap<String, CellResult>,

    /// Frozen execution order (encoded cell keys).
    pub execution_queue: Vec<String>,

    /// Retry state per cell, keyed by encoded cell key.
    pub retry_states: HashMap<String, RetryState>,

    /// Study facts frozen at creation.
    pub metadata: CheckpointMetadata,
}

impl StudyCheckpoint {
    /// Initialize a checkpoint with zeroed counters and the materialized
    /// execution-queue order (surface-grouped, then location, insertion
    /// order within; see [`bentham_core::expand_cells`]).
    pub fn create(
        study_id: impl Into<String>,
        study_name: impl Into<String>,
        surfaces: Vec<String>,
        locations: Vec<String>,
        query_count: usize,
    ) -> Self {
        let now = Utc::now();
        let queue: Vec<String> = bentham_core::expand_cells(&surfaces, &locations, query_count)
            .iter()
            .map(CellKey::encode)
            .collect();
        let total_cells = queue.len();

        Self {
            version: CHECKPOINT_VERSION.to_string(),
            study_id: study_id.into(),
            study_name: study_name.into(),
            created_at: now,
            updated_at: now,
            total_cells,
            completed_cells: 0,
            failed_cells: 0,
            progress_percent: 0,
            cell_results: HashMap::new(),
            execution_queue: queue,
            retry_states: HashMap::new(),
            metadata: CheckpointMetadata {
                surfaces,
                locations,
                query_count,
                start_time: now,
            },
        }
    }

    /// Record the latest result for a cell and recompute counters.
    ///
    /// Terminal statuses are sticky: a result for a cell that is already
    /// completed, failed, or skipped is ignored.
    pub fn record_result(&mut self, result: CellResult) {
        if let Some(existing) = self.cell_results.get(&result.cell_key) {
            if existing.status.is_terminal() && existing.status != result.status {
                tracing::warn!(
                    cell_key = %result.cell_key,
                    current = ?existing.status,
                    incoming = ?result.status,
                    "ignoring result for terminal cell"
                );
                return;
            }
        }
        self.cell_results.insert(result.cell_key.clone(), result);
        self.recompute();
    }

    /// Replace the retry record for a cell.
    ///
    /// Attempt counts are clamped monotonic and exhaustion is sticky.
    pub fn record_retry(
        &mut self,
        cell_key: &str,
        attempts: u32,
        last_error: Option<String>,
        last_error_code: Option<ErrorKind>,
        exhausted: bool,
    ) {
        self.retry_states
            .entry(cell_key.to_string())
            .or_default()
            .replace_with(attempts, last_error, last_error_code, exhausted);
        self.updated_at = Utc::now();
    }

    /// Queue order minus cells whose latest status is completed or failed.
    pub fn remaining_cells(&self) -> Vec<String> {
        self.execution_queue
            .iter()
            .filter(|key| {
                !matches!(
                    self.cell_results.get(key.as_str()).map(|r| r.status),
                    Some(CellStatus::Completed) | Some(CellStatus::Failed)
                )
            })
            .cloned()
            .collect()
    }

    /// Whether any work remains, and how much.
    pub fn can_resume(&self) -> ResumeCheck {
        let remaining = self.remaining_cells().len();
        ResumeCheck {
            can_resume: self.completed_cells + self.failed_cells < self.total_cells,
            remaining,
        }
    }

    /// Recompute counters and percent from the result map.
    fn recompute(&mut self) {
        let mut completed = 0usize;
        let mut failed = 0usize;
        for result in self.cell_results.values() {
            match result.status {
                CellStatus::Completed => completed += 1,
                CellStatus::Failed => failed += 1,
                _ => {}
            }
        }
        self.completed_cells = completed;
        self.failed_cells = failed;
        self.progress_percent = if self.total_cells == 0 {
            0
        } else {
            ((100.0 * (completed + failed) as f64) / self.total_cells as f64).round() as u32
        };
        self.updated_at = Utc::now();
    }
}
