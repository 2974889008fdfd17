//! Per-study runtime state.
//!
//! The engine keeps one [`StudyRuntime`] per submitted study: its status,
//! in-flight count, checkpoint manager, and per-surface completion tallies
//! used to evaluate the completion criteria without rescanning the
//! checkpoint map on every result.

use bentham_checkpoint::{CheckpointManager, StudyCheckpoint};
use bentham_core::cell::{CellKey, CellStatus};
use bentham_core::study::{StudyManifest, StudyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Coverage of one surface, as reported by the status API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceCoverage {
    pub surface_id: String,
    pub total_cells: usize,
    pub completed_cells: usize,
    pub coverage: f64,
    pub required: bool,
}

/// Progress summary of a study.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyProgress {
    pub total_cells: usize,
    pub completed_cells: usize,
    pub failed_cells: usize,
    pub progress_percent: u32,
}

/// Full status report for the control API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyStatusReport {
    pub study_id: String,
    pub status: StudyStatus,
    pub progress: StudyProgress,
    pub surfaces: Vec<SurfaceCoverage>,
}

/// Live execution state of one study.
pub struct StudyRuntime {
    pub manifest: StudyManifest,
    pub status: StudyStatus,
    pub in_flight: usize,
    pub checkpoint: Arc<CheckpointManager>,
    pub started_at: DateTime<Utc>,
    completed_per_surface: HashMap<String, usize>,
}

impl StudyRuntime {
    /// Build runtime state, seeding tallies from a (possibly resumed)
    /// checkpoint.
    pub fn new(
        manifest: StudyManifest,
        checkpoint: Arc<CheckpointManager>,
        snapshot: &StudyCheckpoint,
    ) -> Self {
        let mut completed_per_surface: HashMap<String, usize> = manifest
            .surfaces
            .iter()
            .map(|s| (s.clone(), 0))
            .collect();

        for (key, result) in &snapshot.cell_results {
            if result.status == CellStatus::Completed {
                if let Some(cell) = CellKey::decode(key, &manifest.locations) {
                    *completed_per_surface.entry(cell.surface_id).or_insert(0) += 1;
                }
            }
        }

        Self {
            manifest,
            status: StudyStatus::Running,
            in_flight: 0,
            checkpoint,
            started_at: Utc::now(),
            completed_per_surface,
        }
    }

    /// Tally a newly completed cell.
    pub fn record_completion(&mut self, cell: &CellKey) {
        *self
            .completed_per_surface
            .entry(cell.surface_id.clone())
            .or_insert(0) += 1;
    }

    /// Surfaces the completion criteria bind. An empty required list means
    /// every surface of the study is required.
    pub fn required_surfaces(&self) -> Vec<String> {
        if self.manifest.completion.required_surfaces.is_empty() {
            self.manifest.surfaces.clone()
        } else {
            self.manifest.completion.required_surfaces.clone()
        }
    }

    /// completed / total for one surface.
    pub fn coverage(&self, surface_id: &str) -> f64 {
        let total = self.manifest.cells_per_surface();
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed_per_surface.get(surface_id).copied().unwrap_or(0);
        completed as f64 / total as f64
    }

    /// Whether every required surface has reached the coverage threshold.
    pub fn criteria_met(&self) -> bool {
        let threshold = self.manifest.completion.coverage_threshold;
        self.required_surfaces()
            .iter()
            .all(|surface| self.coverage(surface) >= threshold)
    }

    /// Terminal status once the queue has drained for this study.
    pub fn drained_outcome(&self) -> StudyStatus {
        if self.criteria_met() {
            return StudyStatus::Completed;
        }
        let all_required_dead = self.required_surfaces().iter().all(|surface| {
            self.completed_per_surface.get(surface).copied().unwrap_or(0) == 0
        });
        if all_required_dead {
            StudyStatus::Failed
        } else {
            StudyStatus::Partial
        }
    }

    /// Per-surface coverage rows for the status API.
    pub fn surface_coverage(&self) -> Vec<SurfaceCoverage> {
        let required = self.required_surfaces();
        self.manifest
            .surfaces
            .iter()
            .map(|surface| SurfaceCoverage {
                surface_id: surface.clone(),
                total_cells: self.manifest.cells_per_surface(),
                completed_cells: self
                    .completed_per_surface
                    .get(surface)
                    .copied()
                    .unwrap_or(0),
                coverage: self.coverage(surface),
                required: required.contains(surface),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bentham_checkpoint::{CheckpointManagerConfig, InMemoryCheckpointStore};
    use bentham_core::study::{
        CompletionCriteria, EvidenceLevel, QualityGates, SessionIsolation, StudyPriority,
    };

    fn manifest(required: Vec<&str>, threshold: f64) -> StudyManifest {
        StudyManifest {
            id: "study-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            name: "test".to_string(),
            queries: vec!["q0".to_string(), "q1".to_string()],
            surfaces: vec!["a".to_string(), "b".to_string()],
            locations: vec!["x".to_string()],
            quality_gates: QualityGates::default(),
            completion: CompletionCriteria {
                required_surfaces: required.into_iter().map(String::from).collect(),
                coverage_threshold: threshold,
            },
            max_retries: 0,
            evidence_level: EvidenceLevel::Metadata,
            session_isolation: SessionIsolation::Shared,
            deadline: None,
            priority: StudyPriority::Normal,
        }
    }

    fn runtime(required: Vec<&str>, threshold: f64) -> StudyRuntime {
        let manifest = manifest(required, threshold);
        let snapshot = StudyCheckpoint::create(
            &manifest.id,
            &manifest.name,
            manifest.surfaces.clone(),
            manifest.locations.clone(),
            manifest.queries.len(),
        );
        let manager = Arc::new(CheckpointManager::new(
            Arc::new(InMemoryCheckpointStore::new()),
            snapshot.clone(),
            CheckpointManagerConfig::default(),
        ));
        StudyRuntime::new(manifest, manager, &snapshot)
    }

    #[test]
    fn empty_required_list_means_all_surfaces() {
        let rt = runtime(vec![], 1.0);
        assert_eq!(rt.required_surfaces(), vec!["a", "b"]);
    }

    #[test]
    fn criteria_track_required_surfaces_only() {
        let mut rt = runtime(vec!["a"], 1.0);
        assert!(!rt.criteria_met());

        rt.record_completion(&CellKey::new(0, "a", "x"));
        rt.record_completion(&CellKey::new(1, "a", "x"));
        assert!(rt.criteria_met());
        assert_eq!(rt.drained_outcome(), StudyStatus::Completed);
    }

    #[test]
    fn partial_when_some_required_coverage_missing() {
        let mut rt = runtime(vec!["a", "b"], 1.0);
        rt.record_completion(&CellKey::new(0, "a", "x"));
        rt.record_completion(&CellKey::new(1, "a", "x"));
        assert!(!rt.criteria_met());
        assert_eq!(rt.drained_outcome(), StudyStatus::Partial);
    }

    #[test]
    fn failed_when_every_required_surface_has_zero_successes() {
        let rt = runtime(vec!["a", "b"], 0.5);
        assert_eq!(rt.drained_outcome(), StudyStatus::Failed);
    }

    #[test]
    fn threshold_below_one_completes_early() {
        let mut rt = runtime(vec!["a"], 0.5);
        rt.record_completion(&CellKey::new(0, "a", "x"));
        assert!(rt.criteria_met());
    }

    #[test]
    fn coverage_math() {
        let mut rt = runtime(vec![], 1.0);
        rt.record_completion(&CellKey::new(0, "a", "x"));
        assert!((rt.coverage("a") - 0.5).abs() < f64::EPSILON);
        assert!((rt.coverage("b")).abs() < f64::EPSILON);

        let rows = rt.surface_coverage();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].completed_cells, 1);
        assert!(rows[0].required);
    }
}
