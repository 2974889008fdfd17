//! Study manifests and study-level enums.
//!
//! A [`StudyManifest`] is the validated unit of work submitted to the
//! orchestrator. Validation happens upstream; the core treats manifests as
//! immutable once submitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority of a study, in dispatch order (critical first).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StudyPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl StudyPriority {
    /// Ordering rank; lower ranks dispatch first.
    pub fn rank(&self) -> u8 {
        match self {
            StudyPriority::Critical => 0,
            StudyPriority::High => 1,
            StudyPriority::Normal => 2,
            StudyPriority::Low => 3,
        }
    }
}

/// How much evidence is captured alongside each response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceLevel {
    #[default]
    Metadata,
    Html,
    Screenshot,
    Full,
}

/// How sessions are shared between cells of a study.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionIsolation {
    #[default]
    Shared,
    PerStudy,
    PerCell,
}

/// Post-execution acceptance tests applied to every response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGates {
    /// Minimum acceptable response length in characters.
    pub min_response_length: usize,

    /// Reject empty or whitespace-only responses.
    pub require_actual_content: bool,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_response_length: 0,
            require_actual_content: true,
        }
    }
}

/// Coverage thresholds that declare a study finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompletionCriteria {
    /// Surfaces that must individually reach the coverage threshold.
    pub required_surfaces: Vec<String>,

    /// Fraction of cells per required surface that must complete, in [0, 1].
    pub coverage_threshold: f64,
}

/// Terminal and non-terminal states of a study.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StudyStatus {
    /// Cells are being dispatched.
    Running,
    /// Dispatch is gated; running jobs complete.
    Paused,
    /// Every required surface met its coverage threshold.
    Completed,
    /// The queue drained without meeting the completion criteria.
    Partial,
    /// Every required surface finished with zero successes.
    Failed,
    /// The study was cancelled; non-terminal cells were skipped.
    Cancelled,
}

impl StudyStatus {
    /// Whether the study has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StudyStatus::Completed
                | StudyStatus::Partial
                | StudyStatus::Failed
                | StudyStatus::Cancelled
        )
    }
}

/// A validated study: queries × surfaces × locations plus execution policy.
///
/// Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyManifest {
    /// Unique study id, assigned by the gateway.
    pub id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Display name.
    pub name: String,

    /// Query texts; cells reference these by index.
    pub queries: Vec<String>,

    /// Surface ids the study runs against.
    pub surfaces: Vec<String>,

    /// Location ids the study runs from.
    pub locations: Vec<String>,

    /// Response acceptance tests.
    #[serde(default)]
    pub quality_gates: QualityGates,

    /// Coverage thresholds for completion.
    #[serde(default)]
    pub completion: CompletionCriteria,

    /// Maximum retries per cell (attempts = max_retries + 1).
    #[serde(default)]
    pub max_retries: u32,

    /// Evidence captured per response.
    #[serde(default)]
    pub evidence_level: EvidenceLevel,

    /// Session sharing mode.
    #[serde(default)]
    pub session_isolation: SessionIsolation,

    /// Hard deadline for the whole study.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Dispatch priority.
    #[serde(default)]
    pub priority: StudyPriority,
}

impl StudyManifest {
    /// Total number of cells this manifest expands to.
    pub fn total_cells(&self) -> usize {
        self.queries.len() * self.surfaces.len() * self.locations.len()
    }

    /// Number of cells per surface (queries × locations).
    pub fn cells_per_surface(&self) -> usize {
        self.queries.len() * self.locations.len()
    }
}
