//! # Bentham Core
//!
//! Shared data model and interfaces for the Bentham execution platform:
//! studies, cells, jobs, the boundary error taxonomy, lifecycle events, and
//! the surface-adapter contract.
//!
//! ## What lives here
//!
//! - **Study model** - Validated manifests, priorities, quality gates,
//!   completion criteria
//! - **Cells** - The (query, surface, location) unit of work, its status
//!   lifecycle and retry state
//! - **Jobs** - The in-flight representation of a cell attempt
//! - **Errors** - The classified error taxonomy with per-kind retryability
//! - **Events** - Lifecycle events and a non-blocking fan-out bus
//! - **Adapters** - The `SurfaceAdapter` trait and surface-id registry
//!
//! Concrete surface adapters, the HTTP gateway, and analytics are external
//! collaborators: they consume these interfaces but live outside the core.

pub mod adapter;
pub mod cell;
pub mod error;
pub mod events;
pub mod job;
pub mod study;

pub use adapter::{
    AdapterCapabilities, AdapterRegistry, QueryContext, QueryError, QueryResult,
    RequiredResources, SurfaceAdapter,
};
pub use cell::{expand_cells, CellKey, CellResult, CellStatus, RetryState};
pub use error::{ErrorKind, ExecutionError, Result};
pub use events::{EventBus, ExecutionEvent, PoolHealthLevel};
pub use job::{ExecutionMetrics, Job, JobOutcome, JobResult};
pub use study::{
    CompletionCriteria, EvidenceLevel, QualityGates, SessionIsolation, StudyManifest,
    StudyPriority, StudyStatus,
};
