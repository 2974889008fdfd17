//! # Bentham Orchestrator
//!
//! The execution engine of the Bentham platform. A validated study expands
//! into a Cartesian grid of cells (query × surface × location); each cell
//! becomes a retryable job driven through a priority queue and a worker
//! pool, with durable checkpoints, credential rotation, session
//! lifecycles, and lifecycle events along the way.
//!
//! ## Shape
//!
//! - [`Orchestrator`] - the engine and its control API
//!   (`submit_study`, `study_status`, `pause_study`, `resume_study`,
//!   `cancel_study`, `shutdown`)
//! - [`queue::JobQueue`] - priority queue with earliest-execution times
//! - [`worker::WorkerPool`] - concurrency slots with optional
//!   surface/location filters
//! - [`executor::JobExecutor`] - the per-attempt execution contract
//! - [`retry::RetryPolicy`] - exponential backoff with bounded jitter
//! - [`troubleshooter::Troubleshooter`] - failure classification and
//!   incident escalation
//! - [`config::PlatformConfig`] - process-wide configuration, read once
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bentham_orchestrator::{Orchestrator, PlatformConfig};
//! use bentham_core::AdapterRegistry;
//! use std::sync::Arc;
//!
//! # async fn example(manifest: bentham_core::StudyManifest) -> anyhow::Result<()> {
//! let registry = Arc::new(AdapterRegistry::new());
//! // registry.register(Arc::new(MyAdapter::new()));
//!
//! let engine = Orchestrator::new(PlatformConfig::default(), registry).await?;
//! engine.start();
//!
//! let receipt = engine.submit_study(manifest).await?;
//! let status = engine.study_status(&receipt.study_id).await?;
//! println!("{:?}", status.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod study;
pub mod troubleshooter;
pub mod worker;

pub use config::{load_config, PlatformConfig};
pub use engine::{Orchestrator, SubmitReceipt};
pub use error::{OrchestratorError, Result};
pub use executor::JobExecutor;
pub use retry::RetryPolicy;
pub use study::{StudyProgress, StudyStatusReport, SurfaceCoverage};
pub use troubleshooter::{IncidentSeverity, Troubleshooter};
pub use worker::{Worker, WorkerConfig, WorkerPool};
