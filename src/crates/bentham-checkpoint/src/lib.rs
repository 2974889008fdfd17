//! # Bentham Checkpoint
//!
//! Durable, crash-safe progress for studies. Optimized for many small
//! incremental writes: the [`CheckpointManager`] batches result recordings
//! and persists on a count-or-time policy, while the file store's
//! temp-then-rename protocol guarantees readers never observe a partially
//! written checkpoint.
//!
//! ## Layers
//!
//! - [`StudyCheckpoint`] - the per-study document (counters derived from
//!   the result map, frozen execution queue, retry states)
//! - [`CheckpointStore`] - the storage seam, with [`FileCheckpointStore`]
//!   (atomic JSON files) and [`InMemoryCheckpointStore`] (tests)
//! - [`CheckpointManager`] - single-writer auto-saving wrapper

pub mod checkpoint;
pub mod error;
pub mod manager;
pub mod store;

pub use checkpoint::{CheckpointMetadata, ResumeCheck, StudyCheckpoint, CHECKPOINT_VERSION};
pub use error::{CheckpointError, Result};
pub use manager::{CheckpointManager, CheckpointManagerConfig};
pub use store::{list_checkpoints, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
