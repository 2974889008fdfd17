//! Error types for checkpoint operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The checkpoint file exists but does not parse.
    ///
    /// Distinct from absence: a missing file loads as `None`, a corrupt
    /// file must fail loudly so the orchestrator never silently restarts
    /// a study from scratch.
    #[error("corrupt checkpoint at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failed while writing.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid checkpoint state
    #[error("invalid checkpoint: {0}")]
    Invalid(String),
}
