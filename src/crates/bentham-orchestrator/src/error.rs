//! Error types for the orchestrator
//!
//! Provides a unified error type for orchestrator operations.

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Main error type for orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Study manifest rejected at submission
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// Referenced study does not exist
    #[error("Study not found: {0}")]
    StudyNotFound(String),

    /// Study is in a state that forbids the operation
    #[error("Study {study_id} is {status}")]
    StudyState { study_id: String, status: String },

    /// Checkpoint engine error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] bentham_checkpoint::CheckpointError),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(#[from] bentham_pools::PoolError),

    /// Shutdown did not drain in time
    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for OrchestratorError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for OrchestratorError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}
