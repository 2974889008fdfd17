//! Error types for pool operations

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in the credential and session pools
#[derive(Error, Debug)]
pub enum PoolError {
    /// The referenced credential does not exist in the pool.
    #[error("unknown credential: {0}")]
    UnknownCredential(String),

    /// The referenced session does not exist in the pool.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The session is not in a state that permits the operation.
    #[error("session {session_id} is {status}, expected {expected}")]
    IllegalSessionState {
        session_id: String,
        status: String,
        expected: String,
    },

    /// The pool has been shut down.
    #[error("pool is shut down")]
    ShutDown,
}
