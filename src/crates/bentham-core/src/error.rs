//! Error taxonomy shared across the execution core.
//!
//! Every failure that crosses the core boundary is classified by an
//! [`ErrorKind`], each of which carries a default retryability and a
//! suggested retry delay. Adapters may override retryability per result via
//! [`ExecutionError::retryable`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Error kinds surfaced at the core boundary.
///
/// The serialized form is the wire/checkpoint error code
/// (e.g. `RATE_LIMITED`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Manifest or request failed validation.
    Validation,
    /// Authentication against a surface failed.
    Auth,
    /// A referenced resource (study, cell, adapter) does not exist.
    ResourceNotFound,
    /// The surface rejected the call due to rate limiting.
    RateLimited,
    /// A quota on the surface or tenant was exceeded.
    QuotaExceeded,
    /// The surface is temporarily unavailable.
    SurfaceUnavailable,
    /// The call exceeded its deadline.
    Timeout,
    /// A network-level failure occurred.
    Network,
    /// The surface refused the query on content-policy grounds.
    ContentPolicy,
    /// The session handed to the adapter was unusable.
    SessionInvalid,
    /// The session's authentication has expired.
    SessionExpired,
    /// The proxy for the requested location failed.
    ProxyError,
    /// The response failed a post-execution quality gate.
    QualityGateFailed,
    /// The adapter reported a generic execution failure.
    ExecutionFailed,
    /// An internal invariant was violated.
    Internal,
    /// No adapter is registered for the requested surface.
    AdapterNotFound,
    /// No credential is currently available for the surface.
    NoCredentials,
}

impl ErrorKind {
    /// Default retryability for this kind.
    ///
    /// An adapter-supplied `retryable` flag overrides this default; see
    /// [`ExecutionError::effective_retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::SurfaceUnavailable
                | ErrorKind::QualityGateFailed
                | ErrorKind::SessionInvalid
                | ErrorKind::SessionExpired
                | ErrorKind::ProxyError
                | ErrorKind::NoCredentials
                | ErrorKind::ExecutionFailed
        )
    }

    /// Suggested delay before the next attempt, for retryable kinds.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ErrorKind::RateLimited => Some(Duration::from_secs(60)),
            ErrorKind::SurfaceUnavailable => Some(Duration::from_secs(30)),
            ErrorKind::Network => Some(Duration::from_secs(10)),
            ErrorKind::Timeout => Some(Duration::from_secs(5)),
            kind if kind.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    /// Wire code for this kind (the serialized SCREAMING_SNAKE_CASE form).
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Auth => "AUTH",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::SurfaceUnavailable => "SURFACE_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::ContentPolicy => "CONTENT_POLICY",
            ErrorKind::SessionInvalid => "SESSION_INVALID",
            ErrorKind::SessionExpired => "SESSION_EXPIRED",
            ErrorKind::ProxyError => "PROXY_ERROR",
            ErrorKind::QualityGateFailed => "QUALITY_GATE_FAILED",
            ErrorKind::ExecutionFailed => "EXECUTION_FAILED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::AdapterNotFound => "ADAPTER_NOT_FOUND",
            ErrorKind::NoCredentials => "NO_CREDENTIALS",
        }
    }

    /// Parse a wire code back into a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "VALIDATION" => Some(ErrorKind::Validation),
            "AUTH" => Some(ErrorKind::Auth),
            "RESOURCE_NOT_FOUND" => Some(ErrorKind::ResourceNotFound),
            "RATE_LIMITED" => Some(ErrorKind::RateLimited),
            "QUOTA_EXCEEDED" => Some(ErrorKind::QuotaExceeded),
            "SURFACE_UNAVAILABLE" => Some(ErrorKind::SurfaceUnavailable),
            "TIMEOUT" => Some(ErrorKind::Timeout),
            "NETWORK" => Some(ErrorKind::Network),
            "CONTENT_POLICY" => Some(ErrorKind::ContentPolicy),
            "SESSION_INVALID" => Some(ErrorKind::SessionInvalid),
            "SESSION_EXPIRED" => Some(ErrorKind::SessionExpired),
            "PROXY_ERROR" => Some(ErrorKind::ProxyError),
            "QUALITY_GATE_FAILED" => Some(ErrorKind::QualityGateFailed),
            "EXECUTION_FAILED" => Some(ErrorKind::ExecutionFailed),
            "INTERNAL" => Some(ErrorKind::Internal),
            "ADAPTER_NOT_FOUND" => Some(ErrorKind::AdapterNotFound),
            "NO_CREDENTIALS" => Some(ErrorKind::NoCredentials),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified execution failure.
///
/// `retryable`, when present, is the adapter's override of the kind's
/// default retryability.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    /// Classified kind of the failure.
    pub kind: ErrorKind,

    /// Human-readable description.
    pub message: String,

    /// Adapter-supplied retryability override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ExecutionError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: None,
        }
    }

    /// Override the kind's default retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Whether this failure should be retried.
    ///
    /// The adapter override wins over the kind default when present.
    pub fn effective_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.kind.is_retryable())
    }

    /// Suggested delay before the next attempt.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        if self.effective_retryable() {
            self.kind
                .suggested_retry_delay()
                .or(Some(Duration::from_secs(5)))
        } else {
            None
        }
    }
}
