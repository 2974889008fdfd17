//! Surface-adapter interfaces.
//!
//! The core is an orchestration engine, not a collection of surface
//! clients: concrete adapters (LLM HTTP APIs, browser-driven chat UIs,
//! SERP endpoints) live outside and implement [`SurfaceAdapter`]. The
//! registry dispatches polymorphically by surface id.

use crate::error::{ErrorKind, ExecutionError};
use crate::study::EvidenceLevel;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Resources an adapter needs per query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequiredResources {
    /// Needs a checked-out session (browser-like context).
    pub needs_session: bool,

    /// Needs a credential from the surface's pool.
    pub needs_credential: bool,

    /// Needs a proxy for the requested location.
    pub needs_proxy: bool,
}

/// Static capability metadata declared by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdapterCapabilities {
    /// Maximum input size in tokens, when the surface enforces one.
    pub max_input_tokens: Option<u32>,

    /// Whether the surface accepts a system prompt.
    pub supports_system_prompt: bool,

    /// Whether the surface accepts conversation history.
    pub supports_history: bool,
}

/// Per-query execution context handed to adapters.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Session to execute in, when the adapter declared `needs_session`.
    pub session_id: Option<String>,

    /// Credential to authenticate with, when the adapter declared
    /// `needs_credential`. The secret itself stays behind the pool API;
    /// adapters resolve the id through their deployment's secret store.
    pub credential_id: Option<String>,

    /// Location the query must appear to originate from.
    pub location_id: String,

    /// Evidence level to capture.
    pub evidence_level: EvidenceLevel,

    /// Deadline for the call; adapters must observe it cooperatively.
    pub timeout: Duration,

    /// Owning study.
    pub study_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Correlation id threaded through logs and events.
    pub correlation_id: String,
}

/// Error half of a [`QueryResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryError {
    /// Classified error code.
    pub code: ErrorKind,

    /// Human-readable description.
    pub message: String,

    /// Adapter override of the code's default retryability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl From<QueryError> for ExecutionError {
    fn from(err: QueryError) -> Self {
        ExecutionError {
            kind: err.code,
            message: err.message,
            retryable: err.retryable,
        }
    }
}

/// What an adapter returns for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    /// Whether the surface produced a response.
    pub success: bool,

    /// Response text, when successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,

    /// Structured payload, when the surface returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_response: Option<serde_json::Value>,

    /// Time the surface took to respond.
    pub response_time_ms: u64,

    /// Failure details, when unsuccessful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryResult {
    /// Build a successful result.
    pub fn ok(response_text: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            success: true,
            response_text: Some(response_text.into()),
            structured_response: None,
            response_time_ms,
            error: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.structured_response = Some(value);
        self
    }

    /// Build a failed result.
    pub fn error(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_text: None,
            structured_response: None,
            response_time_ms: 0,
            error: Some(QueryError {
                code,
                message: message.into(),
                retryable: None,
            }),
        }
    }

    /// Override the error's retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.retryable = Some(retryable);
        }
        self
    }
}

/// A surface that can answer queries.
///
/// Implementations handle the specifics of their surface (HTTP calls,
/// browser automation, SERP requests) and must be `Send + Sync` so one
/// adapter instance serves many workers. Adapters must observe
/// `QueryContext::timeout` cooperatively; the executor additionally bounds
/// the call from the outside.
#[async_trait]
pub trait SurfaceAdapter: Send + Sync {
    /// Id this adapter serves; registry key.
    fn surface_id(&self) -> &str;

    /// Resources the adapter needs per query.
    fn required_resources(&self) -> RequiredResources;

    /// Static capability metadata.
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    /// Execute one query and return the surface's response.
    async fn execute_query(&self, query: &str, context: &QueryContext) -> QueryResult;
}

/// Registry mapping surface ids to adapter handles.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn SurfaceAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its declared surface id.
    ///
    /// Re-registering a surface id replaces the previous adapter.
    pub fn register(&self, adapter: Arc<dyn SurfaceAdapter>) {
        self.adapters.insert(adapter.surface_id().to_string(), adapter);
    }

    /// Look up the adapter for a surface.
    pub fn get(&self, surface_id: &str) -> Option<Arc<dyn SurfaceAdapter>> {
        self.adapters.get(surface_id).map(|entry| entry.value().clone())
    }

    /// Whether a surface has an adapter.
    pub fn contains(&self, surface_id: &str) -> bool {
        self.adapters.contains_key(surface_id)
    }

    /// Registered surface ids.
    pub fn surface_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("surfaces", &self.surface_ids())
            .finish()
    }
}
