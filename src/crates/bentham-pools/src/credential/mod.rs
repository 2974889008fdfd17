//! Credential pools: rotation, error cooldown, and health.
//!
//! One pool per surface holds interchangeable credentials. Callers never
//! pick a credential themselves: they ask the pool for the next one under
//! the pool's rotation strategy and report the outcome back, and the pool
//! handles cooldown and health from there.

mod manager;
mod pool;

pub use manager::CredentialPoolManager;
pub use pool::CredentialPool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secret material variants a credential can carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialMaterial {
    ApiKey {
        key: String,
    },
    OauthToken {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },
    SessionCookie {
        cookies: String,
    },
    UsernamePassword {
        username: String,
        password: String,
    },
    BearerToken {
        token: String,
    },
    Custom {
        data: serde_json::Value,
    },
}

/// A credential managed by a surface's pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    /// Unique credential id.
    pub id: String,

    /// Surface this credential authenticates against.
    pub surface_id: String,

    /// The secret itself.
    pub material: CredentialMaterial,

    /// Expiry of the underlying secret, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Inactive credentials are never handed out.
    pub active: bool,
}

impl Credential {
    /// Create an active credential.
    pub fn new(
        id: impl Into<String>,
        surface_id: impl Into<String>,
        material: CredentialMaterial,
    ) -> Self {
        Self {
            id: id.into(),
            surface_id: surface_id.into(),
            material,
            expires_at: None,
            active: true,
        }
    }
}

/// Why a credential entered cooldown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    /// A single reported failure.
    Error,
    /// The recent-error count crossed `max_errors`.
    MaxErrorsExceeded,
}

/// Per-credential usage bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CredentialUsage {
    /// Total times handed out.
    pub total_uses: u64,

    /// Reported successes.
    pub successful_uses: u64,

    /// Reported failures.
    pub failed_uses: u64,

    /// Errors within the sliding window.
    pub recent_errors: u32,

    /// Last time the credential was handed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    /// Last reported failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,

    /// End of the current cooldown, if cooling down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Why the current cooldown started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_reason: Option<CooldownReason>,
}

impl CredentialUsage {
    /// Whether the credential is cooling down at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// How the pool picks the next credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Cursor modulo the available set.
    #[default]
    RoundRobin,
    /// Uniform random over the available set.
    Random,
    /// Minimum `total_uses`, ties broken by insertion order.
    LeastUsed,
    /// Minimum `recent_errors`, ties broken by insertion order.
    LeastErrors,
    /// Probability proportional to `1 / (1 + recent_errors)`.
    Weighted,
}

/// Health grade of a pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Critical,
}

/// Tuning knobs for a credential pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPoolConfig {
    /// Minimum active credentials for the pool to count as healthy.
    pub min_active: usize,

    /// Cooldown applied on any reported failure.
    pub error_cooldown: Duration,

    /// Recent-error count that triggers a `max_errors_exceeded` cooldown.
    pub max_errors: u32,

    /// Errors older than this are zeroed by the sweeper.
    pub error_window: Duration,

    /// Sweeper tick interval.
    pub sweep_interval: Duration,
}

impl Default for CredentialPoolConfig {
    fn default() -> Self {
        Self {
            min_active: 1,
            error_cooldown: Duration::from_secs(60),
            max_errors: 5,
            error_window: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(10),
        }
    }
}
