//! The session pool: long-lived browser-like execution contexts.
//!
//! Sessions are heavyweight (a warmed browser context, often authenticated)
//! so the pool keeps a bounded set warm, hands them out per job, recycles
//! them as they age, and forecasts upcoming authentication expiries so
//! capacity problems surface before they bite.

mod forecast;
mod pool;

pub use forecast::{ExpiryForecast, ExpiringSession};
pub use pool::{CheckinDisposition, CheckoutOptions, SessionCheckout, SessionCounts, SessionPool};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Browser engine backing a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

/// Viewport dimensions of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Configuration a session is created with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Engine to launch.
    pub engine: BrowserEngine,

    /// Viewport dimensions.
    pub viewport: Viewport,

    /// Proxy URL for location-pinned sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Pages the session may serve before recycling.
    pub max_pages: u32,

    /// Per-page navigation timeout.
    pub page_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            viewport: Viewport::default(),
            proxy_url: None,
            max_pages: 20,
            page_timeout_secs: 30,
        }
    }
}

/// Lifecycle status of a session.
///
/// Permitted transitions: `warming→idle`, `warming→error`, `idle→active`,
/// `active→idle`, `idle→cooling`, `cooling→destroyed`, any→`error`,
/// `error→destroyed`. There is no way back from a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Warming,
    Idle,
    Active,
    Cooling,
    Error,
    Destroyed,
}

impl SessionStatus {
    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if next == SessionStatus::Error {
            return !matches!(self, SessionStatus::Destroyed);
        }
        match self {
            SessionStatus::Warming => matches!(next, SessionStatus::Idle),
            SessionStatus::Idle => {
                matches!(next, SessionStatus::Active | SessionStatus::Cooling)
            }
            SessionStatus::Active => {
                matches!(next, SessionStatus::Idle | SessionStatus::Cooling)
            }
            SessionStatus::Cooling => matches!(next, SessionStatus::Destroyed),
            SessionStatus::Error => matches!(next, SessionStatus::Destroyed),
            SessionStatus::Destroyed => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Warming => "warming",
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Cooling => "cooling",
            SessionStatus::Error => "error",
            SessionStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// A pooled session and its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Unique session id.
    pub id: String,

    /// Current lifecycle status.
    pub status: SessionStatus,

    /// Configuration the session was created with.
    pub config: SessionConfig,

    /// Pages served so far; never decreases.
    pub page_count: u32,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last checkout, check-in, or keep-alive.
    pub last_activity_at: DateTime<Utc>,

    /// When the session last authenticated, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<DateTime<Utc>>,

    /// When the session's auth cookies expire, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_expires_at: Option<DateTime<Utc>>,

    /// Platform the session is authenticated against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Study currently holding the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<String>,

    /// Study this session is reserved to, for per-study isolation.
    /// Unlike `study_id`, the reservation survives check-in and dies only
    /// with the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_study: Option<String>,

    /// Tenant currently holding the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl Session {
    /// Whether the session is still usable (not error/destroyed).
    pub fn is_live(&self) -> bool {
        !matches!(self.status, SessionStatus::Error | SessionStatus::Destroyed)
    }
}

/// Pool sizing and timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPoolConfig {
    /// Idle + warming floor the warmup tick maintains.
    pub min_idle: usize,

    /// Hard cap on pool size.
    pub max_sessions: usize,

    /// Idle sessions older than this are cooled and destroyed.
    pub idle_timeout: Duration,

    /// Sessions older than this are recycled on next check-in.
    pub max_lifetime: Duration,

    /// Keep-alive tick interval.
    pub keep_alive_interval: Duration,

    /// Checkout expiry; overdue checkouts are force-checked-in.
    pub checkout_timeout: Duration,

    /// Warmup tick interval.
    pub warmup_interval: Duration,

    /// Health-check tick interval.
    pub health_check_interval: Duration,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 2,
            max_sessions: 10,
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
            keep_alive_interval: Duration::from_secs(30),
            checkout_timeout: Duration::from_secs(120),
            warmup_interval: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(15),
        }
    }
}

/// Hooks the pool invokes around session lifecycle transitions.
///
/// The pool never talks to a browser itself; deployments register hooks
/// that do (launch a context, jiggle the mouse, refresh cookies, close the
/// context). The default implementations are no-ops so tests and
/// session-less deployments need no hook object.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Bring a new session from warming to usable.
    async fn warm_up(&self, session: &Session) -> std::result::Result<(), String> {
        let _ = session;
        Ok(())
    }

    /// Keep an idle session's auth state warm.
    async fn keep_alive(&self, session: &Session) -> std::result::Result<(), String> {
        let _ = session;
        Ok(())
    }

    /// Tear down a session's backing context.
    async fn destroy(&self, session: &Session) {
        let _ = session;
    }
}

/// No-op hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSessionHooks;

#[async_trait]
impl SessionHooks for NoopSessionHooks {}
