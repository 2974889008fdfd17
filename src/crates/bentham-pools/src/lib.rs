//! # Bentham Pools
//!
//! The two shared mutable stores of the execution core:
//!
//! - **Credential pools** ([`credential`]) - per-surface credentials with
//!   rotation strategies, failure cooldown, windowed error decay, and a
//!   computed health grade
//! - **Session pool** ([`session`]) - a bounded set of long-lived
//!   browser-like contexts with a strict lifecycle, warmup, keep-alive,
//!   checkout expiry enforcement, and authentication-expiry forecasting
//!
//! Both are accessed only through their APIs; mutation is confined behind
//! per-pool locks with small critical sections, and background ticks stop
//! on shutdown.

pub mod credential;
pub mod error;
pub mod session;

pub use credential::{
    CooldownReason, Credential, CredentialMaterial, CredentialPool, CredentialPoolConfig,
    CredentialPoolManager, CredentialUsage, PoolHealth, RotationStrategy,
};
pub use error::{PoolError, Result};
pub use session::{
    BrowserEngine, CheckinDisposition, CheckoutOptions, ExpiringSession, ExpiryForecast,
    NoopSessionHooks, Session, SessionCheckout, SessionConfig, SessionCounts, SessionHooks,
    SessionPool, SessionPoolConfig, SessionStatus, Viewport,
};
