//! Redis-backed admission control middleware for axum.
//!
//! Fixed-window rate limiting with an optional extended block period,
//! enforced against a shared counter store so that every node of a
//! deployment observes the same counts. The consume is a single atomic
//! round trip (a server-side Lua script on Redis); correctness under
//! concurrency depends on that atomicity, not on in-process locking.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::post, Router};
//! use turnstile::{AdmissionConfig, AdmissionControl, RedisCounterStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # async fn login_handler() {}
//! let store = Arc::new(RedisCounterStore::connect("redis://localhost:6379").await?);
//! let control = AdmissionControl::new(store, AdmissionConfig::from_env());
//!
//! let app: Router = Router::new()
//!     .route("/login", post(login_handler))
//!     .layer(axum::middleware::from_fn(control.admit("strict")?));
//! # Ok(())
//! # }
//! ```
//!
//! # Shadow mode
//!
//! Setting `RATE_LIMITER_SHADOW_MODE=true` converts would-be rejections
//! and store failures into logged-but-allowed outcomes. The flag is read
//! fresh on every request, so it can be toggled for rollout or rollback
//! without a restart.

pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod preset;
pub mod store;

pub use config::{AdmissionConfig, EnvShadowMode, ShadowMode, StaticShadowMode, SHADOW_MODE_VAR};
pub use error::AdmissionError;
pub use identity::{AuthenticatedUser, RequestIdentity};
pub use limiter::{Limiter, LimiterCache};
pub use middleware::AdmissionControl;
pub use preset::{Preset, PresetRegistry};
pub use store::{
    ConsumeOutcome, CounterStore, MemoryCounterStore, RedisCounterStore, StoreError, WindowParams,
};
