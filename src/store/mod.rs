//! Counter store abstraction.
//!
//! The store provides the single correctness-critical primitive of the
//! whole subsystem: atomically consume one point for a key, with TTL and
//! cap, in one round trip. A naive read-increment-write from the caller
//! would under-count violations when concurrent requests race on the same
//! key, so every backend must implement the consume as one atomic unit.
//!
//! Rejections and infrastructure failures are distinguished by type:
//! a rejected consumption is an `Ok(ConsumeOutcome::Rejected { .. })`,
//! a failing store is an `Err(StoreError)`. No structural inspection of
//! error shapes anywhere.

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

/// Numeric window parameters for a consume call.
#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    /// Maximum admissions per window.
    pub points: u32,
    /// Window length.
    pub window: Duration,
    /// Penalty period applied once points are exhausted.
    pub block: Option<Duration>,
}

/// Result of a single consume call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The point was consumed within the limit.
    Allowed {
        /// The preset's points, echoed for header emission.
        limit: u32,
        /// Points left in the current window.
        remaining: u32,
        /// Time until the window resets, as reported by the store.
        reset_after: Duration,
    },
    /// The consumption would exceed the limit.
    Rejected {
        /// The preset's points, echoed for header emission.
        limit: u32,
        /// Time until the current block/window clears.
        retry_after: Duration,
        /// Time until the counter entry expires.
        reset_after: Duration,
    },
}

/// Errors from the counter store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store is unreachable or the connection failed.
    #[error("counter store connection failed: {0}")]
    Connection(String),
    /// The atomic consume script failed to load or execute.
    #[error("counter store script failed: {0}")]
    Script(String),
    /// The store replied with something other than the expected shape.
    #[error("unexpected counter store reply: {0}")]
    Reply(String),
}

/// Storage backend for admission counters.
///
/// Implementations must make `consume` a single atomic round trip: the
/// increment, the TTL bookkeeping, and the cap check happen as one unit
/// on the store side.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically consume one point for `key` under `params`.
    async fn consume(
        &self,
        key: &str,
        params: &WindowParams,
    ) -> Result<ConsumeOutcome, StoreError>;
}

impl ConsumeOutcome {
    /// True when the point was consumed within the limit.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Builds a [`ConsumeOutcome`] from the raw script reply
/// `(count, allowed, ttl)`.
///
/// Shared by the Redis backend (Lua reply) and the in-memory backend so
/// both expose identical observable semantics.
pub(crate) fn outcome_from_reply(
    count: u64,
    allowed: bool,
    ttl: Duration,
    params: &WindowParams,
) -> ConsumeOutcome {
    if allowed {
        ConsumeOutcome::Allowed {
            limit: params.points,
            remaining: params.points.saturating_sub(count as u32),
            reset_after: ttl,
        }
    } else {
        ConsumeOutcome::Rejected {
            limit: params.points,
            retry_after: ttl,
            reset_after: ttl,
        }
    }
}
