//! In-memory counter store.
//!
//! Mirrors the observable semantics of the Redis backend behind a mutex:
//! fixed-window count with expiry and block extension on the first
//! over-limit consumption. Intended for tests and single-process
//! deployments where a shared store is not needed.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{outcome_from_reply, ConsumeOutcome, CounterStore, StoreError, WindowParams};

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// Counter store backed by a process-local map.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) counter entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries to keep the map from growing endlessly.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
    async fn consume(
        &self,
        key: &str,
        params: &WindowParams,
    ) -> Result<ConsumeOutcome, StoreError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                // An expired entry is equivalent to an absent one.
                if entry.expires_at <= now {
                    entry.count = 0;
                    entry.expires_at = now + params.window;
                }
            })
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + params.window,
            });

        entry.count += 1;
        let allowed = entry.count <= u64::from(params.points);
        if !allowed {
            if let Some(block) = params.block {
                // First over-limit consumption extends the entry to the
                // block duration; later rejections leave it alone.
                if entry.count == u64::from(params.points) + 1 {
                    entry.expires_at = now + block;
                }
            }
        }
        let ttl: Duration = entry.expires_at.saturating_duration_since(now);

        Ok(outcome_from_reply(entry.count, allowed, ttl, params))
    }
}
