//! Limiter instances and the per-preset instance cache.

use std::sync::Arc;

use dashmap::DashMap;

use crate::preset::Preset;
use crate::store::{ConsumeOutcome, CounterStore, StoreError, WindowParams};

/// One limiter per preset, bound to the store, the preset's numeric
/// parameters, and a key namespace derived from the preset name.
///
/// Instances are shared by all concurrent requests mapping to the same
/// preset; the namespace prevents key collisions across presets.
#[derive(Clone)]
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    params: WindowParams,
    namespace: String,
}

impl Limiter {
    pub fn new(store: Arc<dyn CounterStore>, preset: &Preset, key_prefix: &str) -> Self {
        Self {
            store,
            params: WindowParams {
                points: preset.points,
                window: preset.window,
                block: preset.block,
            },
            namespace: format!("{}:{}:", key_prefix, preset.name),
        }
    }

    /// Atomically consumes one point for the derived key.
    pub async fn consume(&self, key: &str) -> Result<ConsumeOutcome, StoreError> {
        let namespaced = format!("{}{}", self.namespace, key);
        self.store.consume(&namespaced, &self.params).await
    }

    /// The namespace prefix applied to every key of this limiter.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Cache of limiter instances, one per preset name.
///
/// Lazily creates an instance on first use and memoizes it for process
/// lifetime. The memoization is a correctness requirement, not just a
/// setup-cost optimization: all requests for the same preset must observe
/// the same namespace and configuration. The dashmap entry API makes the
/// create-and-insert atomic, so racing first requests agree on one
/// instance.
#[derive(Default)]
pub struct LimiterCache {
    instances: DashMap<String, Arc<Limiter>>,
}

impl LimiterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limiter for `preset`, creating and caching it on first
    /// use.
    pub fn get_or_create(
        &self,
        preset: &Preset,
        store: &Arc<dyn CounterStore>,
        key_prefix: &str,
    ) -> Arc<Limiter> {
        self.instances
            .entry(preset.name.clone())
            .or_insert_with(|| Arc::new(Limiter::new(store.clone(), preset, key_prefix)))
            .value()
            .clone()
    }

    /// Number of instantiated limiters.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
