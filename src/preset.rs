//! Rate-limit presets and the preset registry.
//!
//! A preset is an immutable, named rate-limit configuration: how many
//! points a window holds, how long the window lasts, the optional penalty
//! period once it is exhausted, and how a request maps to a counter key.
//! Presets are defined once at process start and never mutated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AdmissionError;
use crate::identity::{identity_key, RequestIdentity};

/// Key-derivation function: maps a request identity to a counter key.
/// Must be total — never panics, never returns an empty string.
pub type KeyFn = fn(&RequestIdentity) -> String;

/// Names of the built-in presets.
pub mod names {
    /// Low-traffic strict preset for sensitive operations (e.g. login).
    pub const STRICT: &str = "strict";
    /// General public traffic.
    pub const DEFAULT: &str = "default";
    /// Elevated per-user limits for authenticated traffic.
    pub const AUTHENTICATED: &str = "authenticated";
    /// Unauthenticated fallback with a wide window.
    pub const ANONYMOUS: &str = "anonymous";
}

/// Immutable rate-limit configuration.
#[derive(Debug, Clone)]
pub struct Preset {
    /// Preset name, also the namespace component of every counter key.
    pub name: String,
    /// Maximum admissions per window.
    pub points: u32,
    /// Window length.
    pub window: Duration,
    /// Penalty period applied once points are exhausted. May outlast the
    /// counting window.
    pub block: Option<Duration>,
    /// Maps a request identity to a counter key.
    pub key_fn: KeyFn,
}

impl Preset {
    /// Creates a preset with the default key derivation
    /// (`user:<id>` > client address > `unknown`).
    ///
    /// Invariants: `points >= 1`, `window_secs >= 1`.
    pub fn new(name: &str, points: u32, window_secs: u64, block_secs: Option<u64>) -> Self {
        debug_assert!(points >= 1, "preset points must be at least 1");
        debug_assert!(window_secs >= 1, "preset window must be at least 1s");
        Self {
            name: name.to_string(),
            points,
            window: Duration::from_secs(window_secs),
            block: block_secs.map(Duration::from_secs),
            key_fn: identity_key,
        }
    }

    /// Replaces the key-derivation function.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }
}

/// Registry mapping preset names to their configuration.
///
/// Constructor-injected rather than process-global so tests can build
/// isolated registries. Immutable once handed to the middleware, which
/// makes it thread-safe by construction.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: HashMap<String, Arc<Preset>>,
}

impl PresetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            presets: HashMap::new(),
        }
    }

    /// Creates a registry populated with the built-in presets.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Preset::new(names::STRICT, 5, 60, Some(900)));
        registry.register(Preset::new(names::DEFAULT, 100, 60, Some(60)));
        registry.register(Preset::new(names::AUTHENTICATED, 50, 60, Some(300)));
        registry.register(Preset::new(names::ANONYMOUS, 200, 60, Some(60)));
        registry
    }

    /// Registers a preset, replacing any existing preset with the same name.
    pub fn register(&mut self, preset: Preset) {
        self.presets
            .insert(preset.name.clone(), Arc::new(preset));
    }

    /// Resolves a preset by name.
    ///
    /// An unknown name is a programming error: callers pass compile-time
    /// known names and the middleware resolves them at registration time,
    /// never per request.
    pub fn resolve(&self, name: &str) -> Result<&Arc<Preset>, AdmissionError> {
        self.presets
            .get(name)
            .ok_or_else(|| AdmissionError::UnknownPreset(name.to_string()))
    }

    /// Lists the registered preset names.
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
