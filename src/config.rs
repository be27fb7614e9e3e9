//! Admission-control configuration and the shadow-mode toggle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable controlling shadow mode.
pub const SHADOW_MODE_VAR: &str = "RATE_LIMITER_SHADOW_MODE";

/// Configuration for the admission-control middleware.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Whether admission control is enabled at all. When false the
    /// middleware forwards every request without touching the store.
    pub enabled: bool,
    /// Prefix for counter keys (e.g. "rate_limit").
    pub key_prefix: String,
    /// Whether to trust X-Forwarded-For / X-Real-IP headers.
    pub trust_proxy: bool,
    /// Normalized client addresses that bypass admission control.
    pub allowlist: HashSet<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "rate_limit".to_string(),
            trust_proxy: false,
            allowlist: HashSet::new(),
        }
    }
}

impl AdmissionConfig {
    /// Creates configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ADMISSION_ENABLED`: enable/disable admission control (default: true)
    /// - `ADMISSION_KEY_PREFIX`: counter key prefix (default: "rate_limit")
    /// - `ADMISSION_TRUST_PROXY`: trust X-Forwarded-For headers (default: false)
    /// - `ADMISSION_ALLOWLIST`: comma-separated address allowlist
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ADMISSION_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ADMISSION_KEY_PREFIX") {
            config.key_prefix = val;
        }
        if let Ok(val) = std::env::var("ADMISSION_TRUST_PROXY") {
            config.trust_proxy = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("ADMISSION_ALLOWLIST") {
            config.allowlist = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }
}

/// Process-wide shadow-mode toggle, re-evaluated on every call.
///
/// Shadow mode converts would-be rejections and store failures into
/// logged-but-allowed outcomes. The toggle is read per request, not cached
/// at process start, so operators can flip it without a restart.
pub trait ShadowMode: Send + Sync {
    /// Returns true when shadow mode is active.
    fn is_shadow(&self) -> bool;
}

/// Shadow mode driven by an environment variable.
///
/// Reads the variable on every call; truthy values are `1`, `true`, `yes`,
/// and `on` (case-insensitive).
#[derive(Debug, Clone)]
pub struct EnvShadowMode {
    var: String,
}

impl EnvShadowMode {
    /// Reads [`SHADOW_MODE_VAR`].
    pub fn new() -> Self {
        Self {
            var: SHADOW_MODE_VAR.to_string(),
        }
    }

    /// Reads a custom environment variable.
    pub fn with_var(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl Default for EnvShadowMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowMode for EnvShadowMode {
    fn is_shadow(&self) -> bool {
        std::env::var(&self.var)
            .map(|val| is_truthy(&val))
            .unwrap_or(false)
    }
}

/// Programmatic shadow-mode toggle backed by an atomic flag.
///
/// Used in tests and by hosts that manage the toggle themselves.
#[derive(Debug, Default)]
pub struct StaticShadowMode {
    shadow: AtomicBool,
}

impl StaticShadowMode {
    pub fn new(shadow: bool) -> Self {
        Self {
            shadow: AtomicBool::new(shadow),
        }
    }

    /// Flips the toggle; takes effect on the next request.
    pub fn set(&self, shadow: bool) {
        self.shadow.store(shadow, Ordering::Relaxed);
    }
}

impl ShadowMode for StaticShadowMode {
    fn is_shadow(&self) -> bool {
        self.shadow.load(Ordering::Relaxed)
    }
}

fn is_truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
