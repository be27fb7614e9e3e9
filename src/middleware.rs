//! Admission middleware for axum.
//!
//! The request-interception point of the subsystem: derives a key, calls
//! the limiter instance, interprets the outcome, sets rate-limit headers,
//! and decides allow/reject/degrade. One store round trip per request,
//! attempted exactly once, awaited before any header is written.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::header::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, warn};

use crate::config::{AdmissionConfig, EnvShadowMode, ShadowMode};
use crate::error::AdmissionError;
use crate::identity::RequestIdentity;
use crate::limiter::LimiterCache;
use crate::preset::{Preset, PresetRegistry};
use crate::store::{ConsumeOutcome, CounterStore};

/// Response headers set by the admission middleware.
pub mod headers {
    pub const LIMIT: &str = "RateLimit-Limit";
    pub const REMAINING: &str = "RateLimit-Remaining";
    pub const RESET: &str = "RateLimit-Reset";
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Admission-control middleware factory.
///
/// Holds the preset registry, the per-preset limiter cache, the counter
/// store, and the shadow-mode provider. Cloning is cheap; all clones share
/// the same cache and store.
#[derive(Clone)]
pub struct AdmissionControl {
    presets: Arc<PresetRegistry>,
    limiters: Arc<LimiterCache>,
    store: Arc<dyn CounterStore>,
    shadow: Arc<dyn ShadowMode>,
    config: Arc<AdmissionConfig>,
}

impl AdmissionControl {
    /// Creates an admission controller with the built-in presets and the
    /// environment-driven shadow-mode toggle.
    pub fn new(store: Arc<dyn CounterStore>, config: AdmissionConfig) -> Self {
        Self {
            presets: Arc::new(PresetRegistry::builtin()),
            limiters: Arc::new(LimiterCache::new()),
            store,
            shadow: Arc::new(EnvShadowMode::new()),
            config: Arc::new(config),
        }
    }

    /// Replaces the preset registry.
    pub fn with_registry(mut self, registry: PresetRegistry) -> Self {
        self.presets = Arc::new(registry);
        self
    }

    /// Replaces the shadow-mode provider.
    pub fn with_shadow_mode(mut self, shadow: Arc<dyn ShadowMode>) -> Self {
        self.shadow = shadow;
        self
    }

    /// Builds a middleware function enforcing the named preset, for use
    /// with `axum::middleware::from_fn`.
    ///
    /// The preset is resolved eagerly so an unknown name fails at route
    /// registration, not per request.
    ///
    /// # Usage
    ///
    /// ```ignore
    /// Router::new()
    ///     .route("/login", post(login_handler))
    ///     .layer(axum::middleware::from_fn(control.admit("strict")?))
    /// ```
    pub fn admit(
        &self,
        preset_name: &str,
    ) -> Result<
        impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>>
            + Clone
            + Send
            + 'static,
        AdmissionError,
    > {
        let preset = self.presets.resolve(preset_name)?.clone();
        let control = self.clone();
        Ok(
            move |request: Request, next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let control = control.clone();
                let preset = preset.clone();
                Box::pin(async move { control.handle(preset, request, next).await })
            },
        )
    }

    /// Handles a single intercepted request against a resolved preset.
    async fn handle(&self, preset: Arc<Preset>, mut request: Request, next: Next) -> Response {
        if !self.config.enabled {
            return next.run(request).await;
        }

        let identity = RequestIdentity::resolve(
            request.headers(),
            request.extensions(),
            self.config.trust_proxy,
        );

        if let Some(addr) = &identity.client_addr {
            if self.config.allowlist.contains(addr) {
                debug!(addr = %addr, "Client in allowlist, bypassing admission control");
                return next.run(request).await;
            }
        }

        let key = (preset.key_fn)(&identity);
        let limiter =
            self.limiters
                .get_or_create(&preset, &self.store, &self.config.key_prefix);

        // Store identity for downstream handlers.
        request.extensions_mut().insert(identity.clone());

        // The single atomic round trip; attempted exactly once.
        match limiter.consume(&key).await {
            Ok(ConsumeOutcome::Allowed {
                limit,
                remaining,
                reset_after,
            }) => {
                let mut response = next.run(request).await;
                apply_rate_limit_headers(&mut response, limit, remaining, reset_after);
                response
            }
            Ok(ConsumeOutcome::Rejected {
                limit,
                retry_after,
                reset_after,
            }) => {
                let retry_after_secs = retry_after_secs(retry_after);
                if self.shadow.is_shadow() {
                    warn!(
                        key = %key,
                        preset = %preset.name,
                        client_addr = identity.client_addr.as_deref().unwrap_or("-"),
                        user_agent = identity.user_agent.as_deref().unwrap_or("-"),
                        retry_after = retry_after_secs,
                        "Rate limit exceeded, forwarding (shadow mode)"
                    );
                    let mut response = next.run(request).await;
                    apply_rate_limit_headers(&mut response, limit, 0, reset_after);
                    response
                } else {
                    debug!(
                        key = %key,
                        preset = %preset.name,
                        retry_after = retry_after_secs,
                        "Rate limit exceeded"
                    );
                    let mut response =
                        AdmissionError::RateLimited { retry_after_secs }.into_response();
                    apply_rate_limit_headers(&mut response, limit, 0, reset_after);
                    response
                }
            }
            Err(store_err) => {
                error!(
                    preset = %preset.name,
                    client_addr = identity.client_addr.as_deref().unwrap_or("-"),
                    user_agent = identity.user_agent.as_deref().unwrap_or("-"),
                    error = %store_err,
                    "Counter store unavailable"
                );
                if self.shadow.is_shadow() {
                    warn!(
                        preset = %preset.name,
                        "Forwarding despite store failure (shadow mode)"
                    );
                    next.run(request).await
                } else {
                    // Fail closed: a down store must not silently disable
                    // rate limiting.
                    AdmissionError::StoreUnavailable.into_response()
                }
            }
        }
    }
}

/// Seconds until a retry is sensible: `max(1, round(ms / 1000))`.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let ms = retry_after.as_millis() as u64;
    ((ms + 500) / 1000).max(1)
}

/// Sets `RateLimit-Limit`, `RateLimit-Remaining`, and `RateLimit-Reset`
/// on a response. `Retry-After` is handled by the 429 response itself.
fn apply_rate_limit_headers(
    response: &mut Response,
    limit: u32,
    remaining: u32,
    reset_after: Duration,
) {
    let headers_mut = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers_mut.insert(headers::LIMIT, v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers_mut.insert(headers::REMAINING, v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_timestamp(reset_after)) {
        headers_mut.insert(headers::RESET, v);
    }
}

/// ISO-8601 timestamp of window/block expiry, from the store-reported TTL.
fn reset_timestamp(reset_after: Duration) -> String {
    let reset_at = Utc::now() + chrono::Duration::milliseconds(reset_after.as_millis() as i64);
    reset_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounding() {
        assert_eq!(retry_after_secs(Duration::from_millis(0)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(400)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(501)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1400)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(900)), 900);
    }

    #[test]
    fn test_reset_timestamp_is_rfc3339() {
        let ts = reset_timestamp(Duration::from_secs(60));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_apply_headers() {
        let mut response = Response::new(axum::body::Body::empty());
        apply_rate_limit_headers(&mut response, 5, 4, Duration::from_secs(60));

        assert_eq!(response.headers().get(headers::LIMIT).unwrap(), "5");
        assert_eq!(response.headers().get(headers::REMAINING).unwrap(), "4");
        assert!(response.headers().get(headers::RESET).is_some());
        assert!(response.headers().get(headers::RETRY_AFTER).is_none());
    }
}
