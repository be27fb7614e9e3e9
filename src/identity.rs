//! Client identity extraction for admission control.
//!
//! Every rate-limit decision is keyed by an identity derived from the
//! request: the authenticated user when one is present, otherwise the
//! client network address, otherwise a fixed sentinel.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// IPv6 prefix segments used for rate-limit identity (/64).
const IPV6_PREFIX_SEGMENTS: usize = 4;

/// Sentinel identity used when neither a user nor an address is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Authenticated user injected into request extensions by the host
/// application's authentication layer.
///
/// Only the identifier is needed here; the admission middleware never
/// inspects anything else about the user.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Opaque user identifier.
    pub id: String,
}

/// Identity attributes of a single request, resolved once per request and
/// handed to the preset's key-derivation function.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    /// Authenticated user identifier, if the request carries one.
    pub user_id: Option<String>,
    /// Normalized client address, if one could be determined.
    pub client_addr: Option<String>,
    /// User-Agent header value, carried for structured logging.
    pub user_agent: Option<String>,
}

impl RequestIdentity {
    /// Resolves the identity of a request from its extensions and headers.
    ///
    /// `trust_proxy` controls whether `X-Forwarded-For` / `X-Real-IP` are
    /// honored ahead of the socket address.
    pub fn resolve(
        headers: &HeaderMap,
        extensions: &axum::http::Extensions,
        trust_proxy: bool,
    ) -> Self {
        let user_id = extensions
            .get::<AuthenticatedUser>()
            .map(|user| user.id.clone());
        let connect_info = extensions.get::<ConnectInfo<SocketAddr>>();
        let client_addr =
            extract_client_ip(headers, connect_info, trust_proxy).map(normalize_ip);
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        Self {
            user_id,
            client_addr,
            user_agent,
        }
    }
}

/// Default key derivation: `user:<id>`, else the client address, else
/// [`UNKNOWN_IDENTITY`]. Total: never fails, never returns an empty string.
pub fn identity_key(identity: &RequestIdentity) -> String {
    if let Some(user_id) = &identity.user_id {
        format!("user:{user_id}")
    } else if let Some(addr) = &identity.client_addr {
        addr.clone()
    } else {
        UNKNOWN_IDENTITY.to_string()
    }
}

/// Extract the client IP from request headers or connection info.
///
/// When `trust_proxy` is true, checks `X-Forwarded-For` and `X-Real-IP`
/// headers first. Falls back to the direct connection address. Returns
/// `None` when no address is available at all (e.g. in-process test
/// requests without connect info).
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(forwarded) = headers.get("X-Forwarded-For") {
            if let Ok(s) = forwarded.to_str() {
                if let Some(first_ip) = s.split(',').next() {
                    if let Ok(ip) = first_ip.trim().parse() {
                        return Some(ip);
                    }
                }
            }
        }
        if let Some(real_ip) = headers.get("X-Real-IP") {
            if let Ok(s) = real_ip.to_str() {
                if let Ok(ip) = s.trim().parse() {
                    return Some(ip);
                }
            }
        }
    }
    connect_info.map(|c| c.0.ip())
}

/// Normalize an IP address for rate-limit identity.
///
/// IPv4 addresses are kept as-is. IPv6 addresses are normalized to their
/// /64 prefix to prevent circumvention by rotating through addresses
/// within the same allocation.
pub fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            let prefix: Vec<String> = (0..IPV6_PREFIX_SEGMENTS)
                .map(|i| format!("{:x}", seg[i]))
                .collect();
            format!("{}::/64", prefix.join(":"))
        }
    }
}
