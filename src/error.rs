//! Admission-control error types and their HTTP responses.

use axum::http::header::HeaderValue;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors produced by the admission-control subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// A middleware was registered with a preset name that is not in the
    /// registry. Surfaced at route-registration time, never per request.
    #[error("unknown rate limit preset: {0}")]
    UnknownPreset(String),

    /// The request exceeded its rate limit. Expected and user-facing,
    /// not a fault.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until a retry is sensible, always >= 1.
        retry_after_secs: u64,
    },

    /// The counter store itself failed. Fails closed unless shadow mode
    /// is active.
    #[error("rate limiting store unavailable")]
    StoreUnavailable,
}

/// JSON body returned with a 429.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: &'static str,
    pub message: &'static str,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

/// JSON body returned with a 503.
#[derive(Debug, Serialize)]
pub struct DegradedBody {
    pub error: &'static str,
    pub message: &'static str,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            Self::RateLimited { retry_after_secs } => {
                let body = RejectionBody {
                    error: "Too Many Requests",
                    message: "Rate limit exceeded. Please try again later.",
                    retry_after: retry_after_secs,
                };
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert("Retry-After", v);
                }
                response
            }
            Self::StoreUnavailable => {
                let body = DegradedBody {
                    error: "Service Temporarily Unavailable",
                    message:
                        "Rate limiting service is temporarily unavailable. Please try again later.",
                };
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            // Programmer error; anything that reaches a response path still
            // fails closed.
            Self::UnknownPreset(name) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal Server Error",
                    "message": format!("unknown rate limit preset: {name}"),
                })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdmissionError::UnknownPreset("login".to_string());
        assert_eq!(err.to_string(), "unknown rate limit preset: login");

        let err = AdmissionError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "rate limit exceeded, retry in 30s");
    }

    #[test]
    fn test_rate_limited_response() {
        let response = AdmissionError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "42");
    }

    #[test]
    fn test_store_unavailable_response() {
        let response = AdmissionError::StoreUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("Retry-After").is_none());
    }
}
