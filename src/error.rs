//! Error taxonomy for the analysis client.
//!
//! Transient backend problems (connection errors, non-2xx statuses,
//! per-attempt timeouts) are retryable and eventually converted into a
//! heuristic fallback result. Caller errors (`InvalidInput`, `RateLimited`)
//! surface immediately and are never retried.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the analysis and stats clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input rejected before any network I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Client-side quota exceeded; no network attempt was made.
    #[error("rate limited: {remaining} requests remaining, retry in {retry_after:?}")]
    RateLimited {
        remaining: u32,
        retry_after: Duration,
    },

    /// Per-attempt deadline expired; the in-flight call was cancelled.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure or malformed response body.
    #[error("network failure: {0}")]
    Network(String),

    /// Backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl ApiError {
    /// Whether the retry loop should attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::Network(_) | ApiError::Http { .. }
        )
    }
}

/// Construction-time configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(ApiError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(ApiError::Network("connection refused".into()).is_retryable());
        assert!(ApiError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());

        assert!(!ApiError::InvalidInput("empty".into()).is_retryable());
        assert!(!ApiError::RateLimited {
            remaining: 0,
            retry_after: Duration::from_secs(60)
        }
        .is_retryable());
    }
}
