//! Typed failure taxonomy for resilient API calls.
//!
//! Every externally visible failure of [`ResilientClient`](crate::client::ResilientClient)
//! is one of these variants. Retries and backoff happen before an error is
//! returned, so callers only ever see the terminal outcome. A 404 is not an
//! error: it surfaces as `Ok(None)`.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Dependency presumed down; the call was rejected without network I/O.
    #[error("circuit breaker is open{}", fmt_retry_in(.retry_in))]
    CircuitOpen { retry_in: Option<Duration> },

    /// HTTP 401. Credentials are assumed invalid, so this is never retried.
    #[error("authentication failed (401): {message}")]
    Auth { message: String },

    /// HTTP 403. A permissions problem, not a liveness failure.
    #[error("forbidden (403): {message}")]
    Forbidden { message: String },

    /// HTTP 429 after all retries, or the local limiter gave up waiting.
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx after all retries.
    #[error("server error {status} after {attempts} attempt(s): {message}")]
    Server {
        status: u16,
        attempts: u32,
        message: String,
    },

    /// Network-level failure after all retries.
    #[error("transport failure after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Any other 4xx. Not retried and does not touch the circuit breaker.
    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    /// The response body could not be decoded into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// The local cache store failed during an operation that needs it.
    #[error("cache store error: {0:#}")]
    Cache(anyhow::Error),
}

impl ApiError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::CircuitOpen { .. }
                | ApiError::RateLimited { .. }
                | ApiError::Server { .. }
                | ApiError::Transport { .. }
        )
    }

    /// Whether this outcome is recorded as a circuit breaker failure.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Auth { .. } | ApiError::Server { .. } | ApiError::Transport { .. }
        )
    }

    /// HTTP status behind this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Auth { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn fmt_retry_in(retry_in: &Option<Duration>) -> String {
    match retry_in {
        Some(d) => format!("; probing again in {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}
