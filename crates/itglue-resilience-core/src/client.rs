//! Resilient request orchestration.
//!
//! [`ResilientClient::request`] performs one logical API operation with the
//! full policy applied:
//!
//! 1. Circuit open → [`ApiError::CircuitOpen`], with no network I/O and no
//!    rate-limiter interaction.
//! 2. [`RateLimiter::wait_if_needed`] (may sleep).
//! 3. One [`Transport::send`] with a bounded timeout.
//! 4. Classify the outcome:
//!
//! | Outcome | Breaker | Result |
//! |---------|---------|--------|
//! | 2xx | success | `Ok(Some(response))` |
//! | 404 | none | `Ok(None)` |
//! | 401 | failure | [`ApiError::Auth`], not retried |
//! | 403 | none | [`ApiError::Forbidden`], not retried |
//! | 429 | none | sleep `Retry-After` (default 60s), retry, then [`ApiError::RateLimited`] |
//! | 5xx | failure | sleep `backoff_base^attempt`, retry, then [`ApiError::Server`] |
//! | network error | failure | as 5xx, then [`ApiError::Transport`] |
//! | other 4xx | none | [`ApiError::Client`], not retried |
//!
//! Retries never leak to the caller: the result is either a final success or
//! one terminal typed error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;
use crate::clock::{elapsed_between, Clock};
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::transport::{HttpRequest, Method, RawResponse, Transport, TransportError};

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first. Values below 1 act as 1.
    pub max_retries: u32,
    /// Backoff after failed attempt `n` (0-based) is `backoff_base^n` seconds.
    pub backoff_base: f64,
    /// Sleep applied to a 429 without a usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            default_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.backoff_base.powi(attempt as i32);
        if secs.is_nan() || secs < 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Response body, decoded as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Raw(Vec<u8>),
}

impl ResponseBody {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return ResponseBody::Empty;
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Raw(bytes),
        }
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
    /// How many attempts this call took.
    pub attempts: u32,
}

impl ApiResponse {
    pub fn json_value(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Decode the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        match &self.body {
            ResponseBody::Json(v) => serde_json::from_value(v.clone()).map_err(ApiError::Decode),
            ResponseBody::Raw(bytes) => serde_json::from_slice(bytes).map_err(ApiError::Decode),
            ResponseBody::Empty => serde_json::from_slice(b"null").map_err(ApiError::Decode),
        }
    }

    /// The JSON:API `data` member, or the whole JSON body when absent.
    pub fn resource(&self) -> Option<Value> {
        let value = self.json_value()?;
        Some(value.get("data").cloned().unwrap_or_else(|| value.clone()))
    }
}

enum Step {
    Done(Result<Option<ApiResponse>, ApiError>),
    Retry { error: ApiError, delay: Duration },
}

pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            limiter,
            breaker,
            clock,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-attempt timeout handed to the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn get(&self, path: &str) -> Result<Option<ApiResponse>, ApiError> {
        self.request(Method::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Option<ApiResponse>, ApiError> {
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Option<ApiResponse>, ApiError> {
        self.request(Method::Patch, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Option<ApiResponse>, ApiError> {
        self.request(Method::Delete, path, None).await
    }

    /// Perform one logical request. `Ok(None)` means 404.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<ApiResponse>, ApiError> {
        self.request_with_query(method, path, Vec::new(), body).await
    }

    pub async fn request_with_query(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<Option<ApiResponse>, ApiError> {
        if self.breaker.is_open() {
            debug!(%method, path, "circuit open; failing fast");
            return Err(ApiError::CircuitOpen {
                retry_in: self.breaker.remaining_cooldown(),
            });
        }

        let request = HttpRequest {
            method,
            path: path.to_string(),
            query,
            body,
            timeout: self.timeout,
        };
        let max_attempts = self.retry.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.wait_if_needed().await?;

            debug!(%method, path, attempt, "sending request");
            let outcome = self.transport.send(&request).await;

            let (error, delay) = match self.classify(outcome, attempt) {
                Step::Done(result) => return result,
                Step::Retry { error, delay } => (error, delay),
            };

            if attempt >= max_attempts {
                warn!(%method, path, attempts = attempt, error = %error, "retries exhausted");
                return Err(error);
            }
            if self.breaker.is_open() {
                warn!(%method, path, attempts = attempt, error = %error, "circuit opened mid-retry; giving up");
                return Err(error);
            }

            warn!(
                %method,
                path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after backoff"
            );
            self.clock.sleep(delay).await;
        }
    }

    fn classify(&self, outcome: Result<RawResponse, TransportError>, attempt: u32) -> Step {
        let raw = match outcome {
            Ok(raw) => raw,
            Err(source) => {
                self.breaker.record_failure();
                return Step::Retry {
                    error: ApiError::Transport {
                        attempts: attempt,
                        source,
                    },
                    delay: self.retry.backoff(attempt - 1),
                };
            }
        };

        match raw.status {
            200..=299 => {
                self.breaker.record_success();
                Step::Done(Ok(Some(ApiResponse {
                    status: raw.status,
                    body: ResponseBody::from_bytes(raw.body),
                    attempts: attempt,
                })))
            }
            // Not a liveness signal either way.
            404 => Step::Done(Ok(None)),
            401 => {
                self.breaker.record_failure();
                Step::Done(Err(ApiError::Auth {
                    message: error_message(&raw.body),
                }))
            }
            403 => Step::Done(Err(ApiError::Forbidden {
                message: error_message(&raw.body),
            })),
            429 => {
                let delay = raw
                    .retry_after
                    .as_deref()
                    .and_then(|v| parse_retry_after(v, self.clock.now()))
                    .unwrap_or(self.retry.default_retry_after);
                Step::Retry {
                    error: ApiError::RateLimited {
                        attempts: attempt,
                        retry_after: Some(delay),
                    },
                    delay,
                }
            }
            500..=599 => {
                self.breaker.record_failure();
                Step::Retry {
                    error: ApiError::Server {
                        status: raw.status,
                        attempts: attempt,
                        message: error_message(&raw.body),
                    },
                    delay: self.retry.backoff(attempt - 1),
                }
            }
            status => Step::Done(Err(ApiError::Client {
                status,
                message: error_message(&raw.body),
            })),
        }
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| elapsed_between(now, at.with_timezone(&Utc)))
}

/// Best-effort human message from an error body.
///
/// Prefers the JSON:API `errors[0].detail` / `errors[0].title`, then a
/// top-level `message`, then the raw text (truncated).
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let first = value.get("errors").and_then(|e| e.get(0));
        let candidates = [
            first.and_then(|e| e.get("detail")),
            first.and_then(|e| e.get("title")),
            value.get("message"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(Value::as_str) {
            return msg.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() > 200 {
        format!("{}…", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn huge_backoff_saturates() {
        let policy = RetryPolicy {
            backoff_base: 1e10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(2), Duration::MAX);
        assert_eq!(policy.backoff(200), Duration::MAX);
    }

    #[test]
    fn retry_after_seconds_and_dates() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 7 ", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn error_message_prefers_jsonapi_detail() {
        let body = json!({"errors": [{"title": "Unauthorized", "detail": "Invalid API key"}]});
        assert_eq!(error_message(body.to_string().as_bytes()), "Invalid API key");

        let body = json!({"errors": [{"title": "Forbidden"}]});
        assert_eq!(error_message(body.to_string().as_bytes()), "Forbidden");

        assert_eq!(error_message(b"  upstream exploded \n"), "upstream exploded");
    }

    #[test]
    fn body_decoding() {
        assert_eq!(ResponseBody::from_bytes(Vec::new()), ResponseBody::Empty);
        assert_eq!(
            ResponseBody::from_bytes(b"{\"a\":1}".to_vec()),
            ResponseBody::Json(json!({"a": 1}))
        );
        assert_eq!(
            ResponseBody::from_bytes(b"<html>".to_vec()),
            ResponseBody::Raw(b"<html>".to_vec())
        );
    }

    #[test]
    fn resource_unwraps_data_member() {
        let resp = ApiResponse {
            status: 200,
            body: ResponseBody::Json(json!({"data": {"id": "1", "type": "organizations"}})),
            attempts: 1,
        };
        assert_eq!(
            resp.resource(),
            Some(json!({"id": "1", "type": "organizations"}))
        );

        #[derive(serde::Deserialize)]
        struct Envelope {
            data: Value,
        }
        let env: Envelope = resp.json().unwrap();
        assert_eq!(env.data["id"], "1");
    }
}
