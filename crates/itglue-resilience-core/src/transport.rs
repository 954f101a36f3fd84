//! The raw HTTP call that the resilience layer wraps.
//!
//! A [`Transport`] sends exactly one request and reports either the raw
//! response (any status code) or a network-level [`TransportError`]. It
//! never retries and never interprets status codes; that is
//! [`ResilientClient`](crate::client::ResilientClient)'s job.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// HTTP verbs used against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!(
                "unsupported HTTP method '{}'. Must be GET, POST, PUT, PATCH, or DELETE.",
                other
            )),
        }
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Endpoint path relative to the API base URL, e.g. `/organizations/42`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Upper bound for this single attempt.
    pub timeout: Duration,
}

/// A response as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if the server sent one.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Network-level failure: the request never produced an HTTP status.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

/// The abstract HTTP call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("get".parse::<Method>(), Ok(Method::Get));
        assert_eq!("Patch".parse::<Method>(), Ok(Method::Patch));
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn raw_response_helpers() {
        let resp = RawResponse::json(429, &serde_json::json!({"errors": []}))
            .with_retry_after("12");
        assert_eq!(resp.status, 429);
        assert_eq!(resp.retry_after.as_deref(), Some("12"));
        assert_eq!(resp.body, br#"{"errors":[]}"#.to_vec());
    }
}
