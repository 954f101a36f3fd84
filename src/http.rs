//! reqwest-backed [`Transport`] for the ITGlue REST API.
//!
//! Speaks JSON:API: every request carries the `x-api-key` header and the
//! `application/vnd.api+json` media type. Status codes are passed through
//! untouched; classifying them is the resilient client's job.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use tracing::{debug, warn};

use itglue_resilience_core::{HttpRequest, Method, RawResponse, Transport, TransportError};

use crate::config::ApiConfig;

const JSON_API: &str = "application/vnd.api+json";

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("itg/", env!("CARGO_PKG_VERSION")))
            .build()?;

        if api_key.is_none() {
            warn!("no ITGlue API key configured; requests will be unauthenticated");
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(&config.base_url, config.api_key())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(to_reqwest(request.method), &url)
            .header(ACCEPT, JSON_API)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Other(e.to_string()))?;
            builder = builder.header(CONTENT_TYPE, JSON_API).body(bytes);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        Ok(RawResponse {
            status,
            retry_after,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_onto_trimmed_base() {
        let transport = HttpTransport::new("https://api.itglue.com/", None).unwrap();
        assert_eq!(transport.base_url(), "https://api.itglue.com");
        assert_eq!(
            transport.url("/organizations/1"),
            "https://api.itglue.com/organizations/1"
        );
        assert_eq!(
            transport.url("configurations"),
            "https://api.itglue.com/configurations"
        );
    }

    #[test]
    fn maps_every_method() {
        assert_eq!(to_reqwest(Method::Patch), reqwest::Method::PATCH);
        assert_eq!(to_reqwest(Method::Delete), reqwest::Method::DELETE);
    }
}
