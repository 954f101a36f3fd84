//! One-off resilient request (`itg request`).
//!
//! Goes through the full limiter / breaker / retry stack but bypasses the
//! metadata cache, which makes it the tool for poking at endpoints the
//! gateway does not model.

use anyhow::{Context, Result};
use serde_json::Value;

use itglue_resilience_core::{ApiResponse, Method, ResponseBody};

use crate::app::App;
use crate::config::Config;

/// Parse a `key=value` pair for `--query`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn run_request(
    config: &Config,
    method: Method,
    path: &str,
    body: Option<&str>,
    query: Vec<(String, String)>,
) -> Result<()> {
    let body: Option<Value> = body
        .map(serde_json::from_str::<Value>)
        .transpose()
        .with_context(|| "--body is not valid JSON")?;

    let app = App::open(config).await?;
    let result = app
        .client()
        .request_with_query(method, path, query, body)
        .await;
    app.close().await;

    match result? {
        Some(response) => print_response(&response)?,
        None => println!("404 Not Found"),
    }
    Ok(())
}

fn print_response(response: &ApiResponse) -> Result<()> {
    println!("{} (attempts: {})", response.status, response.attempts);
    match &response.body {
        ResponseBody::Empty => {}
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        ResponseBody::Raw(bytes) => println!("{}", String::from_utf8_lossy(bytes)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            parse_key_val("page[size]=50"),
            Ok(("page[size]".to_string(), "50".to_string()))
        );
        assert_eq!(
            parse_key_val("filter[name]=a=b"),
            Ok(("filter[name]".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
