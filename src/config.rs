//! TOML configuration parsing and validation.
//!
//! Every resilience knob is externally settable here; `[api]` and `[cache]`
//! are required, every other section falls back to defaults.
//!
//! ```toml
//! [api]
//! base_url = "https://api.itglue.com"
//!
//! [rate_limit]
//! max_requests = 3000
//! window_secs = 300
//! throttle_threshold = 0.8
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! cooldown_secs = 60
//! half_open_attempts = 2
//!
//! [retry]
//! max_retries = 3
//!
//! [cache]
//! path = "./data/itg.sqlite"
//! max_age_secs = 86400
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use itglue_resilience_core::{CircuitBreakerConfig, RateLimitConfig, RetryPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "ITGLUE_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    /// The API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_throttle_threshold")]
    pub throttle_threshold: f64,
    #[serde(default = "default_max_throttle_delay_secs")]
    pub max_throttle_delay_secs: f64,
    #[serde(default = "default_max_wait_rounds")]
    pub max_wait_rounds: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            throttle_threshold: default_throttle_threshold(),
            max_throttle_delay_secs: default_max_throttle_delay_secs(),
            max_wait_rounds: default_max_wait_rounds(),
        }
    }
}

fn default_max_requests() -> u32 {
    3000
}
fn default_window_secs() -> u64 {
    300
}
fn default_throttle_threshold() -> f64 {
    0.8
}
fn default_max_throttle_delay_secs() -> f64 {
    2.0
}
fn default_max_wait_rounds() -> u32 {
    16
}

impl RateLimitSettings {
    pub fn to_limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs),
            throttle_threshold: self.throttle_threshold,
            max_throttle_delay: Duration::try_from_secs_f64(self.max_throttle_delay_secs)
                .unwrap_or(Duration::MAX),
            max_wait_rounds: self.max_wait_rounds,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_half_open_attempts")]
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            half_open_attempts: default_half_open_attempts(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_half_open_attempts() -> u32 {
    2
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            half_open_attempts: self.half_open_attempts,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            default_retry_after_secs: default_retry_after_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> f64 {
    2.0
}
fn default_retry_after_secs() -> u64 {
    60
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base_secs,
            default_retry_after: Duration::from_secs(self.default_retry_after_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    /// Per-entity freshness. `0` disables expiry.
    #[serde(default = "default_cache_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cache_max_age_secs() -> u64 {
    86_400
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        match self.max_age_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound for every window, cooldown and timeout setting (one day).
const MAX_INTERVAL_SECS: u64 = 86_400;
/// Upper bound for the soft throttle delay (one hour).
const MAX_THROTTLE_DELAY_SECS: f64 = 3_600.0;

fn validate(config: &Config) -> Result<()> {
    // Validate api
    let base = config.api.base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        anyhow::bail!(
            "api.base_url must start with http:// or https://, got '{}'",
            config.api.base_url
        );
    }
    if config.api.timeout_secs == 0 || config.api.timeout_secs > MAX_INTERVAL_SECS {
        anyhow::bail!("api.timeout_secs must be in 1..={}", MAX_INTERVAL_SECS);
    }

    // Validate rate limit
    let rl = &config.rate_limit;
    if rl.window_secs == 0 || rl.window_secs > MAX_INTERVAL_SECS {
        anyhow::bail!("rate_limit.window_secs must be in 1..={}", MAX_INTERVAL_SECS);
    }
    if !(rl.throttle_threshold > 0.0 && rl.throttle_threshold <= 1.0) {
        anyhow::bail!("rate_limit.throttle_threshold must be in (0.0, 1.0]");
    }
    if !(0.0..=MAX_THROTTLE_DELAY_SECS).contains(&rl.max_throttle_delay_secs) {
        anyhow::bail!(
            "rate_limit.max_throttle_delay_secs must be in [0, {}]",
            MAX_THROTTLE_DELAY_SECS
        );
    }

    // Validate circuit breaker
    if config.circuit_breaker.failure_threshold == 0 {
        anyhow::bail!("circuit_breaker.failure_threshold must be >= 1");
    }
    if config.circuit_breaker.cooldown_secs > MAX_INTERVAL_SECS {
        anyhow::bail!("circuit_breaker.cooldown_secs must be <= {}", MAX_INTERVAL_SECS);
    }
    if config.circuit_breaker.half_open_attempts == 0 {
        anyhow::bail!("circuit_breaker.half_open_attempts must be >= 1");
    }

    // Validate retry
    if config.retry.max_retries == 0 {
        anyhow::bail!("retry.max_retries must be >= 1");
    }
    if !(config.retry.backoff_base_secs.is_finite() && config.retry.backoff_base_secs >= 1.0) {
        anyhow::bail!("retry.backoff_base_secs must be >= 1.0");
    }
    if config.retry.default_retry_after_secs > MAX_INTERVAL_SECS {
        anyhow::bail!("retry.default_retry_after_secs must be <= {}", MAX_INTERVAL_SECS);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[api]
base_url = "https://api.itglue.com"

[cache]
path = "./data/itg.sqlite"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.api.api_key_env, "ITGLUE_API_KEY");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.rate_limit.max_requests, 3000);
        assert_eq!(config.rate_limit.window_secs, 300);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cache.max_age(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.logging.format, LogFormat::Human);

        let limiter = config.rate_limit.to_limiter_config();
        assert_eq!(limiter.max_throttle_delay, Duration::from_secs(2));
        let policy = config.retry.to_policy();
        assert_eq!(policy.default_retry_after, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let src = format!(
            "{}\n[circuit_breaker]\nfailure_threshold = 3\ncooldown_secs = 10\n\n[logging]\nformat = \"json\"\n",
            MINIMAL
        );
        let config = parse(&src).unwrap();
        let breaker = config.circuit_breaker.to_breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.cooldown, Duration::from_secs(10));
        assert_eq!(breaker.half_open_attempts, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_max_age_disables_expiry() {
        let src = MINIMAL.replace(
            "path = \"./data/itg.sqlite\"",
            "path = \"./data/itg.sqlite\"\nmax_age_secs = 0",
        );
        assert_eq!(parse(&src).unwrap().cache.max_age(), None);
    }

    #[test]
    fn rejects_bad_threshold() {
        let src = format!("{}\n[rate_limit]\nthrottle_threshold = 1.5\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("throttle_threshold"));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let src = format!("{}\n[circuit_breaker]\nfailure_threshold = 0\n", MINIMAL);
        assert!(parse(&src).is_err());
    }

    #[test]
    fn rejects_oversized_window() {
        let src = format!("{}\n[rate_limit]\nwindow_secs = 10000000000000\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("window_secs"), "{}", err);

        let src = format!("{}\n[rate_limit]\nwindow_secs = 86400\n", MINIMAL);
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn rejects_oversized_throttle_delay() {
        for value in ["1e20", "-1.0", "nan", "inf"] {
            let src = format!(
                "{}\n[rate_limit]\nmax_throttle_delay_secs = {}\n",
                MINIMAL, value
            );
            let err = parse(&src).unwrap_err();
            assert!(err.to_string().contains("max_throttle_delay_secs"), "{}: {}", value, err);
        }
    }

    #[test]
    fn rejects_oversized_cooldown_and_timeouts() {
        let cases = [
            ("[circuit_breaker]\ncooldown_secs = 10000000000000", "cooldown_secs"),
            ("[retry]\ndefault_retry_after_secs = 10000000000000", "default_retry_after_secs"),
        ];
        for (section, key) in cases {
            let err = parse(&format!("{}\n{}\n", MINIMAL, section)).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);
        }

        let src = MINIMAL.replace(
            "base_url = \"https://api.itglue.com\"",
            "base_url = \"https://api.itglue.com\"\ntimeout_secs = 10000000000000",
        );
        assert!(parse(&src).unwrap_err().to_string().contains("timeout_secs"));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let src = MINIMAL.replace("https://api.itglue.com", "ftp://example.com");
        assert!(parse(&src).is_err());
    }
}
