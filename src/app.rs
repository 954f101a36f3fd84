//! Wiring: builds the limiter, breaker, client, cache, and gateway from a
//! [`Config`] and hands them out as one value.
//!
//! Every CLI command opens an [`App`]; tests use [`App::open_with`] to swap
//! in a scripted transport or a manual clock.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use itglue_resilience_core::{
    CacheStats, CircuitBreaker, CircuitSnapshot, Clock, EntityGateway, MetadataCache, RateLimiter,
    ResilientClient, Transport,
};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db;
use crate::http::HttpTransport;
use crate::migrate;
use crate::sqlite_cache::SqliteCacheStore;

/// Cache counters and breaker state accumulated by one [`App`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub cache: CacheStats,
    pub breaker: CircuitSnapshot,
}

pub struct App {
    pub gateway: EntityGateway,
    pub store: Arc<SqliteCacheStore>,
}

impl App {
    /// Production wiring: HTTP transport and wall-clock time.
    pub async fn open(config: &Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config.api)?);
        Self::open_with(config, transport, Arc::new(SystemClock)).await
    }

    pub async fn open_with(
        config: &Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store = Arc::new(SqliteCacheStore::new(pool));

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.to_limiter_config(),
            Arc::clone(&clock),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.to_breaker_config(),
            Arc::clone(&clock),
        ));
        let client = ResilientClient::new(transport, limiter, breaker, Arc::clone(&clock))
            .with_retry_policy(config.retry.to_policy())
            .with_timeout(Duration::from_secs(config.api.timeout_secs));

        let cache = MetadataCache::new(store.clone(), clock).with_max_age(config.cache.max_age());

        Ok(Self {
            gateway: EntityGateway::new(Arc::new(client), Arc::new(cache)),
            store,
        })
    }

    pub fn client(&self) -> &ResilientClient {
        self.gateway.client()
    }

    pub fn cache(&self) -> &MetadataCache {
        self.gateway.cache()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            cache: self.cache().stats(),
            breaker: self.client().breaker().snapshot(),
        }
    }

    /// Log the session summary and close the pool.
    pub async fn close(self) {
        let summary = self.summary();
        debug!(
            hits = summary.cache.hits,
            misses = summary.cache.misses,
            fetches = summary.cache.fetches,
            stale_served = summary.cache.stale_served,
            breaker_state = ?summary.breaker.state,
            breaker_failures = summary.breaker.failure_count,
            breaker_forced = summary.breaker.forced,
            "session summary"
        );
        self.store.pool().close().await;
    }
}
