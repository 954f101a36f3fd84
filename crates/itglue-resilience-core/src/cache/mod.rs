//! Cache-first metadata store.
//!
//! [`CacheStore`] abstracts the local key-value storage (SQLite in the app
//! crate, [`memory::InMemoryCacheStore`] for tests). [`MetadataCache`] layers
//! the lookup policy on top:
//!
//! 1. [`get`](MetadataCache::get) is a purely local lookup.
//! 2. [`smart_get`](MetadataCache::smart_get) serves a fresh local entry
//!    without touching the network; on a miss it calls the supplied fetch
//!    and writes the result back.
//! 3. [`invalidate`](MetadataCache::invalidate) drops an entry after an
//!    upstream mutation so the next `smart_get` refetches.
//!
//! Nothing is purged on a timer. Staleness is derived on read, both per
//! entity (`cached_at` vs. `max_age`) and per entity type (last bulk
//! refresh, see [`is_stale`](MetadataCache::is_stale)).

pub mod memory;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{elapsed_between, Clock};

/// A cached API entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub attributes: Value,
    /// Time of the last successful write.
    pub cached_at: DateTime<Utc>,
}

/// `(entity_type, entity_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Directed link between two entities. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: EntityRef,
    pub target: EntityRef,
    pub cached_at: DateTime<Utc>,
}

/// Abstract storage backend for the metadata cache.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_entity`](CacheStore::get_entity) | Raw lookup, ignoring freshness |
/// | [`upsert_entity`](CacheStore::upsert_entity) | Insert or replace by `(type, id)` |
/// | [`delete_entity`](CacheStore::delete_entity) | Remove; returns whether it existed |
/// | [`upsert_relationship`](CacheStore::upsert_relationship) | Insert or replace an edge |
/// | [`relationships_from`](CacheStore::relationships_from) | Outgoing edges of an entity |
/// | [`last_refresh`](CacheStore::last_refresh) | Bulk-refresh marker for a type |
/// | [`set_last_refresh`](CacheStore::set_last_refresh) | Record a bulk refresh |
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_entity(&self, entity_type: &str, entity_id: &str)
        -> Result<Option<CachedEntity>>;

    async fn upsert_entity(&self, entity: &CachedEntity) -> Result<()>;

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool>;

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<()>;

    /// Edges whose source is `source`, ordered by target.
    async fn relationships_from(&self, source: &EntityRef) -> Result<Vec<Relationship>>;

    async fn last_refresh(&self, entity_type: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_refresh(&self, entity_type: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Lookup counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub stale_served: u64,
}

pub struct MetadataCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    stale_served: AtomicU64,
}

impl MetadataCache {
    /// A cache whose entries never expire on their own.
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_age: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// Treat entries older than `max_age` as misses. `None` disables expiry.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Local lookup. Never calls the network.
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<CachedEntity>> {
        let fresh = self
            .store
            .get_entity(entity_type, entity_id)
            .await?
            .filter(|entity| self.is_fresh(entity));

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(entity_type, entity_id, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(entity_type, entity_id, "cache miss");
        }
        Ok(fresh)
    }

    /// Cache-first lookup with remote fallback.
    ///
    /// A fresh local entry is returned without calling `fetch`. On a miss,
    /// `fetch(entity_id)` runs once:
    ///
    /// - `Ok(Some(attrs))` is written back with `cached_at = now` and returned.
    /// - `Ok(None)` (the entity is gone upstream) drops any local copy.
    /// - `Err(e)` returns the expired local copy when `allow_stale` is set
    ///   and one exists, otherwise propagates `e`.
    ///
    /// Store failures are logged and treated as misses, since every entry
    /// can be rebuilt from the API.
    pub async fn smart_get<F, Fut, E>(
        &self,
        entity_type: &str,
        entity_id: &str,
        fetch: F,
        allow_stale: bool,
    ) -> std::result::Result<Option<CachedEntity>, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<Option<Value>, E>>,
        E: fmt::Display,
    {
        match self.get(entity_type, entity_id).await {
            Ok(Some(entity)) => return Ok(Some(entity)),
            Ok(None) => {}
            Err(e) => warn!(entity_type, entity_id, error = %e, "cache lookup failed; fetching"),
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        match fetch(entity_id.to_string()).await {
            Ok(Some(attributes)) => {
                let entity = CachedEntity {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    attributes,
                    cached_at: self.clock.now(),
                };
                if let Err(e) = self.store.upsert_entity(&entity).await {
                    warn!(entity_type, entity_id, error = %e, "failed to write fetched entity to cache");
                }
                Ok(Some(entity))
            }
            Ok(None) => {
                if let Err(e) = self.invalidate(entity_type, entity_id).await {
                    warn!(entity_type, entity_id, error = %e, "failed to drop missing entity from cache");
                }
                Ok(None)
            }
            Err(err) => {
                if allow_stale {
                    match self.store.get_entity(entity_type, entity_id).await {
                        Ok(Some(stale)) => {
                            self.stale_served.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                entity_type,
                                entity_id,
                                error = %err,
                                cached_at = %stale.cached_at,
                                "fetch failed; serving stale cache entry"
                            );
                            return Ok(Some(stale));
                        }
                        Ok(None) => {}
                        Err(e) => warn!(entity_type, entity_id, error = %e, "stale lookup failed"),
                    }
                }
                Err(err)
            }
        }
    }

    /// Insert or replace an entry with `cached_at = now`.
    pub async fn put(
        &self,
        entity_type: &str,
        entity_id: &str,
        attributes: Value,
    ) -> Result<CachedEntity> {
        let entity = CachedEntity {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            attributes,
            cached_at: self.clock.now(),
        };
        self.store.upsert_entity(&entity).await?;
        Ok(entity)
    }

    /// Drop an entry. Dropping a missing entry is a no-op.
    pub async fn invalidate(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        if self.store.delete_entity(entity_type, entity_id).await? {
            debug!(entity_type, entity_id, "cache entry invalidated");
        }
        Ok(())
    }

    /// Whether the last bulk refresh of `entity_type` is older than
    /// `max_age`. A type that was never refreshed is stale.
    pub async fn is_stale(&self, entity_type: &str, max_age: Duration) -> Result<bool> {
        let stale = match self.store.last_refresh(entity_type).await? {
            Some(at) => elapsed_between(at, self.clock.now()) > max_age,
            None => true,
        };
        Ok(stale)
    }

    /// Record that `entity_type` was just bulk-refreshed.
    pub async fn mark_refreshed(&self, entity_type: &str) -> Result<()> {
        self.store
            .set_last_refresh(entity_type, self.clock.now())
            .await
    }

    pub async fn relate(&self, source: &EntityRef, target: &EntityRef) -> Result<()> {
        self.store
            .upsert_relationship(&Relationship {
                source: source.clone(),
                target: target.clone(),
                cached_at: self.clock.now(),
            })
            .await
    }

    pub async fn related(&self, source: &EntityRef) -> Result<Vec<Relationship>> {
        self.store.relationships_from(source).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }

    fn is_fresh(&self, entity: &CachedEntity) -> bool {
        match self.max_age {
            Some(max_age) => elapsed_between(entity.cached_at, self.clock.now()) <= max_age,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryCacheStore;
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache(max_age: Option<Duration>) -> (Arc<ManualClock>, MetadataCache) {
        let clock = Arc::new(ManualClock::default());
        let cache = MetadataCache::new(Arc::new(InMemoryCacheStore::new()), clock.clone())
            .with_max_age(max_age);
        (clock, cache)
    }

    /// Fetch stub that counts calls and returns a fixed result.
    struct CountingFetch {
        calls: AtomicUsize,
    }

    impl CountingFetch {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn ok(&self, id: String) -> std::result::Result<Option<Value>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!({ "id": id, "name": "Acme" })))
        }

        async fn missing(&self, _id: String) -> std::result::Result<Option<Value>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn fail(&self, _id: String) -> std::result::Result<Option<Value>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("upstream down".to_string())
        }
    }

    #[tokio::test]
    async fn populated_entry_skips_fetch() {
        let (_clock, cache) = cache(None);
        cache
            .put("organizations", "42", json!({"name": "Cached"}))
            .await
            .unwrap();

        let fetch = CountingFetch::new();
        let entity = cache
            .smart_get("organizations", "42", |id| fetch.ok(id), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetch.calls(), 0);
        assert_eq!(entity.attributes["name"], "Cached");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn miss_fetches_once_and_populates() {
        let (_clock, cache) = cache(None);
        let fetch = CountingFetch::new();

        let fetched = cache
            .smart_get("organizations", "7", |id| fetch.ok(id), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetch.calls(), 1);
        assert_eq!(fetched.attributes["id"], "7");

        let local = cache.get("organizations", "7").await.unwrap().unwrap();
        assert_eq!(local, fetched);

        cache
            .smart_get("organizations", "7", |id| fetch.ok(id), false)
            .await
            .unwrap();
        assert_eq!(fetch.calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let (clock, cache) = cache(Some(Duration::from_secs(60)));
        cache
            .put("configurations", "1", json!({"v": 1}))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("configurations", "1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("configurations", "1").await.unwrap().is_none());

        let fetch = CountingFetch::new();
        let entity = cache
            .smart_get("configurations", "1", |id| fetch.ok(id), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetch.calls(), 1);
        assert_eq!(entity.cached_at, clock.now());
    }

    #[tokio::test]
    async fn fetch_failure_serves_stale_only_when_allowed() {
        let (clock, cache) = cache(Some(Duration::from_secs(60)));
        cache
            .put("contacts", "9", json!({"name": "Old"}))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let fetch = CountingFetch::new();
        let err = cache
            .smart_get("contacts", "9", |id| fetch.fail(id), false)
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");

        let stale = cache
            .smart_get("contacts", "9", |id| fetch.fail(id), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.attributes["name"], "Old");
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn fetch_failure_without_local_copy_propagates() {
        let (_clock, cache) = cache(None);
        let fetch = CountingFetch::new();
        let err = cache
            .smart_get("contacts", "1", |id| fetch.fail(id), true)
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");
    }

    #[tokio::test]
    async fn upstream_not_found_drops_local_copy() {
        let (clock, cache) = cache(Some(Duration::from_secs(10)));
        cache
            .put("passwords", "5", json!({"name": "gone"}))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(11));

        let fetch = CountingFetch::new();
        let result = cache
            .smart_get("passwords", "5", |id| fetch.missing(id), true)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(cache
            .store()
            .get_entity("passwords", "5")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_and_is_idempotent() {
        let (_clock, cache) = cache(None);
        cache
            .put("organizations", "42", json!({"name": "Acme"}))
            .await
            .unwrap();

        cache.invalidate("organizations", "42").await.unwrap();
        cache.invalidate("organizations", "42").await.unwrap();
        cache.invalidate("organizations", "does-not-exist").await.unwrap();

        let fetch = CountingFetch::new();
        cache
            .smart_get("organizations", "42", |id| fetch.ok(id), false)
            .await
            .unwrap();
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn bulk_staleness_tracks_refresh_marker() {
        let (clock, cache) = cache(None);
        let max_age = Duration::from_secs(3600);

        assert!(cache.is_stale("organizations", max_age).await.unwrap());

        cache.mark_refreshed("organizations").await.unwrap();
        assert!(!cache.is_stale("organizations", max_age).await.unwrap());
        assert!(cache.is_stale("configurations", max_age).await.unwrap());

        clock.advance(Duration::from_secs(3601));
        assert!(cache.is_stale("organizations", max_age).await.unwrap());
    }

    #[tokio::test]
    async fn relationships_last_write_wins() {
        let (clock, cache) = cache(None);
        let org = EntityRef::new("organizations", "1");
        let cfg = EntityRef::new("configurations", "10");

        cache.relate(&org, &cfg).await.unwrap();
        clock.advance(Duration::from_secs(5));
        cache.relate(&org, &cfg).await.unwrap();
        cache
            .relate(&org, &EntityRef::new("contacts", "3"))
            .await
            .unwrap();

        let edges = cache.related(&org).await.unwrap();
        assert_eq!(edges.len(), 2);
        let cfg_edge = edges.iter().find(|r| r.target == cfg).unwrap();
        assert_eq!(cfg_edge.cached_at, clock.now());
        assert!(cache.related(&cfg).await.unwrap().is_empty());
    }
}
