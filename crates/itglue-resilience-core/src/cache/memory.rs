//! In-memory [`CacheStore`] implementation for tests and short-lived tools.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Contents vanish with the
//! process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheStore, CachedEntity, EntityRef, Relationship};

type EntityKey = (String, String);

pub struct InMemoryCacheStore {
    entities: RwLock<HashMap<EntityKey, CachedEntity>>,
    relationships: RwLock<HashMap<(EntityRef, EntityRef), Relationship>>,
    refreshes: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            relationships: RwLock::new(HashMap::new()),
            refreshes: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        read(&self.entities).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(entity_type: &str, entity_id: &str) -> EntityKey {
    (entity_type.to_string(), entity_id.to_string())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<CachedEntity>> {
        Ok(read(&self.entities)
            .get(&key(entity_type, entity_id))
            .cloned())
    }

    async fn upsert_entity(&self, entity: &CachedEntity) -> Result<()> {
        write(&self.entities).insert(
            key(&entity.entity_type, &entity.entity_id),
            entity.clone(),
        );
        Ok(())
    }

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        Ok(write(&self.entities)
            .remove(&key(entity_type, entity_id))
            .is_some())
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<()> {
        write(&self.relationships).insert(
            (relationship.source.clone(), relationship.target.clone()),
            relationship.clone(),
        );
        Ok(())
    }

    async fn relationships_from(&self, source: &EntityRef) -> Result<Vec<Relationship>> {
        let mut edges: Vec<Relationship> = read(&self.relationships)
            .values()
            .filter(|r| &r.source == source)
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.target.cmp(&b.target));
        Ok(edges)
    }

    async fn last_refresh(&self, entity_type: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(read(&self.refreshes).get(entity_type).copied())
    }

    async fn set_last_refresh(&self, entity_type: &str, at: DateTime<Utc>) -> Result<()> {
        write(&self.refreshes).insert(entity_type.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(entity_type: &str, id: &str, name: &str) -> CachedEntity {
        CachedEntity {
            entity_type: entity_type.to_string(),
            entity_id: id.to_string(),
            attributes: json!({ "name": name }),
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_same_key() {
        let store = InMemoryCacheStore::new();
        store
            .upsert_entity(&entity("organizations", "1", "first"))
            .await
            .unwrap();
        store
            .upsert_entity(&entity("organizations", "1", "second"))
            .await
            .unwrap();
        store
            .upsert_entity(&entity("contacts", "1", "other type"))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        let got = store.get_entity("organizations", "1").await.unwrap().unwrap();
        assert_eq!(got.attributes["name"], "second");
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = InMemoryCacheStore::new();
        store
            .upsert_entity(&entity("organizations", "1", "x"))
            .await
            .unwrap();
        assert!(store.delete_entity("organizations", "1").await.unwrap());
        assert!(!store.delete_entity("organizations", "1").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn relationships_sorted_by_target() {
        let store = InMemoryCacheStore::new();
        let src = EntityRef::new("organizations", "1");
        for (t, id) in [("contacts", "2"), ("configurations", "9"), ("contacts", "1")] {
            store
                .upsert_relationship(&Relationship {
                    source: src.clone(),
                    target: EntityRef::new(t, id),
                    cached_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let targets: Vec<String> = store
            .relationships_from(&src)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.target.to_string())
            .collect();
        assert_eq!(
            targets,
            vec!["configurations/9", "contacts/1", "contacts/2"]
        );
    }
}
