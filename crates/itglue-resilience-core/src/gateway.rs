//! Entity-level operations over [`ResilientClient`] and [`MetadataCache`].
//!
//! Reads go cache-first; mutations go to the API and then invalidate the
//! affected cache entry. Bulk refreshes page through a collection endpoint
//! and record a per-type refresh marker for [`MetadataCache::is_stale`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cache::{CachedEntity, EntityRef, MetadataCache, Relationship};
use crate::client::ResilientClient;
use crate::error::ApiError;
use crate::transport::Method;

/// Page size requested during bulk refresh.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

pub struct EntityGateway {
    client: Arc<ResilientClient>,
    cache: Arc<MetadataCache>,
    page_size: u32,
}

impl EntityGateway {
    pub fn new(client: Arc<ResilientClient>, cache: Arc<MetadataCache>) -> Self {
        Self {
            client,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Cache-first read of `/{entity_type}/{entity_id}`.
    pub async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        allow_stale: bool,
    ) -> Result<Option<CachedEntity>, ApiError> {
        let client = Arc::clone(&self.client);
        let collection = entity_type.to_string();
        self.cache
            .smart_get(
                entity_type,
                entity_id,
                |id| async move {
                    let response = client.get(&format!("/{}/{}", collection, id)).await?;
                    Ok::<_, ApiError>(response.and_then(|r| r.resource()))
                },
                allow_stale,
            )
            .await
    }

    /// `PATCH` an entity, then drop its cache entry.
    pub async fn update_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        attributes: Value,
    ) -> Result<Option<Value>, ApiError> {
        let body = json!({
            "data": {
                "type": entity_type,
                "attributes": attributes,
            }
        });
        let response = self
            .client
            .patch(&format!("/{}/{}", entity_type, entity_id), body)
            .await?;
        self.invalidate_quietly(entity_type, entity_id).await;
        Ok(response.and_then(|r| r.resource()))
    }

    /// `DELETE` an entity, then drop its cache entry. Returns `false` when
    /// the entity was already gone upstream.
    pub async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool, ApiError> {
        let response = self
            .client
            .delete(&format!("/{}/{}", entity_type, entity_id))
            .await?;
        self.invalidate_quietly(entity_type, entity_id).await;
        Ok(response.is_some())
    }

    /// Page through `/{entity_type}`, upserting every item, then record the
    /// refresh marker. Returns the number of entities written.
    pub async fn refresh_all(&self, entity_type: &str) -> Result<usize, ApiError> {
        let path = format!("/{}", entity_type);
        let mut written = 0usize;
        let mut page = 1u32;

        loop {
            let query = vec![
                ("page[size]".to_string(), self.page_size.to_string()),
                ("page[number]".to_string(), page.to_string()),
            ];
            let Some(response) = self
                .client
                .request_with_query(Method::Get, &path, query, None)
                .await?
            else {
                break;
            };
            let Some(body) = response.json_value() else {
                break;
            };

            let items = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }

            for item in items {
                let Some(id) = resource_id(&item) else {
                    warn!(entity_type, "skipping item without id during refresh");
                    continue;
                };
                self.cache
                    .put(entity_type, &id, item)
                    .await
                    .map_err(ApiError::Cache)?;
                written += 1;
            }

            if !has_next_page(body) {
                break;
            }
            page += 1;
        }

        self.cache
            .mark_refreshed(entity_type)
            .await
            .map_err(ApiError::Cache)?;
        info!(entity_type, written, pages = page, "bulk refresh complete");
        Ok(written)
    }

    /// Run [`refresh_all`](Self::refresh_all) only when the last bulk
    /// refresh is older than `max_age`. Returns `None` when skipped.
    pub async fn refresh_if_stale(
        &self,
        entity_type: &str,
        max_age: Duration,
    ) -> Result<Option<usize>, ApiError> {
        let stale = self
            .cache
            .is_stale(entity_type, max_age)
            .await
            .map_err(ApiError::Cache)?;
        if !stale {
            return Ok(None);
        }
        self.refresh_all(entity_type).await.map(Some)
    }

    pub async fn link(&self, source: &EntityRef, target: &EntityRef) -> Result<(), ApiError> {
        self.cache
            .relate(source, target)
            .await
            .map_err(ApiError::Cache)
    }

    pub async fn related(&self, source: &EntityRef) -> Result<Vec<Relationship>, ApiError> {
        self.cache.related(source).await.map_err(ApiError::Cache)
    }

    async fn invalidate_quietly(&self, entity_type: &str, entity_id: &str) {
        if let Err(e) = self.cache.invalidate(entity_type, entity_id).await {
            warn!(entity_type, entity_id, error = %e, "failed to invalidate cache entry");
        }
    }
}

/// JSON:API ids are strings, but tolerate numbers.
fn resource_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn has_next_page(body: &Value) -> bool {
    let link = body.get("links").and_then(|l| l.get("next"));
    let meta_next = body
        .get("meta")
        .and_then(|m| m.get("next-page"))
        .filter(|v| !v.is_null());
    matches!(link, Some(v) if !v.is_null()) || meta_next.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_from_strings_and_numbers() {
        assert_eq!(resource_id(&json!({"id": "12"})), Some("12".to_string()));
        assert_eq!(resource_id(&json!({"id": 12})), Some("12".to_string()));
        assert_eq!(resource_id(&json!({"name": "x"})), None);
    }

    #[test]
    fn next_page_detection() {
        assert!(has_next_page(&json!({"links": {"next": "https://x/?page[number]=2"}})));
        assert!(has_next_page(&json!({"meta": {"next-page": 2}})));
        assert!(!has_next_page(&json!({"links": {"next": null}})));
        assert!(!has_next_page(&json!({"meta": {"next-page": null}})));
        assert!(!has_next_page(&json!({})));
    }
}
