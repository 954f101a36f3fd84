//! Cache-first entity lookup (`itg get`).

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

use itglue_resilience_core::CachedEntity;

use crate::app::App;
use crate::config::Config;

/// Shape printed by `itg get`.
#[derive(Debug, Clone, Serialize)]
pub struct EntityResponse {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub cached_at: String, // RFC 3339
    pub attributes: Value,
}

impl From<CachedEntity> for EntityResponse {
    fn from(entity: CachedEntity) -> Self {
        Self {
            entity_type: entity.entity_type,
            id: entity.entity_id,
            cached_at: entity.cached_at.to_rfc3339(),
            attributes: entity.attributes,
        }
    }
}

/// Look up one entity, falling back to the API on a cache miss.
pub async fn get_entity(
    app: &App,
    entity_type: &str,
    entity_id: &str,
    allow_stale: bool,
) -> Result<EntityResponse> {
    match app
        .gateway
        .get_entity(entity_type, entity_id, allow_stale)
        .await?
    {
        Some(entity) => Ok(entity.into()),
        None => bail!("entity not found: {}/{}", entity_type, entity_id),
    }
}

/// CLI entry point: print the entity as pretty JSON.
pub async fn run_get(
    config: &Config,
    entity_type: &str,
    entity_id: &str,
    allow_stale: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let result = get_entity(&app, entity_type, entity_id, allow_stale).await;
    app.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
