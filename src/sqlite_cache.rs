//! SQLite-backed [`CacheStore`] implementation.
//!
//! Maps each `CacheStore` operation onto the `entities`, `relationships`,
//! and `refresh_log` tables created by [`crate::migrate`]. Upserts use
//! `ON CONFLICT ... DO UPDATE`, so the last write wins and `cached_at`
//! always reflects it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use itglue_resilience_core::cache::{CacheStore, CachedEntity, EntityRef, Relationship};

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp in cache: {}", ms))
}

fn entity_from_row(row: &SqliteRow) -> Result<CachedEntity> {
    let entity_type: String = row.get("entity_type");
    let entity_id: String = row.get("entity_id");
    let attributes_json: String = row.get("attributes_json");
    let attributes = serde_json::from_str(&attributes_json)
        .with_context(|| format!("corrupt cache entry {}/{}", entity_type, entity_id))?;

    Ok(CachedEntity {
        entity_type,
        entity_id,
        attributes,
        cached_at: from_millis(row.get("cached_at"))?,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<CachedEntity>> {
        let row = sqlx::query(
            "SELECT entity_type, entity_id, attributes_json, cached_at FROM entities WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn upsert_entity(&self, entity: &CachedEntity) -> Result<()> {
        let attributes_json = serde_json::to_string(&entity.attributes)?;
        sqlx::query(
            r#"
            INSERT INTO entities (entity_type, entity_id, attributes_json, cached_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                attributes_json = excluded.attributes_json,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .bind(&attributes_json)
        .bind(entity.cached_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relationships (source_type, source_id, target_type, target_id, cached_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_type, source_id, target_type, target_id) DO UPDATE SET
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&relationship.source.entity_type)
        .bind(&relationship.source.entity_id)
        .bind(&relationship.target.entity_type)
        .bind(&relationship.target.entity_id)
        .bind(relationship.cached_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn relationships_from(&self, source: &EntityRef) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            r#"
            SELECT target_type, target_id, cached_at
            FROM relationships
            WHERE source_type = ? AND source_id = ?
            ORDER BY target_type ASC, target_id ASC
            "#,
        )
        .bind(&source.entity_type)
        .bind(&source.entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Relationship> {
                Ok(Relationship {
                    source: source.clone(),
                    target: EntityRef::new(
                        row.get::<String, _>("target_type"),
                        row.get::<String, _>("target_id"),
                    ),
                    cached_at: from_millis(row.get("cached_at"))?,
                })
            })
            .collect()
    }

    async fn last_refresh(&self, entity_type: &str) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> =
            sqlx::query_scalar("SELECT refreshed_at FROM refresh_log WHERE entity_type = ?")
                .bind(entity_type)
                .fetch_optional(&self.pool)
                .await?;
        ms.map(from_millis).transpose()
    }

    async fn set_last_refresh(&self, entity_type: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_log (entity_type, refreshed_at)
            VALUES (?, ?)
            ON CONFLICT(entity_type) DO UPDATE SET refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(entity_type)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
