//! Cache schema migrations (idempotent).
//!
//! | Table | Contents |
//! |-------|----------|
//! | `entities` | One row per `(entity_type, entity_id)`, attributes as JSON |
//! | `relationships` | Directed edges keyed by both endpoints |
//! | `refresh_log` | Last bulk refresh per entity type |
//!
//! Timestamps are Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            attributes_json TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (source_type, source_id, target_type, target_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_log (
            entity_type TEXT PRIMARY KEY,
            refreshed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_cached_at ON entities(cached_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
