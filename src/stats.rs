//! Cache database overview (`itg stats`).
//!
//! Summarizes what is cached: entity counts per type, how old the newest
//! entry is, the relationship count, and when each collection was last
//! bulk-refreshed.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::{db, migrate};

/// Per-type breakdown.
struct TypeStats {
    entity_type: String,
    entity_count: i64,
    newest_ms: i64,
    last_refresh_ms: Option<i64>,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let total_entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(&pool)
        .await?;

    let total_relationships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.cache.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("ITGlue Cache Stats");
    println!("==================");
    println!();
    println!("  Database:       {}", config.cache.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    match config.cache.max_age() {
        Some(age) => println!("  Max age:        {}s", age.as_secs()),
        None => println!("  Max age:        never expires"),
    }
    println!();
    println!("  Entities:       {}", total_entities);
    println!("  Relationships:  {}", total_relationships);

    let type_rows = sqlx::query(
        r#"
        SELECT entity_type, COUNT(*) AS entity_count, MAX(cached_at) AS newest
        FROM entities
        GROUP BY entity_type
        ORDER BY entity_count DESC, entity_type ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let refresh_rows = sqlx::query("SELECT entity_type, refreshed_at FROM refresh_log")
        .fetch_all(&pool)
        .await?;

    let type_stats: Vec<TypeStats> = type_rows
        .iter()
        .map(|row| {
            let entity_type: String = row.get("entity_type");
            let last_refresh_ms = refresh_rows
                .iter()
                .find(|r| r.get::<String, _>("entity_type") == entity_type)
                .map(|r| r.get::<i64, _>("refreshed_at"));
            TypeStats {
                entity_type,
                entity_count: row.get("entity_count"),
                newest_ms: row.get("newest"),
                last_refresh_ms,
            }
        })
        .collect();

    if !type_stats.is_empty() {
        println!();
        println!("  By type:");
        println!(
            "  {:<28} {:>8}   {:<16} {}",
            "TYPE", "CACHED", "NEWEST", "LAST REFRESH"
        );
        println!("  {}", "-".repeat(72));

        let now = chrono::Utc::now().timestamp();
        for t in &type_stats {
            let refresh_display = match t.last_refresh_ms {
                Some(ms) => format_ts_relative(ms / 1000, now),
                None => "never".to_string(),
            };
            println!(
                "  {:<28} {:>8}   {:<16} {}",
                t.entity_type,
                t.entity_count,
                format_ts_relative(t.newest_ms / 1000, now),
                refresh_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
