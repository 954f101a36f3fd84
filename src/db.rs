//! SQLite connection management for the metadata cache.
//!
//! The database file and its parent directories are created automatically.
//! WAL mode lets readers (`itg get`, `itg stats`) run alongside a writer
//! (`itg sync`) without blocking.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Create a connection pool to the configured cache database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.cache.path).await
}

pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;

    Ok(pool)
}
