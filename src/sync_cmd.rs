//! Bulk refresh of one entity collection (`itg sync`).

use anyhow::Result;
use std::time::Duration;

use crate::app::App;
use crate::config::Config;

/// Refresh `entity_type` when its last bulk refresh is older than
/// `max_age`, or unconditionally with `force`.
///
/// Returns the number of entities written, or `None` when the collection
/// was still fresh and nothing was fetched.
pub async fn sync_entities(
    app: &App,
    entity_type: &str,
    max_age: Duration,
    force: bool,
) -> Result<Option<usize>> {
    let written = if force {
        Some(app.gateway.refresh_all(entity_type).await?)
    } else {
        app.gateway.refresh_if_stale(entity_type, max_age).await?
    };
    Ok(written)
}

pub async fn run_sync(
    config: &Config,
    entity_type: &str,
    max_age_secs: Option<u64>,
    force: bool,
) -> Result<()> {
    let max_age = Duration::from_secs(max_age_secs.unwrap_or(config.cache.max_age_secs));

    let app = App::open(config).await?;
    let result = sync_entities(&app, entity_type, max_age, force).await;
    app.close().await;

    match result? {
        Some(n) => println!("sync {}: {} entities cached", entity_type, n),
        None => println!(
            "sync {}: up to date (refreshed within {}s)",
            entity_type,
            max_age.as_secs()
        ),
    }
    Ok(())
}
