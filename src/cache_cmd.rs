//! Local cache maintenance: `itg invalidate` and `itg related`.
//!
//! Neither command touches the network.

use anyhow::Result;

use itglue_resilience_core::{EntityRef, Relationship};

use crate::app::App;
use crate::config::Config;

pub async fn run_invalidate(config: &Config, entity_type: &str, entity_id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.cache().invalidate(entity_type, entity_id).await;
    app.close().await;

    result?;
    println!("invalidated {}/{}", entity_type, entity_id);
    Ok(())
}

pub async fn list_related(app: &App, source: &EntityRef) -> Result<Vec<Relationship>> {
    Ok(app.gateway.related(source).await?)
}

pub async fn run_related(config: &Config, entity_type: &str, entity_id: &str) -> Result<()> {
    let source = EntityRef::new(entity_type, entity_id);

    let app = App::open(config).await?;
    let result = list_related(&app, &source).await;
    app.close().await;

    let relationships = result?;
    if relationships.is_empty() {
        println!("no cached relationships for {}", source);
        return Ok(());
    }

    println!("{:<40} CACHED AT", "TARGET");
    for rel in &relationships {
        println!(
            "{:<40} {}",
            rel.target.to_string(),
            rel.cached_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn run_link(config: &Config, source: &EntityRef, target: &EntityRef) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.gateway.link(source, target).await;
    app.close().await;

    result?;
    println!("linked {} -> {}", source, target);
    Ok(())
}
