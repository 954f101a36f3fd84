//! # ITGlue CLI (`itg`)
//!
//! Every API call goes through the sliding-window rate limiter, the circuit
//! breaker, and bounded retries. Entity reads are served from the local
//! SQLite cache when fresh.
//!
//! ## Usage
//!
//! ```bash
//! itg --config ./config/itg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `itg init` | Create the SQLite cache and run schema migrations |
//! | `itg get <type> <id>` | Cache-first entity lookup |
//! | `itg request <METHOD> <PATH>` | One resilient request, bypassing the cache |
//! | `itg sync <type>` | Bulk refresh a collection when stale |
//! | `itg invalidate <type> <id>` | Drop a cache entry |
//! | `itg link <type> <id> <target-type> <target-id>` | Record a relationship |
//! | `itg related <type> <id>` | List cached relationships |
//! | `itg stats` | Cache overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use itglue_resilience::{cache_cmd, config, get, logging, migrate, request, stats, sync_cmd};
use itglue_resilience_core::{EntityRef, Method};

/// ITGlue CLI: a rate-limited, circuit-broken, cache-first API client.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/itg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "itg",
    about = "A resilient, cache-first ITGlue API client",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/itg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database. Safe to run repeatedly.
    Init,

    /// Look up an entity, serving it from the cache when fresh.
    Get {
        /// Collection name, e.g. `organizations` or `configurations`.
        entity_type: String,
        entity_id: String,

        /// Serve an expired cache entry if the API call fails.
        #[arg(long)]
        allow_stale: bool,
    },

    /// Send one request through the rate limiter, breaker, and retries.
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE).
        method: Method,

        /// Path relative to the API base URL, e.g. `/organizations/42`.
        path: String,

        /// JSON request body.
        #[arg(long)]
        body: Option<String>,

        /// Query parameter as `key=value`. Repeatable.
        #[arg(long = "query", value_parser = request::parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Bulk refresh one collection into the cache.
    Sync {
        entity_type: String,

        /// Skip the refresh if the last one is younger than this.
        /// Defaults to `[cache] max_age_secs`.
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Refresh regardless of age.
        #[arg(long)]
        force: bool,
    },

    /// Drop one entry from the cache.
    Invalidate {
        entity_type: String,
        entity_id: String,
    },

    /// Record a relationship between two cached entities.
    Link {
        entity_type: String,
        entity_id: String,
        target_type: String,
        target_id: String,
    },

    /// List cached relationships of an entity.
    Related {
        entity_type: String,
        entity_id: String,
    },

    /// Show cache statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache initialized successfully.");
        }
        Commands::Get {
            entity_type,
            entity_id,
            allow_stale,
        } => {
            get::run_get(&cfg, &entity_type, &entity_id, allow_stale).await?;
        }
        Commands::Request {
            method,
            path,
            body,
            query,
        } => {
            request::run_request(&cfg, method, &path, body.as_deref(), query).await?;
        }
        Commands::Sync {
            entity_type,
            max_age_secs,
            force,
        } => {
            sync_cmd::run_sync(&cfg, &entity_type, max_age_secs, force).await?;
        }
        Commands::Invalidate {
            entity_type,
            entity_id,
        } => {
            cache_cmd::run_invalidate(&cfg, &entity_type, &entity_id).await?;
        }
        Commands::Link {
            entity_type,
            entity_id,
            target_type,
            target_id,
        } => {
            let source = EntityRef::new(entity_type, entity_id);
            let target = EntityRef::new(target_type, target_id);
            cache_cmd::run_link(&cfg, &source, &target).await?;
        }
        Commands::Related {
            entity_type,
            entity_id,
        } => {
            cache_cmd::run_related(&cfg, &entity_type, &entity_id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
