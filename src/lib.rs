//! # ITGlue Resilience
//!
//! A resilient command-line client for the ITGlue REST API.
//!
//! The resilience policy (rate limiting, circuit breaking, retries, and the
//! cache-first lookup) lives in the `itglue-resilience-core` crate. This
//! crate supplies the native adapters around it and the `itg` binary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────────────┐   ┌────────────┐
//! │   CLI    │──▶│ EntityGateway                   │──▶│ ITGlue API │
//! │  (itg)   │   │  ResilientClient + MetadataCache│   │  (reqwest) │
//! └──────────┘   └───────────────┬─────────────────┘   └────────────┘
//!                                ▼
//!                          ┌──────────┐
//!                          │  SQLite  │
//!                          │  cache   │
//!                          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export ITGLUE_API_KEY=...
//! itg init                              # create the cache database
//! itg get organizations 42              # cache-first lookup
//! itg sync configurations --force       # bulk refresh a collection
//! itg request GET /flexible_asset_types --query page[size]=50
//! itg stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`clock`] | Wall-clock [`Clock`](itglue_resilience_core::Clock) |
//! | [`http`] | reqwest transport |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_cache`] | SQLite cache store |
//! | [`app`] | Component wiring |
//! | [`get`], [`request`], [`sync_cmd`], [`cache_cmd`], [`stats`] | CLI commands |

pub mod app;
pub mod cache_cmd;
pub mod clock;
pub mod config;
pub mod db;
pub mod get;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod request;
pub mod sqlite_cache;
pub mod stats;
pub mod sync_cmd;
