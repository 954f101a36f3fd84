//! # ITGlue Resilience Core
//!
//! Runtime-agnostic resilience policy for the ITGlue API client: a
//! sliding-window rate limiter, a three-state circuit breaker, a
//! cache-first metadata store, and the orchestration that composes them
//! around a raw HTTP call.
//!
//! This crate contains no tokio, sqlx, reqwest, or other native-only
//! dependencies. Time, transport, and storage all come in through traits
//! ([`clock::Clock`], [`transport::Transport`], [`cache::CacheStore`]) so the
//! whole policy can be driven deterministically in tests.
//!
//! ## Request flow
//!
//! ```text
//! caller ──▶ ResilientClient::request
//!              │
//!              ├─ CircuitBreaker::is_open? ──yes──▶ ApiError::CircuitOpen
//!              ├─ RateLimiter::wait_if_needed   (may sleep)
//!              ├─ Transport::send
//!              ├─ classify status ──▶ record success / failure
//!              └─ retry with backoff, or return Ok / typed ApiError
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`clock`] | Injected time source (`SystemClock` lives in the app crate) |
//! | [`rate_limit`] | Sliding-window limiter with soft throttle and hard block |
//! | [`circuit`] | Closed / Open / HalfOpen failure isolation |
//! | [`cache`] | `CacheStore` trait, in-memory store, `MetadataCache` |
//! | [`transport`] | Abstract HTTP call |
//! | [`client`] | `ResilientClient` orchestration |
//! | [`gateway`] | Entity-level reads and mutations over client + cache |
//! | [`error`] | `ApiError` taxonomy |

pub mod cache;
pub mod circuit;
pub mod client;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod rate_limit;
pub mod transport;

pub use cache::{CacheStats, CacheStore, CachedEntity, EntityRef, MetadataCache, Relationship};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use client::{ApiResponse, ResilientClient, ResponseBody, RetryPolicy};
pub use clock::{Clock, ManualClock};
pub use error::ApiError;
pub use gateway::EntityGateway;
pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter};
pub use transport::{HttpRequest, Method, RawResponse, Transport, TransportError};
