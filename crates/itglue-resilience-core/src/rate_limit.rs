//! Sliding-window request throttling.
//!
//! [`RateLimiter`] remembers when each accepted request was sent and applies
//! a two-tier policy against the trailing window:
//!
//! | Requests in window | Decision |
//! |--------------------|----------|
//! | `< threshold × max` | [`RateDecision::Proceed`] |
//! | `≥ threshold × max` and `< max` | [`RateDecision::Throttle`] with a linear delay in `[0, max_throttle_delay]` |
//! | `≥ max` | [`RateDecision::Blocked`] until the oldest request leaves the window |
//!
//! A timestamp leaves the window once it is exactly `window` old, so the
//! window covers `(now - window, now]`. Pruning is lazy and happens on every
//! read and write.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::{elapsed_between, lock, to_delta, Clock};
use crate::error::ApiError;

/// Limiter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Quota per window. Zero blocks every request.
    pub max_requests: u32,
    pub window: Duration,
    /// Fraction of the quota at which soft delays begin, in `(0, 1]`.
    pub throttle_threshold: f64,
    /// Delay applied when the window is one request short of the quota.
    pub max_throttle_delay: Duration,
    /// How many times [`RateLimiter::wait_if_needed`] sleeps on a hard block
    /// before giving up.
    pub max_wait_rounds: u32,
}

impl Default for RateLimitConfig {
    /// ITGlue's published quota: 3000 requests per 5 minutes.
    fn default() -> Self {
        Self {
            max_requests: 3000,
            window: Duration::from_secs(300),
            throttle_threshold: 0.8,
            max_throttle_delay: Duration::from_secs(2),
            max_wait_rounds: 16,
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Proceed,
    /// Allowed, but the caller should wait this long first.
    Throttle(Duration),
    /// Quota exhausted; a slot frees up after this long.
    Blocked(Duration),
}

impl RateDecision {
    pub fn should_proceed(&self) -> bool {
        !matches!(self, RateDecision::Blocked(_))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            RateDecision::Proceed => None,
            RateDecision::Throttle(d) | RateDecision::Blocked(d) => Some(*d),
        }
    }
}

/// Shared sliding-window limiter.
///
/// Share one instance (behind an `Arc`) between every caller that draws on
/// the same quota. Check-and-record in [`wait_if_needed`](Self::wait_if_needed)
/// happens under a single lock, so concurrent callers never exceed the quota
/// in aggregate.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = (config.max_requests as usize).min(4096);
        Self {
            config,
            clock,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request may be sent now, without recording it.
    pub fn check_rate_limit(&self) -> RateDecision {
        let now = self.clock.now();
        let mut window = lock(&self.window);
        self.prune(&mut window, now);
        self.decide(&window, now)
    }

    /// Record a request that was actually sent.
    pub fn record_request(&self) {
        let now = self.clock.now();
        let mut window = lock(&self.window);
        self.prune(&mut window, now);
        window.push_back(now);
    }

    /// Number of requests inside the trailing window.
    pub fn request_count(&self) -> usize {
        let now = self.clock.now();
        let mut window = lock(&self.window);
        self.prune(&mut window, now);
        window.len()
    }

    /// Forget every recorded request.
    pub fn reset(&self) {
        lock(&self.window).clear();
    }

    /// Wait until a request may be sent, then record it.
    ///
    /// Throttled callers reserve their slot before sleeping the soft delay,
    /// so the slot cannot be taken by another caller meanwhile. Blocked
    /// callers sleep until the oldest request expires and check again, since
    /// a concurrent caller may claim the freed slot first. After
    /// `max_wait_rounds` blocked sleeps this gives up with
    /// [`ApiError::RateLimited`]. A zero quota fails at once.
    ///
    /// Returns the total time spent waiting.
    pub async fn wait_if_needed(&self) -> Result<Duration, ApiError> {
        if self.config.max_requests == 0 {
            warn!("rate limit quota is zero; no request can be sent");
            return Err(ApiError::RateLimited {
                attempts: 1,
                retry_after: None,
            });
        }

        let mut waited = Duration::ZERO;
        let mut rounds = 0u32;

        loop {
            let decision = {
                let now = self.clock.now();
                let mut window = lock(&self.window);
                self.prune(&mut window, now);
                let decision = self.decide(&window, now);
                if decision.should_proceed() {
                    window.push_back(now);
                }
                decision
            };

            match decision {
                RateDecision::Proceed => return Ok(waited),
                RateDecision::Throttle(delay) => {
                    if !delay.is_zero() {
                        debug!(delay_ms = delay.as_millis() as u64, "throttling request");
                        self.clock.sleep(delay).await;
                        waited += delay;
                    }
                    return Ok(waited);
                }
                RateDecision::Blocked(wait) => {
                    if rounds >= self.config.max_wait_rounds {
                        warn!(
                            rounds,
                            max_requests = self.config.max_requests,
                            "rate limit still exhausted; giving up"
                        );
                        return Err(ApiError::RateLimited {
                            attempts: rounds + 1,
                            retry_after: Some(wait),
                        });
                    }
                    rounds += 1;
                    warn!(
                        wait_ms = wait.as_millis() as u64,
                        round = rounds,
                        "rate limit reached; waiting for window slot"
                    );
                    self.clock.sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    fn prune(&self, window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        // A window reaching past the earliest representable time never expires anything.
        let Some(cutoff) = now.checked_sub_signed(to_delta(self.config.window)) else {
            return;
        };
        while let Some(&oldest) = window.front() {
            if oldest <= cutoff {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn decide(&self, window: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> RateDecision {
        let count = window.len();
        let max = self.config.max_requests as usize;

        if count >= max {
            let wait = match window.front() {
                Some(&oldest) => oldest
                    .checked_add_signed(to_delta(self.config.window))
                    .map(|frees_at| elapsed_between(now, frees_at))
                    .unwrap_or(self.config.window),
                None => self.config.window,
            };
            return RateDecision::Blocked(wait);
        }

        let threshold_count = self.config.throttle_threshold * max as f64;
        let count = count as f64;
        if count >= threshold_count {
            let band = max as f64 - threshold_count;
            let ratio = if band > 0.0 {
                ((count - threshold_count) / band).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let nanos = self.config.max_throttle_delay.as_nanos() as f64 * ratio;
            return RateDecision::Throttle(Duration::from_nanos(nanos.round() as u64));
        }

        RateDecision::Proceed
    }
}
