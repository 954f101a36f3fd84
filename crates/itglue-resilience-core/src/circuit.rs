//! Three-state circuit breaker.
//!
//! ```text
//!            failures ≥ threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │  ▲
//!     │ successes ≥ half_open_attempts │  │ any failure
//!     │                cooldown elapsed▼  │
//!     └────────────────────────────── HalfOpen
//! ```
//!
//! Time-based transitions are evaluated lazily: the Open → HalfOpen move
//! happens inside [`CircuitBreaker::is_open`], never on a timer.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{elapsed_between, lock, Clock};

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is allowed.
    pub cooldown: Duration,
    /// Consecutive successes in HalfOpen that close the circuit.
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Point-in-time view of the breaker, for logs and status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub forced: bool,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
    /// Set by [`CircuitBreaker::open`]; suppresses the cooldown probe.
    forced: bool,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            forced: false,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gate checked before every attempt.
    ///
    /// In Open, once `cooldown` has passed since the last failure, this moves
    /// the breaker to HalfOpen and returns `false`, letting the caller through
    /// as a probe. A breaker forced open with [`open`](Self::open) stays open
    /// until [`close`](Self::close) or [`reset`](Self::reset).
    pub fn is_open(&self) -> bool {
        let now = self.clock.now();
        let mut inner = lock(&self.inner);
        if inner.state != CircuitState::Open {
            return false;
        }
        if inner.forced {
            return true;
        }

        let cooled_down = inner
            .last_failure
            .map(|t| elapsed_between(t, now) >= self.config.cooldown)
            .unwrap_or(true);
        if cooled_down {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!("circuit breaker half-open; allowing probe");
            false
        } else {
            true
        }
    }

    pub fn record_success(&self) {
        let mut inner = lock(&self.inner);
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_attempts {
                    *inner = Inner::closed();
                    info!("circuit breaker closed; dependency recovered");
                }
            }
            // A response that started before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = lock(&self.inner);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.failure_count,
                        cooldown_secs = self.config.cooldown.as_secs_f64(),
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!("probe failed; circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit open until [`close`](Self::close) or [`reset`](Self::reset).
    pub fn open(&self) {
        let now = self.clock.now();
        let mut inner = lock(&self.inner);
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.last_failure = Some(now);
        inner.forced = true;
        warn!("circuit breaker forced open");
    }

    /// Force the circuit closed, clearing the counters.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.forced = false;
        info!("circuit breaker forced closed");
    }

    /// Return to the initial state.
    pub fn reset(&self) {
        *lock(&self.inner) = Inner::closed();
    }

    pub fn state(&self) -> CircuitState {
        lock(&self.inner).state
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.inner).failure_count
    }

    /// Time left before an Open breaker allows a probe. `None` unless Open
    /// under the automatic cooldown.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = lock(&self.inner);
        if inner.state != CircuitState::Open || inner.forced {
            return None;
        }
        let elapsed = inner
            .last_failure
            .map(|t| elapsed_between(t, now))
            .unwrap_or(self.config.cooldown);
        Some(self.config.cooldown.saturating_sub(elapsed))
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = lock(&self.inner);
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure: inner.last_failure,
            forced: inner.forced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32, cooldown_secs: u64, probes: u32) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
                half_open_attempts: probes,
            },
            clock.clone(),
        );
        (clock, breaker)
    }

    fn tripped(threshold: u32, cooldown_secs: u64, probes: u32) -> (Arc<ManualClock>, CircuitBreaker) {
        let (clock, breaker) = breaker(threshold, cooldown_secs, probes);
        for _ in 0..threshold {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        (clock, breaker)
    }

    #[test]
    fn stays_closed_below_threshold() {
        let (_clock, breaker) = breaker(3, 30, 2);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn opens_at_threshold() {
        let (_clock, breaker) = breaker(3, 30, 2);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (_clock, breaker) = breaker(3, 30, 2);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn open_before_cooldown_does_not_transition() {
        let (clock, breaker) = tripped(3, 30, 2);
        clock.advance(Duration::from_secs(29));
        assert!(breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.remaining_cooldown(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn cooldown_moves_to_half_open_and_admits_probe() {
        let (clock, breaker) = tripped(3, 30, 2);
        clock.advance(Duration::from_secs(30));
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.remaining_cooldown(), None);
    }

    #[test]
    fn half_open_failure_reopens() {
        let (clock, breaker) = tripped(3, 30, 2);
        clock.advance(Duration::from_secs(30));
        assert!(!breaker.is_open());

        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().success_count, 0);

        // Cooldown restarts from the probe failure.
        clock.advance(Duration::from_secs(10));
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_successes_close() {
        let (clock, breaker) = tripped(3, 30, 2);
        clock.advance(Duration::from_secs(31));
        assert!(!breaker.is_open());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn forced_open_ignores_cooldown_until_closed() {
        let (clock, breaker) = breaker(3, 30, 1);
        breaker.open();
        clock.advance(Duration::from_secs(3600));
        assert!(breaker.is_open());
        assert!(breaker.snapshot().forced);

        breaker.close();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let (_clock, breaker) = tripped(2, 30, 1);
        breaker.reset();
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.last_failure, None);
    }
}
