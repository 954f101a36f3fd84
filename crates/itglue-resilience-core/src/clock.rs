//! Injected time source.
//!
//! Window pruning, cooldown expiry, cache freshness, and every sleep in the
//! retry path read time through a [`Clock`]. Production code uses the
//! tokio-backed `SystemClock` from the app crate; tests use [`ManualClock`].

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

/// A source of wall-clock time plus an async sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// A clock that only moves when told to.
///
/// [`sleep`](Clock::sleep) returns immediately after advancing the clock by
/// the requested duration, and the duration is recorded so tests can assert
/// on backoff schedules.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut now = lock(&self.now);
        *now += to_delta(duration);
    }

    /// Every duration passed to [`sleep`](Clock::sleep), in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }

    pub fn total_slept(&self) -> Duration {
        lock(&self.sleeps).iter().sum()
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// All guarded state in this crate is plain counters and collections that
/// stay consistent between statements, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Time from `earlier` to `later`, saturating at zero.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_sleep_advances_and_records() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.now() - start, TimeDelta::milliseconds(2500));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
        assert_eq!(clock.total_slept(), Duration::from_millis(2500));
    }

    #[test]
    fn advance_does_not_record_sleep() {
        let clock = ManualClock::default();
        clock.advance(Duration::from_secs(60));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn elapsed_saturates_at_zero() {
        let clock = ManualClock::default();
        let earlier = clock.now();
        clock.advance(Duration::from_secs(5));
        let later = clock.now();

        assert_eq!(elapsed_between(earlier, later), Duration::from_secs(5));
        assert_eq!(elapsed_between(later, earlier), Duration::ZERO);
    }
}
