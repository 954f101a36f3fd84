//! Wall-clock time source backed by tokio.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use itglue_resilience_core::Clock;

/// [`Clock`] implementation used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_advances_wall_clock() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(20)).await;
        let after = clock.now();
        assert!(after - before >= chrono::TimeDelta::milliseconds(20));
    }
}
