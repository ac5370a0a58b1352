//! Time utilities, timing constants and the injectable clock.

use chrono::{DateTime, Duration, Utc};
use std::fmt::Debug;

/// Timing constants.
pub mod constants {
    use super::Duration;

    /// Freshness window for cached exchange rates (30 minutes).
    pub fn rate_cache_ttl() -> Duration {
        Duration::minutes(30)
    }

    /// Bound on a single upstream rate fetch (10 seconds).
    pub fn rate_fetch_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// How long an issued quote may be committed (15 minutes).
    pub fn quote_validity() -> Duration {
        Duration::minutes(15)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<Timestamp>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::starting_now();
        let start = clock.now();

        clock.advance(Duration::minutes(29));
        assert_eq!(clock.now() - start, Duration::minutes(29));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_negative_duration_as_std_is_zero() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            constants::rate_fetch_timeout().as_std(),
            std::time::Duration::from_secs(10)
        );
    }
}
