//! Mock implementations of environment traits.

use chrono::{DateTime, Utc};
use evently_core::clock::Clock;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making timestamps reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock pinned to the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Manually advanced clock for tests that need time to pass.
#[derive(Debug)]
pub struct ManualClock {
    time: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: std::sync::Mutex::new(start),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self
            .time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
