//! # Meetreg Testing
//!
//! Testing utilities and helpers for the meet registration engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - A Given-When-Then harness for reducers (`ReducerTest`)
//! - Assertion helpers for effects
//! - One-shot tracing setup for integration tests
//!
//! ## Example
//!
//! ```ignore
//! use meetreg_testing::{ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn admission_closes_at_deadline() {
//!     let clock = Arc::new(ManualClock::new(test_clock().now()));
//!     let engine = RegistrationEngine::new(store, clock.clone(), notifier, profiles);
//!
//!     clock.advance(chrono::Duration::days(30));
//!     assert!(engine.admit(event_id, participant_id, form).await.is_err());
//! }
//! ```

use chrono::{DateTime, Utc};
use meetreg_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::RwLock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use meetreg_testing::mocks::FixedClock;
    /// use meetreg_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
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

    /// Clock whose time only moves when a test says so.
    ///
    /// Used to walk a registration window past its early-bird and final
    /// deadlines inside a single test.
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Jump to an absolute instant.
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.write() {
                *guard = time;
            }
        }

        /// Move time forward (or backward, for a negative delta).
        pub fn advance(&self, delta: chrono::Duration) {
            if let Ok(mut guard) = self.time.write() {
                *guard += delta;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .read()
                .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC, the instant every test scenario starts from.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Test helpers and utilities
pub mod helpers {
    use std::sync::Once;

    static TRACING: Once = Once::new();

    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; defaults to `warn` so passing tests stay quiet.
    pub fn init_test_tracing() {
        TRACING.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        });
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(test_epoch());
        clock.advance(chrono::Duration::days(2));
        assert_eq!(clock.now(), test_epoch() + chrono::Duration::days(2));

        clock.set(test_epoch());
        assert_eq!(clock.now(), test_epoch());
    }
}
