//! Time source abstraction.
//!
//! The deployment never calls `Utc::now()` directly. All timestamps (registration
//! writes, `started_on`, `stopped_on`, event times) come from an injected [`Clock`],
//! which keeps tests deterministic.

use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Stores microseconds since the Unix epoch so it can be shared across threads
/// without locking.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    /// Move the clock by `by`, stopping at the earliest or latest representable instant.
    pub fn advance(&self, by: Duration) {
        let step = by
            .num_microseconds()
            .unwrap_or(if by < Duration::zero() { i64::MIN } else { i64::MAX });
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp_micros();
        let latest = DateTime::<Utc>::MAX_UTC.timestamp_micros();
        // The closure always returns `Some`, so the update cannot fail
        let _ = self
            .micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |micros| {
                Some(micros.saturating_add(step).clamp(earliest, latest))
            });
    }

    /// Jump to an arbitrary instant.
    pub fn set(&self, to: DateTime<Utc>) {
        self.micros.store(to.timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}
