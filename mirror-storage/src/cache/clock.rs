//! Time source for freshness decisions.
//!
//! The store stamps `last_written` and the read-through layer computes ages
//! from the same [`Clock`], so tests can move time forward without sleeping.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mirror_core::Timestamp;

/// Source of "now" for the cache.
pub trait Clock: Send + Sync + fmt::Debug {
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

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    /// Start at the current wall-clock time, truncated to the millisecond
    /// precision entries are stored with.
    pub fn new() -> Self {
        let now = Utc::now();
        let start = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta =
            chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        // A timestamp is always valid, so a panicked writer leaves nothing to repair.
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Non-negative elapsed time between two instants.
///
/// A `since` in the future (clock skew, hand-edited files) counts as zero.
pub fn elapsed_between(since: Timestamp, now: Timestamp) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
