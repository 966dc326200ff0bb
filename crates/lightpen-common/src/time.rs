//! Microsecond timestamps and the clock abstraction used by edge handlers.
//!
//! Edge handlers stamp every event with wall-clock microseconds
//! (`seconds * 1_000_000 + nanos / 1_000`), so all offsets and intervals
//! in the workspace are plain `i64` microsecond differences.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microsecond timestamp of an edge event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Timestamp zero, also used as "never seen".
    pub const ZERO: Timestamp = Timestamp(0);

    /// Build a timestamp from whole microseconds.
    #[must_use]
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Build a timestamp from a seconds/nanoseconds pair.
    #[must_use]
    pub const fn from_parts(secs: i64, nanos: u32) -> Self {
        Self(secs * 1_000_000 + (nanos / 1_000) as i64)
    }

    /// Raw microsecond value.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Signed difference `self - earlier` in microseconds.
    #[must_use]
    pub const fn micros_since(self, earlier: Timestamp) -> i64 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Timestamp advanced by a duration.
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let us = i64::try_from(d.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(us))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000);
        let micros = self.0.rem_euclid(1_000_000);
        write!(f, "{secs}.{micros:06}")
    }
}

/// Source of edge timestamps.
///
/// Implementations must be callable from any producer thread.
pub trait Clock: Send + Sync {
    /// Current time with microsecond resolution.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock before 1970 maps to a negative timestamp rather than failing.
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp::from_parts(
                i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
                d.subsec_nanos(),
            ),
            Err(e) => {
                let d = e.duration();
                Timestamp(-i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            }
        }
    }
}

/// Manually advanced clock for simulation and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now_us: AtomicI64::new(start.0),
        }
    }

    /// Set the current time.
    pub fn set(&self, t: Timestamp) {
        self.now_us.store(t.0, Ordering::Release);
    }

    /// Advance the clock by `us` microseconds and return the new time.
    pub fn advance_micros(&self, us: i64) -> Timestamp {
        Timestamp(self.now_us.fetch_add(us, Ordering::AcqRel) + us)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now_us.load(Ordering::Acquire))
    }
}
