//! Time source abstraction so sequencing can run against a fixed clock.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Supplies the current wall-clock instant.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;
}

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// [`TimeSource`] that returns a settable fixed instant.
#[derive(Debug)]
pub struct FakeTimeSource {
    now: Mutex<SystemTime>,
}

impl FakeTimeSource {
    /// Create a clock frozen at `now`.
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Create a clock frozen at `nanos` after the unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self::new(from_nanos(nanos))
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: SystemTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Nanoseconds since the unix epoch. Times before the epoch map to zero.
pub fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Inverse of [`to_nanos`].
pub fn from_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}
