//! Time sources for lifecycle timestamps.
//!
//! The store never reads the system time directly. It asks a [`Clock`],
//! which lets tests pin timestamps and step them deterministically.

use crate::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of Unix timestamps in whole seconds.
pub trait Clock: Send + Sync + Debug {
    /// Current time in seconds since the epoch.
    fn now(&self) -> Timestamp;

    /// Current time in milliseconds since the epoch. Used for id entropy.
    fn now_millis(&self) -> i64 {
        self.now() * 1000
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }

    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned at `seconds`.
    pub fn new(seconds: Timestamp) -> Self {
        Self {
            seconds: AtomicI64::new(seconds),
        }
    }

    /// Move the clock forward and return the new time.
    pub fn advance(&self, seconds: i64) -> Timestamp {
        self.seconds.fetch_add(seconds, Ordering::SeqCst) + seconds
    }

    /// Jump to an absolute time.
    pub fn set(&self, seconds: Timestamp) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.seconds.load(Ordering::SeqCst)
    }
}
