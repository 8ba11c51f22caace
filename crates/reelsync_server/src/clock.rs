//! Authoritative server clock.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum spacing between two issued timestamps.
const TICK_EPSILON: f64 = 1e-6;

/// Source of wall-clock time, injectable for tests.
pub trait TimeSource: Send + Sync {
    /// Returns the current time as Unix seconds.
    fn now(&self) -> f64;
}

/// System wall clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A manually-advanced time source for tests.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<f64>,
}

impl ManualTimeSource {
    /// Creates a manual source at the given time.
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advances the clock by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

/// The server's authoritative timestamp generator.
///
/// Every committed action receives a timestamp from `next()`, which is
/// guaranteed strictly greater than any previously issued timestamp even if
/// the wall clock stalls or steps backwards. That makes `last_modified`
/// agree with commit order, which is the property last-write-wins depends
/// on.
pub struct ServerClock {
    source: Box<dyn TimeSource>,
    last_issued: Mutex<f64>,
}

impl ServerClock {
    /// Creates a clock over the system time source.
    pub fn system() -> Self {
        Self::with_source(Box::new(SystemTimeSource))
    }

    /// Creates a clock over a custom time source.
    pub fn with_source(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            last_issued: Mutex::new(0.0),
        }
    }

    /// Reads the wall clock without issuing a timestamp.
    pub fn now(&self) -> f64 {
        self.source.now()
    }

    /// Issues the next authoritative timestamp.
    pub fn next(&self) -> f64 {
        let mut last = self.last_issued.lock();
        let now = self.source.now();
        let issued = if now > *last { now } else { *last + TICK_EPSILON };
        *last = issued;
        issued
    }
}
