//! Deterministic timing for control code.
//!
//! Control code that measures time by the wall clock would diverge on
//! replay. [`CycleTimer`] measures against a [`TimeSource`] instead, usually
//! the [`CycleLogger`](crate::logger::CycleLogger), whose timestamp is the
//! recorded one during replay.

use std::fmt;
use std::time::Duration;

use cyclelog_types::{LogTable, Snapshot};

use crate::logger::CycleLogger;

/// Anything that can report the current cycle timestamp.
pub trait TimeSource {
    /// The current cycle timestamp.
    fn now(&self) -> Duration;
}

impl TimeSource for CycleLogger {
    fn now(&self) -> Duration {
        self.timestamp()
    }
}

impl TimeSource for LogTable {
    fn now(&self) -> Duration {
        self.timestamp()
    }
}

impl TimeSource for Snapshot {
    fn now(&self) -> Duration {
        self.timestamp()
    }
}

impl TimeSource for Duration {
    fn now(&self) -> Duration {
        *self
    }
}

/// A stopwatch driven by cycle timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTimer {
    start: Duration,
}

impl CycleTimer {
    /// Start a timer at the source's current timestamp.
    pub fn new(source: &impl TimeSource) -> Self {
        Self {
            start: source.now(),
        }
    }

    /// Restart the timer at the source's current timestamp.
    pub fn reset(&mut self, source: &impl TimeSource) {
        self.start = source.now();
    }

    /// Timestamp the timer was started at.
    pub const fn started_at(&self) -> Duration {
        self.start
    }

    /// Time elapsed since the timer started. Zero if the source went
    /// backwards (a new run started).
    pub fn elapsed(&self, source: &impl TimeSource) -> Duration {
        source.now().saturating_sub(self.start)
    }

    /// Elapsed time in seconds.
    pub fn seconds(&self, source: &impl TimeSource) -> f64 {
        self.elapsed(source).as_secs_f64()
    }

    /// Elapsed time in whole milliseconds.
    pub fn milliseconds(&self, source: &impl TimeSource) -> u128 {
        self.elapsed(source).as_millis()
    }

    /// Elapsed time in whole nanoseconds.
    pub fn nanoseconds(&self, source: &impl TimeSource) -> u128 {
        self.elapsed(source).as_nanos()
    }

    /// A displayable reading of the timer against `source`.
    pub fn reading(&self, source: &impl TimeSource) -> Reading {
        Reading(self.elapsed(source))
    }
}

/// Elapsed time formatted as `"<seconds> seconds"` with four decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading(pub Duration);

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} seconds", self.0.as_secs_f64())
    }
}
