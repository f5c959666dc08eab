//! Injected time sources.
//!
//! The engine never reads the wall clock itself; every step carries its own
//! timestamp. Callers that need to stamp frames use a [`Clock`], which lets
//! tests fast-forward persistence and cooldown windows without sleeping.

use std::cell::Cell;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for stamping frames.
pub trait Clock {
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

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move the clock forward by a (possibly fractional) number of seconds.
    pub fn advance(&self, seconds: f64) {
        self.now.set(offset(self.now.get(), seconds));
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.set(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Elapsed seconds from `earlier` to `later`; negative if `later` precedes it.
pub fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// `at` shifted by a fractional number of seconds, at microsecond resolution.
pub fn offset(at: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    at + Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(1.5);
        assert!((seconds_between(clock.now(), start) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_between_is_signed() {
        let a = DateTime::from_timestamp(100, 0).unwrap();
        let b = DateTime::from_timestamp(90, 0).unwrap();
        assert_eq!(seconds_between(a, b), 10.0);
        assert_eq!(seconds_between(b, a), -10.0);
    }
}
