//! Clock sources for seed derivation.
//!
//! Derivation mixes the current wall-clock reading into the pulse material.
//! The clock is a trait so tests can pin it.

use chrono::{DateTime, Utc};

/// A source of wall-clock instants.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    /// A clock that always reports `instant`.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// A clock fixed at the Unix epoch, whose serialized form is all zero bytes.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::default())
    }

    /// A clock fixed at `millis` milliseconds after the Unix epoch.
    ///
    /// Returns `None` if the value is outside chrono's representable range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
