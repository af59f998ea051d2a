//! Beacon client abstraction.
//!
//! This module provides a trait-based abstraction over the beacon
//! transport, allowing for both live HTTP clients and replayed pulses.

use super::EntropyPulse;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while fetching a pulse.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// The beacon could not be reached or has nothing to serve.
    #[error("beacon unavailable: {0}")]
    Unavailable(String),
    /// A pulse arrived but its output cannot be used.
    #[error("malformed pulse: {0}")]
    Malformed(String),
    /// Reading a pulse file failed.
    #[error("failed to read pulse source: {0}")]
    Io(#[from] std::io::Error),
    /// Pulse JSON did not decode.
    #[error("failed to parse pulse: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Trait for beacon implementations.
///
/// Each call is independent: no session state is assumed to survive
/// between fetches, and a failure says nothing about the next call.
pub trait BeaconClient: Send + Sync + 'static {
    /// Fetches the most recent pulse.
    fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError>;
}

impl<T: BeaconClient + ?Sized> BeaconClient for Arc<T> {
    fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
        (**self).fetch_latest()
    }
}

impl<T: BeaconClient + ?Sized> BeaconClient for Box<T> {
    fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
        (**self).fetch_latest()
    }
}

/// Replays a fixed sequence of pulses, wrapping around at the end.
#[derive(Debug)]
pub struct ReplayBeacon {
    pulses: Vec<EntropyPulse>,
    cursor: AtomicUsize,
}

impl ReplayBeacon {
    /// Replays `pulses` in order. An empty list reports `Unavailable`.
    pub fn new(pulses: Vec<EntropyPulse>) -> Self {
        Self {
            pulses,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Loads pulses from a JSON array file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BeaconError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let pulses = EntropyPulse::list_from_json(&content)?;
        tracing::info!(
            path = %path.as_ref().display(),
            pulses = pulses.len(),
            "Loaded replay pulses"
        );
        Ok(Self::new(pulses))
    }

    /// Number of pulses served so far.
    pub fn served(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl BeaconClient for ReplayBeacon {
    fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
        if self.pulses.is_empty() {
            return Err(BeaconError::Unavailable("replay list is empty".into()));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pulses.len();
        Ok(self.pulses[index].clone())
    }
}

/// A beacon that never answers.
#[derive(Debug, Clone, Default)]
pub struct FailingBeacon {
    reason: String,
}

impl FailingBeacon {
    /// Every fetch fails with `Unavailable(reason)`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl BeaconClient for FailingBeacon {
    fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
        Err(BeaconError::Unavailable(self.reason.clone()))
    }
}
