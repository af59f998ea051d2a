//! Randomness beacon access.
//!
//! The beacon is the external source of true-random pulses. This module
//! defines the pulse record and the client trait the reseeding sentinel
//! polls; transport is left to implementors.

mod client;
mod pulse;

pub use client::{BeaconClient, BeaconError, FailingBeacon, ReplayBeacon};
pub(crate) use pulse::duration_millis;
pub use pulse::{EntropyPulse, PulseMetadata};
