//! Seed derivation from beacon output.
//!
//! This module turns the hex output of an entropy pulse into a
//! non-negative 32-bit generator seed, plus a trace of the intermediate
//! mix values for diagnostics.

mod clock;
mod seed;

pub use clock::{Clock, FixedClock, SystemClock};
pub use seed::{derive, derive_with_clock, DerivationError, DerivedSeed, MIN_PULSE_LEN};
