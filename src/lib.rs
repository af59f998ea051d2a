//! Beacon-Reseeded Random Number Generation
//!
//! A pseudorandom generator that periodically reseeds itself from a public
//! randomness beacon. The generator is a drop-in `RngCore` whose seed is
//! replaced each time the beacon publishes a new pulse, giving externally
//! auditable seed material with no change to calling code.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! beacon → derivation → reseeding → notification
//!                           ↓
//!                 metrics (observability)
//! ```
//!
//! # Design Principles
//!
//! - **Always usable**: draws fall back to an OS-seeded generator until the
//!   first pulse lands
//! - **Short critical sections**: network fetches never happen under a lock
//! - **Explicit failure policy**: halt or retry is configuration, not accident
//! - **No cryptographic claims**: wall-clock time is mixed into derivation;
//!   this is for distribution and auditability, not key generation
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use pulse_reseed::{
//!     beacon::{EntropyPulse, ReplayBeacon},
//!     reseeding::{ReseedConfig, ReseedingGenerator},
//! };
//!
//! let beacon = ReplayBeacon::new(vec![EntropyPulse::new(
//!     "0123456789abcdef0123456789abcdef",
//!     Duration::from_secs(60),
//! )]);
//!
//! let generator = ReseedingGenerator::<rand_chacha::ChaCha20Rng>::builder(beacon)
//!     .config(ReseedConfig::default())
//!     .on_pulse(|event| println!("reseeded with {}", event.seed))
//!     .create();
//!
//! let roll = generator.next_range(1, 7);
//! println!("ready={} roll={}", generator.is_ready(), roll);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod beacon;
pub mod derivation;
pub mod metrics;
pub mod reseeding;

// Re-export commonly used types at crate root
pub use beacon::{BeaconClient, BeaconError, EntropyPulse, ReplayBeacon};
pub use derivation::{derive, derive_with_clock, Clock, DerivationError, DerivedSeed};
pub use reseeding::{
    FailurePolicy, GeneratorHandle, PulseEvent, ReseedConfig, ReseedingGenerator, SentinelState,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
