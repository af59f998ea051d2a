//! Beacon-driven generator reseeding.
//!
//! This module provides a generator handle whose underlying PRNG is
//! replaced each time a background sentinel applies a new beacon pulse.

mod config;
mod generator;
mod notify;
mod sentinel;

pub use config::{BeaconConfig, ConfigError, FailurePolicy, FileConfig, OutputConfig, ReseedConfig};
pub use generator::{GeneratorHandle, ReseedStats, ReseedingGenerator, ReseedingGeneratorBuilder};
pub use notify::{
    channel, ChannelDispatcher, DispatchError, DispatchQueue, Dispatcher, Job, PulseEvent,
};
pub use sentinel::SentinelState;
