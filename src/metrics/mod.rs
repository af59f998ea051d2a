//! Prometheus metrics exporter for reseed monitoring.
//!
//! This module provides observability into the reseeding generator by
//! exposing metrics in Prometheus format via an HTTP endpoint.
//!
//! # Metrics Exposed
//!
//! - `pulse_reseed_ready` - Whether a pulse has been applied (1) or draws come from the fallback (0)
//! - `pulse_reseed_sentinel_state` - Sentinel state code
//! - `pulse_reseed_last_seed` - Seed derived from the latest pulse
//! - `pulse_reseed_reseed_total` - Total pulses applied
//! - `pulse_reseed_fetch_failures_total` - Total failed fetches
//! - `pulse_reseed_notifications_dropped_total` - Notifications refused by the dispatcher
//!
//! # Example
//!
//! ```no_run
//! use pulse_reseed::beacon::FailingBeacon;
//! use pulse_reseed::metrics::{MetricsRegistry, MetricsSnapshot};
//! use pulse_reseed::reseeding::{ReseedConfig, ReseedingGenerator};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let generator: ReseedingGenerator =
//!     ReseedingGenerator::create(FailingBeacon::new("offline"), ReseedConfig::default());
//!
//! registry.update(&MetricsSnapshot::from(&generator.stats()));
//! ```

/// Port the exporter listens on unless configured otherwise.
pub const DEFAULT_METRICS_PORT: u16 = 9464;

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError, SharedMetrics};
