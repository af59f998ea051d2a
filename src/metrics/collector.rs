//! Metrics collection and registry.

use crate::reseeding::ReseedStats;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of generator state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether at least one pulse has been applied.
    pub ready: bool,
    /// Total pulses applied.
    pub reseed_count: u64,
    /// Total failed fetches (including malformed pulses).
    pub fetch_failures: u64,
    /// Notifications the dispatcher refused.
    pub notifications_dropped: u64,
    /// Numeric sentinel state (see `SentinelState::code`).
    pub sentinel_state: i64,
    /// Seed derived from the latest pulse.
    pub last_seed: Option<i32>,
}

impl From<&ReseedStats> for MetricsSnapshot {
    fn from(stats: &ReseedStats) -> Self {
        Self {
            ready: stats.ready,
            reseed_count: stats.reseed_count,
            fetch_failures: stats.fetch_failures,
            notifications_dropped: stats.notifications_dropped,
            sentinel_state: stats.state.code(),
            last_seed: stats.last_seed,
        }
    }
}

/// Prometheus metrics registry for reseed monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    ready: IntGauge,
    sentinel_state: IntGauge,
    last_seed: IntGauge,

    reseed_total: IntCounter,
    fetch_failures_total: IntCounter,
    notifications_dropped_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all reseed metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let ready = IntGauge::new(
            "pulse_reseed_ready",
            "Whether a beacon pulse has been applied (1=ready, 0=fallback)",
        )?;
        let sentinel_state = IntGauge::new(
            "pulse_reseed_sentinel_state",
            "Sentinel state (0=stopped, 1=starting, 2=polling, 3=reseeding, 4=faulted)",
        )?;
        let last_seed = IntGauge::new(
            "pulse_reseed_last_seed",
            "Seed derived from the most recent pulse",
        )?;
        let reseed_total = IntCounter::new(
            "pulse_reseed_reseed_total",
            "Total number of pulses applied",
        )?;
        let fetch_failures_total = IntCounter::new(
            "pulse_reseed_fetch_failures_total",
            "Total number of failed pulse fetches",
        )?;
        let notifications_dropped_total = IntCounter::new(
            "pulse_reseed_notifications_dropped_total",
            "Total pulse notifications dropped by the dispatcher",
        )?;

        registry.register(Box::new(ready.clone()))?;
        registry.register(Box::new(sentinel_state.clone()))?;
        registry.register(Box::new(last_seed.clone()))?;
        registry.register(Box::new(reseed_total.clone()))?;
        registry.register(Box::new(fetch_failures_total.clone()))?;
        registry.register(Box::new(notifications_dropped_total.clone()))?;

        Ok(Self {
            registry,
            ready,
            sentinel_state,
            last_seed,
            reseed_total,
            fetch_failures_total,
            notifications_dropped_total,
        })
    }

    /// Updates all metrics from a snapshot of generator state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.ready.set(i64::from(snapshot.ready));
        self.sentinel_state.set(snapshot.sentinel_state);
        if let Some(seed) = snapshot.last_seed {
            self.last_seed.set(i64::from(seed));
        }

        // Counters only move forward; apply the difference.
        advance(&self.reseed_total, snapshot.reseed_count);
        advance(&self.fetch_failures_total, snapshot.fetch_failures);
        advance(&self.notifications_dropped_total, snapshot.notifications_dropped);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
