//! Background polling loop.
//!
//! The sentinel owns the reseed cadence: fetch a pulse, derive a seed,
//! swap the active generator, notify, then sleep for the pulse period in
//! small ticks so a stop request is honored within one tick.

use super::config::{FailurePolicy, ReseedConfig};
use super::generator::Shared;
use crate::beacon::{BeaconClient, BeaconError};
use crate::derivation::derive_with_clock;
use rand_core::{RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of the background sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelState {
    /// No loop is running.
    Stopped,
    /// A loop has been spawned but has not entered its first poll.
    Starting,
    /// Waiting for, or fetching, the next pulse.
    Polling,
    /// Applying a pulse and notifying subscribers.
    Reseeding,
    /// The loop exited after a fetch failure under [`FailurePolicy::Halt`].
    Faulted,
}

impl SentinelState {
    /// Numeric code used by the metrics exporter.
    pub fn code(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Polling => 2,
            Self::Reseeding => 3,
            Self::Faulted => 4,
        }
    }
}

/// Bookkeeping guarded by the lifecycle lock.
pub(crate) struct Lifecycle {
    pub(crate) state: SentinelState,
    /// Set by the loop itself on entry, cleared on exit.
    pub(crate) running: bool,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: SentinelState::Stopped,
            running: false,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// True while a loop is alive or about to be.
    pub(crate) fn is_active(&self) -> bool {
        self.running || self.state == SentinelState::Starting
    }
}

enum Exit {
    Cancelled,
    Faulted,
}

/// Spawns the polling thread.
pub(crate) fn spawn<G>(
    shared: Arc<Shared<G>>,
    client: Arc<dyn BeaconClient>,
    config: ReseedConfig,
    cancel: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    thread::Builder::new()
        .name("pulse-sentinel".into())
        .spawn(move || run(&shared, client.as_ref(), &config, &cancel))
}

fn run<G>(
    shared: &Arc<Shared<G>>,
    client: &dyn BeaconClient,
    config: &ReseedConfig,
    cancel: &AtomicBool,
) where
    G: RngCore + SeedableRng + Send + 'static,
{
    shared.enter_loop();
    let mut guard = ExitGuard {
        shared: &**shared,
        state: SentinelState::Faulted,
    };
    tracing::info!(
        poll_tick_ms = config.poll_tick.as_millis() as u64,
        "Sentinel started"
    );

    guard.state = match poll(shared, client, config, cancel) {
        Exit::Cancelled => SentinelState::Stopped,
        Exit::Faulted => SentinelState::Faulted,
    };
}

/// Clears the running flag when the loop ends, including by unwinding out
/// of a panicking client or subscriber.
struct ExitGuard<'a, G> {
    shared: &'a Shared<G>,
    state: SentinelState,
}

impl<G> Drop for ExitGuard<'_, G> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("Sentinel panicked, marking faulted");
            self.state = SentinelState::Faulted;
        }
        self.shared.exit_loop(self.state);
        tracing::info!(state = ?self.state, "Sentinel exited");
    }
}

fn poll<G>(
    shared: &Arc<Shared<G>>,
    client: &dyn BeaconClient,
    config: &ReseedConfig,
    cancel: &AtomicBool,
) -> Exit
where
    G: RngCore + SeedableRng + Send + 'static,
{
    let mut backoff: Option<Duration> = None;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Exit::Cancelled;
        }

        let fetched = client.fetch_latest().and_then(|pulse| {
            derive_with_clock(pulse.output(), shared.clock())
                .map(|derived| (pulse, derived))
                .map_err(|e| BeaconError::Malformed(e.to_string()))
        });

        if cancel.load(Ordering::SeqCst) {
            tracing::debug!("Stop requested during fetch, discarding result");
            return Exit::Cancelled;
        }

        let wait = match fetched {
            Ok((pulse, derived)) => {
                backoff = None;
                let period = pulse.period();
                shared.apply(pulse, derived);
                period
            }
            Err(err) => {
                shared.record_failure();
                match config.failure_policy {
                    FailurePolicy::Halt => {
                        tracing::warn!(error = %err, "Pulse fetch failed, sentinel halting");
                        return Exit::Faulted;
                    }
                    FailurePolicy::Retry {
                        initial_backoff,
                        max_backoff,
                    } => {
                        let delay =
                            backoff.map_or(initial_backoff, |prev| (prev * 2).min(max_backoff));
                        backoff = Some(delay);
                        tracing::warn!(
                            error = %err,
                            retry_in_ms = delay.as_millis() as u64,
                            "Pulse fetch failed, retrying"
                        );
                        delay
                    }
                }
            }
        };

        if !sleep_ticks(wait.max(config.poll_tick), config.poll_tick, cancel) {
            return Exit::Cancelled;
        }
    }
}

/// Sleeps for `total` in `tick` increments. Returns false if cancelled.
fn sleep_ticks(total: Duration, tick: Duration, cancel: &AtomicBool) -> bool {
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let step = tick.min(total - elapsed);
        thread::sleep(step);
        elapsed += step;
    }
    !cancel.load(Ordering::SeqCst)
}
