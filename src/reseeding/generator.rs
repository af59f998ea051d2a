//! Beacon-reseeded generator handle.
//!
//! Wraps any `RngCore + SeedableRng` generator and replaces it each time
//! the sentinel applies a new pulse. Draws and swaps share one data lock,
//! so every draw sees a single generator instance from start to finish.
//!
//! # Locking Model
//!
//! - Data lock: active generator, fallback generator, latest pulse. Held
//!   for one draw or one swap, never across a fetch.
//! - Lifecycle lock: sentinel state, running flag, cancel signal, worker
//!   handle. Held only for start/stop bookkeeping.
//!
//! Before the first pulse lands, draws are answered by a fallback seeded
//! from OS entropy, so the handle is always usable.

use super::config::ReseedConfig;
use super::notify::{Dispatcher, Notifier, PulseEvent, Subscriber};
use super::sentinel::{self, Lifecycle, SentinelState};
use crate::beacon::{BeaconClient, EntropyPulse};
use crate::derivation::{Clock, DerivedSeed, SystemClock};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Interval at which `wait_until_ready` rechecks readiness.
const READY_POLL: Duration = Duration::from_millis(1);

/// State guarded by the data lock.
struct DataState<G> {
    active: Option<G>,
    fallback: G,
    latest: Option<Arc<EntropyPulse>>,
    applied_at: Option<DateTime<Utc>>,
    derived: Option<DerivedSeed>,
    reseed_count: u64,
}

/// State shared between handles and the sentinel thread.
pub(crate) struct Shared<G> {
    data: Mutex<DataState<G>>,
    lifecycle: Mutex<Lifecycle>,
    notifier: Notifier<G>,
    clock: Arc<dyn Clock>,
    fetch_failures: AtomicU64,
}

impl<G> Shared<G> {
    fn lock_data(&self) -> MutexGuard<'_, DataState<G>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn enter_loop(&self) {
        let mut lifecycle = self.lock_lifecycle();
        lifecycle.running = true;
        lifecycle.state = SentinelState::Polling;
    }

    pub(crate) fn exit_loop(&self, state: SentinelState) {
        let mut lifecycle = self.lock_lifecycle();
        lifecycle.running = false;
        lifecycle.state = state;
    }

    fn set_state(&self, state: SentinelState) {
        self.lock_lifecycle().state = state;
    }

    pub(crate) fn record_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl<G> Shared<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    /// Swaps in a generator built from `derived` and notifies subscribers.
    pub(crate) fn apply(self: &Arc<Self>, pulse: EntropyPulse, derived: DerivedSeed) {
        self.set_state(SentinelState::Reseeding);

        let seed = derived.seed();
        let fresh = G::seed_from_u64(seed as u64);
        let pulse = Arc::new(pulse);
        let applied_at = self.clock.now();

        let reseed_count = {
            let mut data = self.lock_data();
            data.active = Some(fresh);
            data.latest = Some(Arc::clone(&pulse));
            data.applied_at = Some(applied_at);
            data.derived = Some(derived);
            data.reseed_count += 1;
            data.reseed_count
        };

        tracing::info!(
            reseed_count,
            seed,
            pulse_index = pulse.metadata().pulse_index,
            period_ms = pulse.period().as_millis() as u64,
            "Generator reseeded from beacon pulse"
        );

        self.notifier.publish(PulseEvent {
            pulse,
            seed,
            generator: GeneratorHandle {
                shared: Arc::clone(self),
            },
        });

        self.set_state(SentinelState::Polling);
    }
}

/// Point-in-time counters for a reseeding generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReseedStats {
    /// Whether a pulse has been applied.
    pub ready: bool,
    /// Pulses applied since construction.
    pub reseed_count: u64,
    /// Failed fetches, including malformed pulses.
    pub fetch_failures: u64,
    /// Notifications the dispatcher refused.
    pub notifications_dropped: u64,
    /// Current sentinel state.
    pub state: SentinelState,
    /// Seed derived from the latest pulse.
    pub last_seed: Option<i32>,
}

/// A cloneable, draw-only view of a reseeding generator.
///
/// Handles never own the sentinel; dropping one has no effect on polling.
pub struct GeneratorHandle<G = ChaCha20Rng> {
    shared: Arc<Shared<G>>,
}

impl<G> Clone for GeneratorHandle<G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<G: RngCore> GeneratorHandle<G> {
    /// Runs `f` against the active generator (or the fallback) under the
    /// data lock.
    fn with_active<R>(&self, f: impl FnOnce(&mut G) -> R) -> R {
        let mut data = self.shared.lock_data();
        let DataState {
            active, fallback, ..
        } = &mut *data;
        match active {
            Some(generator) => f(generator),
            None => f(fallback),
        }
    }

    /// A non-negative value in `[0, i32::MAX)`.
    pub fn next(&self) -> i32 {
        self.with_active(|g| g.gen_range(0..i32::MAX))
    }

    /// A value in `[0, max)`; `0` when `max` is zero.
    ///
    /// # Panics
    ///
    /// Panics if `max` is negative.
    pub fn next_max(&self, max: i32) -> i32 {
        assert!(max >= 0, "max must be non-negative, got {max}");
        self.next_range(0, max)
    }

    /// A value in `[min, max)`; `min` when the bounds are equal.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn next_range(&self, min: i32, max: i32) -> i32 {
        assert!(min <= max, "min ({min}) must not exceed max ({max})");
        if min == max {
            return min;
        }
        self.with_active(|g| g.gen_range(min..max))
    }

    /// A non-negative value in `[0, i64::MAX)`.
    pub fn next_i64(&self) -> i64 {
        self.with_active(|g| g.gen_range(0..i64::MAX))
    }

    /// A value in `[0, max)`; `0` when `max` is zero.
    ///
    /// # Panics
    ///
    /// Panics if `max` is negative.
    pub fn next_i64_max(&self, max: i64) -> i64 {
        assert!(max >= 0, "max must be non-negative, got {max}");
        self.next_i64_range(0, max)
    }

    /// A value in `[min, max)`; `min` when the bounds are equal.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn next_i64_range(&self, min: i64, max: i64) -> i64 {
        assert!(min <= max, "min ({min}) must not exceed max ({max})");
        if min == max {
            return min;
        }
        self.with_active(|g| g.gen_range(min..max))
    }

    /// A value in `[0.0, 1.0)`.
    pub fn next_double(&self) -> f64 {
        self.with_active(|g| g.gen::<f64>())
    }

    /// A value in `[0.0, 1.0)`.
    pub fn next_float(&self) -> f32 {
        self.with_active(|g| g.gen::<f32>())
    }

    /// Fills `buf` with random bytes from a single generator instance.
    pub fn next_bytes(&self, buf: &mut [u8]) {
        self.with_active(|g| g.fill_bytes(buf))
    }

    /// True once at least one pulse has been applied.
    pub fn is_ready(&self) -> bool {
        self.shared.lock_data().active.is_some()
    }

    /// The most recently applied pulse.
    pub fn latest_pulse(&self) -> Option<Arc<EntropyPulse>> {
        self.shared.lock_data().latest.clone()
    }

    /// When the most recent pulse was applied, by the generator's clock.
    pub fn last_pulse_time(&self) -> Option<DateTime<Utc>> {
        self.shared.lock_data().applied_at
    }

    /// Seed and trace derived from the most recent pulse.
    pub fn last_derived_seed(&self) -> Option<DerivedSeed> {
        self.shared.lock_data().derived.clone()
    }

    /// Number of pulses applied so far.
    pub fn reseed_count(&self) -> u64 {
        self.shared.lock_data().reseed_count
    }

    /// Current state of the background sentinel.
    pub fn sentinel_state(&self) -> SentinelState {
        self.shared.lock_lifecycle().state
    }

    /// Snapshot of counters for logging and metrics export.
    pub fn stats(&self) -> ReseedStats {
        let (ready, reseed_count, last_seed) = {
            let data = self.shared.lock_data();
            (
                data.active.is_some(),
                data.reseed_count,
                data.derived.as_ref().map(DerivedSeed::seed),
            )
        };
        ReseedStats {
            ready,
            reseed_count,
            fetch_failures: self.shared.fetch_failures.load(Ordering::Relaxed),
            notifications_dropped: self.shared.notifier.dropped(),
            state: self.sentinel_state(),
            last_seed,
        }
    }
}

impl<G: RngCore> RngCore for GeneratorHandle<G> {
    fn next_u32(&mut self) -> u32 {
        self.with_active(|g| g.next_u32())
    }

    fn next_u64(&mut self) -> u64 {
        self.with_active(|g| g.next_u64())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.with_active(|g| g.fill_bytes(dest))
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.with_active(|g| g.try_fill_bytes(dest))
    }
}

/// A generator that reseeds itself from a randomness beacon.
///
/// Owns the background sentinel: dropping the generator stops the
/// sentinel and waits for its thread to exit. All draw methods are
/// available through [`GeneratorHandle`] via `Deref`.
pub struct ReseedingGenerator<G = ChaCha20Rng>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    handle: GeneratorHandle<G>,
    client: Arc<dyn BeaconClient>,
    config: ReseedConfig,
}

impl<G> ReseedingGenerator<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    /// Starts polling `client` and waits up to `config.ready_timeout` for
    /// the first pulse.
    ///
    /// The returned generator is usable even if no pulse arrived in time.
    pub fn create(client: impl BeaconClient, config: ReseedConfig) -> Self {
        Self::builder(client).config(config).create()
    }

    /// Starts building a generator that polls `client`.
    pub fn builder(client: impl BeaconClient) -> ReseedingGeneratorBuilder<G> {
        ReseedingGeneratorBuilder::new(client)
    }

    /// A draw-only handle sharing this generator's state.
    pub fn handle(&self) -> GeneratorHandle<G> {
        self.handle.clone()
    }

    /// Registers a callback run once per applied pulse.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&PulseEvent<G>) + Send + Sync + 'static,
    {
        self.handle.shared.notifier.subscribe(Arc::new(callback));
    }

    /// Starts the sentinel. Returns false if one is already running or
    /// the config fails validation.
    pub fn start_sentinel(&self) -> bool {
        if let Err(err) = self.config.validate() {
            tracing::error!(error = %err, "Invalid reseed config, sentinel not started");
            return false;
        }

        let shared = &self.handle.shared;
        let mut lifecycle = shared.lock_lifecycle();
        if lifecycle.is_active() {
            return false;
        }

        // A previous loop that halted has already exited; reap it.
        if let Some(stale) = lifecycle.worker.take() {
            join_worker(stale);
        }

        let cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
        match sentinel::spawn(
            Arc::clone(shared),
            Arc::clone(&self.client),
            self.config.clone(),
            Arc::clone(&cancel),
        ) {
            Ok(worker) => {
                lifecycle.state = SentinelState::Starting;
                lifecycle.cancel = cancel;
                lifecycle.worker = Some(worker);
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to spawn sentinel thread");
                false
            }
        }
    }

    /// Stops the sentinel and waits for its thread to exit. Returns false
    /// if none was running.
    pub fn stop_sentinel(&self) -> bool {
        let (was_active, worker) = {
            let mut lifecycle = self.handle.shared.lock_lifecycle();
            let active = lifecycle.is_active();
            if active {
                lifecycle.cancel.store(true, Ordering::SeqCst);
            }
            (active, lifecycle.worker.take())
        };

        if let Some(worker) = worker {
            join_worker(worker);
        }
        if was_active {
            tracing::info!("Sentinel stopped");
        }
        was_active
    }

    /// Blocks until a pulse has been applied, the sentinel has exited, or
    /// `timeout` elapses. Returns whether the generator is ready.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.is_ready() {
                return true;
            }
            if start.elapsed() >= timeout || !self.handle.shared.lock_lifecycle().is_active() {
                return self.is_ready();
            }
            thread::sleep(READY_POLL);
        }
    }
}

fn join_worker(worker: thread::JoinHandle<()>) {
    if worker.thread().id() == thread::current().id() {
        // Stopped from a subscriber running inline; the loop exits on its own.
        return;
    }
    if worker.join().is_err() {
        tracing::warn!("Sentinel thread panicked");
    }
}

impl<G> Deref for ReseedingGenerator<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    type Target = GeneratorHandle<G>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<G> RngCore for ReseedingGenerator<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    fn next_u32(&mut self) -> u32 {
        self.handle.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.handle.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.handle.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.handle.try_fill_bytes(dest)
    }
}

impl<G> Drop for ReseedingGenerator<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    fn drop(&mut self) {
        self.stop_sentinel();
    }
}

/// Builder for [`ReseedingGenerator`].
pub struct ReseedingGeneratorBuilder<G> {
    client: Arc<dyn BeaconClient>,
    config: ReseedConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    subscribers: Vec<Subscriber<G>>,
}

impl<G> ReseedingGeneratorBuilder<G>
where
    G: RngCore + SeedableRng + Send + 'static,
{
    /// Builder with default config and the system clock.
    pub fn new(client: impl BeaconClient) -> Self {
        Self {
            client: Arc::new(client),
            config: ReseedConfig::default(),
            clock: Arc::new(SystemClock),
            dispatcher: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets timing and failure handling.
    pub fn config(mut self, config: ReseedConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock mixed into seed derivation and used for pulse timestamps.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Delivers notifications through `dispatcher` instead of inline.
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Registers a callback before the sentinel can publish anything.
    pub fn on_pulse<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PulseEvent<G>) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(callback));
        self
    }

    /// Builds the generator without starting the sentinel.
    pub fn build(self) -> ReseedingGenerator<G> {
        let shared = Shared {
            data: Mutex::new(DataState {
                active: None,
                fallback: G::from_entropy(),
                latest: None,
                applied_at: None,
                derived: None,
                reseed_count: 0,
            }),
            lifecycle: Mutex::new(Lifecycle::new()),
            notifier: Notifier::new(self.subscribers, self.dispatcher),
            clock: self.clock,
            fetch_failures: AtomicU64::new(0),
        };

        ReseedingGenerator {
            handle: GeneratorHandle {
                shared: Arc::new(shared),
            },
            client: self.client,
            config: self.config,
        }
    }

    /// Builds the generator, starts the sentinel and waits for the first
    /// pulse (see [`ReseedingGenerator::create`]).
    pub fn create(self) -> ReseedingGenerator<G> {
        let generator = self.build();
        generator.start_sentinel();

        let timeout = generator.config.ready_timeout;
        if !generator.wait_until_ready(timeout) {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                state = ?generator.sentinel_state(),
                "No pulse applied yet, answering draws from fallback generator"
            );
        }
        generator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{BeaconError, FailingBeacon, PulseMetadata, ReplayBeacon};
    use crate::derivation::FixedClock;
    use crate::reseeding::config::FailurePolicy;
    use crate::reseeding::notify::channel;
    use crossbeam_channel::{Receiver, Sender};
    use std::sync::atomic::AtomicUsize;

    /// Serves an endless sequence of numbered pulses, optionally failing
    /// the first few fetches.
    struct SequenceBeacon {
        period: Duration,
        fail_first: usize,
        fetches: AtomicUsize,
    }

    impl SequenceBeacon {
        fn new(period: Duration) -> Self {
            Self {
                period,
                fail_first: 0,
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing_first(mut self, count: usize) -> Self {
            self.fail_first = count;
            self
        }
    }

    impl BeaconClient for SequenceBeacon {
        fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(BeaconError::Unavailable(format!("scripted failure {n}")));
            }
            let index = (n - self.fail_first) as u64;
            let output = format!(
                "{:016x}{:016x}",
                index,
                index.wrapping_mul(0x9e37_79b9_7f4a_7c15)
            );
            Ok(EntropyPulse::new(output, self.period).with_metadata(PulseMetadata {
                pulse_index: Some(index),
                ..Default::default()
            }))
        }
    }

    /// Serves the first pulse immediately, then blocks every later fetch
    /// until the test opens the gate.
    struct GatedBeacon {
        fetches: AtomicUsize,
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl BeaconClient for GatedBeacon {
        fn fetch_latest(&self) -> Result<EntropyPulse, BeaconError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                let _ = self.entered.send(());
                let _ = self.gate.recv();
            }
            Ok(EntropyPulse::new(
                format!("{:016x}{:016x}", n, n + 1),
                Duration::from_millis(10),
            ))
        }
    }

    fn fast_config() -> ReseedConfig {
        ReseedConfig {
            ready_timeout: Duration::from_secs(5),
            poll_tick: Duration::from_millis(10),
            failure_policy: FailurePolicy::Halt,
        }
    }

    fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_fallback_answers_before_first_pulse() {
        let generator: ReseedingGenerator =
            ReseedingGenerator::builder(FailingBeacon::new("offline")).build();

        assert!(!generator.is_ready());
        assert_eq!(generator.sentinel_state(), SentinelState::Stopped);
        assert!((0..i32::MAX).contains(&generator.next()));
        assert_eq!(generator.next_range(5, 5), 5);
        assert_eq!(generator.next_max(0), 0);
        assert!((-10..10).contains(&generator.next_range(-10, 10)));
        assert!((0.0..1.0).contains(&generator.next_double()));
        assert!((0.0..1.0).contains(&generator.next_float()));
        assert!((0..1_000).contains(&generator.next_i64_max(1_000)));

        let mut buf = [0u8; 64];
        generator.next_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    #[should_panic(expected = "must not exceed")]
    fn test_inverted_range_panics() {
        let generator: ReseedingGenerator =
            ReseedingGenerator::builder(FailingBeacon::new("offline")).build();
        generator.next_range(10, 1);
    }

    #[test]
    fn test_reseeds_each_period_with_ordered_notifications() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(SequenceBeacon::new(
            Duration::from_millis(200),
        ))
        .config(fast_config())
        .on_pulse(move |event| {
            sink.lock()
                .unwrap()
                .push(event.pulse.metadata().pulse_index.unwrap());
        })
        .create();

        assert!(generator.is_ready());
        thread::sleep(Duration::from_millis(1_000));
        assert!(generator.stop_sentinel());

        let seen = seen.lock().unwrap().clone();
        assert!(seen.len() >= 4, "only {} reseeds", seen.len());
        assert_eq!(generator.reseed_count(), seen.len() as u64);
        assert_eq!(seen[0], 0);
        assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_concurrent_draws_during_reseed() {
        let generator = ReseedingGenerator::<ChaCha20Rng>::create(
            SequenceBeacon::new(Duration::from_millis(5)),
            ReseedConfig {
                poll_tick: Duration::from_millis(1),
                ..fast_config()
            },
        );
        assert!(generator.is_ready());

        let handle = generator.handle();
        thread::scope(|scope| {
            for worker in 0..50 {
                let handle = handle.clone();
                scope.spawn(move || {
                    let mut buf = [0u8; 32];
                    for _ in 0..2_000 {
                        assert!(handle.next() >= 0);
                        let bounded = handle.next_range(worker, worker + 100);
                        assert!((worker..worker + 100).contains(&bounded));
                        assert!((0.0..1.0).contains(&handle.next_double()));
                        handle.next_bytes(&mut buf);
                    }
                });
            }
        });

        assert!(wait_for(Duration::from_secs(2), || generator.reseed_count() > 1));
        assert!(generator.stop_sentinel());
    }

    #[test]
    fn test_stop_then_drop_ends_notifications() {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(SequenceBeacon::new(
            Duration::from_millis(20),
        ))
        .config(fast_config())
        .on_pulse(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .create();
        assert!(generator.is_ready());

        let start = Instant::now();
        assert!(generator.stop_sentinel());
        assert!(!generator.stop_sentinel());
        assert_eq!(generator.sentinel_state(), SentinelState::Stopped);
        drop(generator);
        assert!(start.elapsed() < Duration::from_millis(500));

        let after_stop = notified.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(notified.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_failing_beacon_returns_usable_handle() {
        let start = Instant::now();
        let generator: ReseedingGenerator =
            ReseedingGenerator::create(FailingBeacon::new("offline"), ReseedConfig::default());

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!generator.is_ready());
        assert_eq!(generator.sentinel_state(), SentinelState::Faulted);
        assert!(generator.latest_pulse().is_none());
        assert!(generator.last_pulse_time().is_none());
        assert!(generator.next() >= 0);

        let stats = generator.stats();
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(stats.reseed_count, 0);
        assert!(!stats.ready);
    }

    #[test]
    fn test_malformed_pulse_faults_under_halt() {
        let beacon = ReplayBeacon::new(vec![EntropyPulse::new(
            "not-hex-at-all",
            Duration::from_millis(10),
        )]);
        let generator: ReseedingGenerator = ReseedingGenerator::create(beacon, fast_config());

        assert!(!generator.is_ready());
        assert_eq!(generator.sentinel_state(), SentinelState::Faulted);
        assert_eq!(generator.stats().fetch_failures, 1);
    }

    #[test]
    fn test_retry_policy_recovers_after_failures() {
        let config = ReseedConfig {
            poll_tick: Duration::from_millis(5),
            failure_policy: FailurePolicy::Retry {
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(40),
            },
            ..fast_config()
        };
        let beacon = SequenceBeacon::new(Duration::from_secs(60)).failing_first(3);
        let generator: ReseedingGenerator = ReseedingGenerator::create(beacon, config);

        assert!(generator.is_ready());
        assert_eq!(generator.stats().fetch_failures, 3);
        assert_eq!(generator.reseed_count(), 1);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let generator: ReseedingGenerator =
            ReseedingGenerator::builder(SequenceBeacon::new(Duration::from_millis(50)))
                .config(fast_config())
                .build();

        assert!(!generator.stop_sentinel());
        assert!(generator.start_sentinel());
        assert!(!generator.start_sentinel());
        assert!(generator.wait_until_ready(Duration::from_secs(5)));
        assert!(generator.stop_sentinel());
        assert!(!generator.stop_sentinel());

        // Restart after a clean stop.
        assert!(generator.start_sentinel());
        assert!(wait_for(Duration::from_secs(2), || {
            generator.sentinel_state() != SentinelState::Starting
        }));
        assert!(generator.stop_sentinel());
    }

    #[test]
    fn test_restart_after_fault() {
        let generator: ReseedingGenerator =
            ReseedingGenerator::create(FailingBeacon::new("offline"), fast_config());
        assert_eq!(generator.sentinel_state(), SentinelState::Faulted);

        assert!(generator.start_sentinel());
        assert!(wait_for(Duration::from_secs(2), || {
            generator.sentinel_state() == SentinelState::Faulted
        }));
        assert_eq!(generator.stats().fetch_failures, 2);
    }

    #[test]
    fn test_swapped_generator_uses_derived_seed() {
        let beacon = ReplayBeacon::new(vec![EntropyPulse::new(
            "012345670100010101",
            Duration::from_secs(3600),
        )]);
        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(beacon)
            .config(fast_config())
            .clock(FixedClock::epoch())
            .create();

        let derived = generator.last_derived_seed().unwrap();
        assert_eq!(derived.seed(), 29);
        assert_eq!(generator.last_pulse_time(), Some(DateTime::<Utc>::default()));
        assert_eq!(
            generator.latest_pulse().unwrap().output(),
            "012345670100010101"
        );

        let mut expected = ChaCha20Rng::seed_from_u64(29);
        let mut handle = generator.handle();
        assert_eq!(handle.next_u64(), expected.next_u64());
    }

    #[test]
    fn test_dispatcher_defers_delivery_to_queue() {
        let (dispatcher, queue) = channel(16, Duration::from_millis(10));
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(SequenceBeacon::new(
            Duration::from_secs(60),
        ))
        .config(fast_config())
        .dispatcher(dispatcher)
        .on_pulse(move |event| {
            assert!(event.generator.is_ready());
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .create();

        assert!(generator.is_ready());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(generator.stats().notifications_dropped, 0);
    }

    #[test]
    fn test_undrained_dispatcher_counts_dropped_notifications() {
        let (dispatcher, _queue) = channel(1, Duration::from_millis(1));

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(SequenceBeacon::new(
            Duration::from_millis(5),
        ))
        .config(ReseedConfig {
            poll_tick: Duration::from_millis(5),
            ..fast_config()
        })
        .dispatcher(dispatcher)
        .on_pulse(|_| {})
        .create();

        assert!(wait_for(Duration::from_secs(2), || {
            generator.stats().notifications_dropped > 0
        }));
        assert!(generator.is_ready());
    }

    #[test]
    fn test_subscribe_after_create() {
        let generator = ReseedingGenerator::<ChaCha20Rng>::create(
            SequenceBeacon::new(Duration::from_millis(20)),
            fast_config(),
        );
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        generator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(wait_for(Duration::from_secs(2), || {
            notified.load(Ordering::SeqCst) > 0
        }));
    }

    #[test]
    fn test_zero_poll_tick_refuses_to_start() {
        let start = Instant::now();
        let generator: ReseedingGenerator = ReseedingGenerator::create(
            SequenceBeacon::new(Duration::from_millis(20)),
            ReseedConfig {
                poll_tick: Duration::ZERO,
                ..fast_config()
            },
        );

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!generator.is_ready());
        assert_eq!(generator.sentinel_state(), SentinelState::Stopped);
        assert!(!generator.start_sentinel());
        assert_eq!(generator.reseed_count(), 0);
        assert!(generator.next() >= 0);
    }

    #[test]
    fn test_panicking_subscriber_faults_and_allows_restart() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(SequenceBeacon::new(
            Duration::from_millis(20),
        ))
        .config(fast_config())
        .on_pulse(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("subscriber failure");
            }
        })
        .create();

        assert!(wait_for(Duration::from_secs(2), || {
            generator.sentinel_state() == SentinelState::Faulted
        }));
        assert_eq!(generator.reseed_count(), 1);
        assert!(!generator.handle.shared.lock_lifecycle().running);

        assert!(generator.start_sentinel());
        assert!(wait_for(Duration::from_secs(2), || generator.reseed_count() >= 2));
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(generator.stop_sentinel());
        assert_eq!(generator.sentinel_state(), SentinelState::Stopped);
    }

    #[test]
    fn test_stop_during_fetch_discards_result() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);

        let generator = ReseedingGenerator::<ChaCha20Rng>::builder(GatedBeacon {
            fetches: AtomicUsize::new(0),
            entered: entered_tx,
            gate: gate_rx,
        })
        .config(fast_config())
        .on_pulse(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .create();
        assert!(generator.is_ready());
        let seed = generator.last_derived_seed();

        // Second fetch is now parked inside the beacon.
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let cancel = Arc::clone(&generator.handle.shared.lock_lifecycle().cancel);

        thread::scope(|scope| {
            let stopper = scope.spawn(|| generator.stop_sentinel());
            assert!(wait_for(Duration::from_secs(2), || cancel.load(Ordering::SeqCst)));
            gate_tx.send(()).unwrap();
            assert!(stopper.join().unwrap());
        });

        assert_eq!(generator.sentinel_state(), SentinelState::Stopped);
        assert_eq!(generator.reseed_count(), 1);
        assert_eq!(generator.last_derived_seed(), seed);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }
}
