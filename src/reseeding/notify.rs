//! Pulse notifications.
//!
//! Subscribers are told about each applied pulse after the generator has
//! been swapped. Delivery runs inline on the sentinel thread unless a
//! [`Dispatcher`] is supplied, in which case each notification is posted,
//! then sent, then dropped and counted if both attempts fail.

use super::generator::GeneratorHandle;
use crate::beacon::EntropyPulse;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A unit of work handed to a [`Dispatcher`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors reported by a dispatcher. Never surfaced to generator callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The context has no room right now.
    #[error("dispatch queue is full")]
    Full,
    /// The consuming side is gone.
    #[error("dispatch queue is closed")]
    Closed,
    /// A blocking hand-off did not complete in time.
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// An execution context that runs notification jobs.
pub trait Dispatcher: Send + Sync {
    /// Queues `job` without blocking.
    fn post(&self, job: Job) -> Result<(), DispatchError>;

    /// Hands `job` over, blocking until the context accepts it.
    fn send(&self, job: Job) -> Result<(), DispatchError>;
}

/// Event published once per applied pulse.
pub struct PulseEvent<G> {
    /// The pulse that was applied.
    pub pulse: Arc<EntropyPulse>,
    /// Seed the new generator was built from.
    pub seed: i32,
    /// Handle to the generator that now answers draws.
    pub generator: GeneratorHandle<G>,
}

impl<G> Clone for PulseEvent<G> {
    fn clone(&self) -> Self {
        Self {
            pulse: Arc::clone(&self.pulse),
            seed: self.seed,
            generator: self.generator.clone(),
        }
    }
}

impl<G> std::fmt::Debug for PulseEvent<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseEvent")
            .field("pulse", &self.pulse)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

pub(crate) type Subscriber<G> = Arc<dyn Fn(&PulseEvent<G>) + Send + Sync>;

/// Fan-out of pulse events to subscribers.
pub(crate) struct Notifier<G> {
    subscribers: RwLock<Vec<Subscriber<G>>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    dropped: AtomicU64,
}

impl<G> Notifier<G> {
    pub(crate) fn new(
        subscribers: Vec<Subscriber<G>>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        Self {
            subscribers: RwLock::new(subscribers),
            dispatcher,
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber<G>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Notifications lost because the dispatcher refused them.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<G: Send + 'static> Notifier<G> {
    pub(crate) fn publish(&self, event: PulseEvent<G>) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if subscribers.is_empty() {
            return;
        }

        let Some(dispatcher) = &self.dispatcher else {
            deliver(&subscribers, &event);
            return;
        };

        let job = || -> Job {
            let subscribers = subscribers.clone();
            let event = event.clone();
            Box::new(move || deliver(&subscribers, &event))
        };

        if let Err(post_err) = dispatcher.post(job()) {
            tracing::debug!(error = %post_err, "Post refused, falling back to send");
            if let Err(send_err) = dispatcher.send(job()) {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    error = %send_err,
                    dropped,
                    "Pulse notification dropped"
                );
            }
        }
    }
}

fn deliver<G>(subscribers: &[Subscriber<G>], event: &PulseEvent<G>) {
    for subscriber in subscribers {
        subscriber(event);
    }
}

/// Creates a bounded channel-backed dispatcher and the queue that drains it.
///
/// `send` blocks for at most `send_timeout` so a stalled consumer cannot
/// wedge the sentinel.
pub fn channel(capacity: usize, send_timeout: Duration) -> (ChannelDispatcher, DispatchQueue) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (ChannelDispatcher { tx, send_timeout }, DispatchQueue { rx })
}

/// Producer side of a channel execution context.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: Sender<Job>,
    send_timeout: Duration,
}

impl Dispatcher for ChannelDispatcher {
    fn post(&self, job: Job) -> Result<(), DispatchError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Disconnected(_) => DispatchError::Closed,
        })
    }

    fn send(&self, job: Job) -> Result<(), DispatchError> {
        self.tx
            .send_timeout(job, self.send_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DispatchError::Timeout(self.send_timeout),
                SendTimeoutError::Disconnected(_) => DispatchError::Closed,
            })
    }
}

/// Consumer side of a channel execution context.
///
/// Jobs run on whichever thread calls the `run_*` methods.
#[derive(Debug)]
pub struct DispatchQueue {
    rx: Receiver<Job>,
}

impl DispatchQueue {
    /// Runs every job already queued. Returns the number run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Runs jobs as they arrive until `timeout` elapses or the producer
    /// side is dropped. Returns the number run.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return ran
                }
            }
        }
    }
}
