// src/bulkhead.rs

//! Concurrency limiter ("bulkhead") with a fair wait queue.
//!
//! Permits live in an atomic counter. Callers that find it empty join a FIFO
//! queue of [`QueuedAcquirer`]s, and a released permit is handed directly to
//! the oldest live entry instead of going back to the counter, so a newcomer
//! can never overtake somebody who is already waiting.
//!
//! The fast path (`try_acquire_permission` with nobody queued) is a single
//! compare-and-swap. The queue itself sits behind a short critical section;
//! the counter is only ever credited while that section is held, which is
//! what keeps "queue not empty" and "permits available" mutually exclusive.

// dependencies
use crate::config::BulkheadConfig;
use crate::errors::AdmissionError;
use crate::events::{EventKind, EventPublisher, LimiterEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELED: u8 = 2;
const RELEASED: u8 = 3;

/// Lifecycle of a queued acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquirerState {
    Pending,
    Completed,
    Canceled,
    Released,
}

pub(crate) type CompletionSender = oneshot::Sender<Result<(), AdmissionError>>;

/// Where the outcome of a queued acquisition is delivered.
#[derive(Debug)]
enum Sink {
    /// A thread parked in `acquire_permission`.
    Thread(Thread),
    /// A future waiting on the other end of a one-shot channel.
    Channel(Mutex<Option<CompletionSender>>),
    /// Nobody; the acquisition was resolved before it was ever queued.
    Resolved,
}

/// One-shot queue entry.
///
/// Every transition is a compare-and-swap out of a fixed state, so exactly
/// one of "a permit was handed over" (PENDING -> COMPLETED) and "the caller
/// gave up" (PENDING -> CANCELED) can win, and a completed permit can be
/// given back (COMPLETED -> RELEASED) exactly once.
#[derive(Debug)]
pub(crate) struct QueuedAcquirer {
    state: AtomicU8,
    sink: Sink,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedAcquirer {
    fn parked(thread: Thread) -> Self {
        Self::with_sink(PENDING, Sink::Thread(thread))
    }

    pub(crate) fn channel(sender: CompletionSender) -> Self {
        Self::with_sink(PENDING, Sink::Channel(Mutex::new(Some(sender))))
    }

    /// An entry standing for a permit that was granted on the fast path.
    pub(crate) fn granted() -> Self {
        Self::with_sink(COMPLETED, Sink::Resolved)
    }

    fn with_sink(state: u8, sink: Sink) -> Self {
        Self {
            state: AtomicU8::new(state),
            sink,
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> AcquirerState {
        match self.state.load(Ordering::Acquire) {
            PENDING => AcquirerState::Pending,
            COMPLETED => AcquirerState::Completed,
            CANCELED => AcquirerState::Canceled,
            _ => AcquirerState::Released,
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_complete(&self) -> bool {
        self.transition(PENDING, COMPLETED)
    }

    pub(crate) fn try_cancel(&self) -> bool {
        self.transition(PENDING, CANCELED)
    }

    pub(crate) fn try_release(&self) -> bool {
        self.transition(COMPLETED, RELEASED)
    }

    pub(crate) fn set_timer(&self, timer: JoinHandle<()>) {
        let mut slot = self.timer.lock();
        if self.state() == AcquirerState::Pending {
            *slot = Some(timer);
        } else {
            timer.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    /// Deliver the outcome. Only the side that won the state transition
    /// calls this.
    pub(crate) fn notify(&self, outcome: Result<(), AdmissionError>) {
        self.stop_timer();
        match &self.sink {
            Sink::Thread(thread) => thread.unpark(),
            Sink::Channel(sender) => {
                if let Some(sender) = sender.lock().take() {
                    // a closed receiver is handled by the receiver's own drop
                    let _ = sender.send(outcome);
                }
            }
            Sink::Resolved => {}
        }
    }
}

/// Result of trying to join the wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// A permit was free after all; the entry was not queued.
    Acquired,
    Queued,
    /// The queue is at its configured bound.
    Full,
}

/// Point-in-time view of a bulkhead. Not guaranteed to be consistent under
/// concurrent use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub max_concurrent_calls: u32,
    pub available_concurrent_calls: u32,
    pub in_flight_calls: u32,
    pub queued_calls: usize,
}

#[derive(Debug)]
pub(crate) struct BulkheadCore {
    name: String,
    max_concurrent: AtomicI64,
    // negative while a shrink is waiting for in-flight calls to drain
    available: AtomicI64,
    in_flight: AtomicI64,
    max_wait_nanos: AtomicU64,
    max_queued: Option<usize>,
    queued: AtomicUsize,
    waiters: Mutex<VecDeque<Arc<QueuedAcquirer>>>,
    events: EventPublisher,
}

impl BulkheadCore {
    fn new(name: String, config: &BulkheadConfig) -> Self {
        let max = config.max_concurrent_calls as i64;
        Self {
            events: EventPublisher::new(name.clone()),
            name,
            max_concurrent: AtomicI64::new(max),
            available: AtomicI64::new(max),
            in_flight: AtomicI64::new(0),
            max_wait_nanos: AtomicU64::new(config.max_wait_duration.as_nanos().min(u64::MAX as u128) as u64),
            max_queued: config.max_queued_calls,
            queued: AtomicUsize::new(0),
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn max_wait(&self) -> Duration {
        Duration::from_nanos(self.max_wait_nanos.load(Ordering::Acquire))
    }

    /// Fast path: take a free permit unless somebody is already queued.
    pub(crate) fn try_take(&self) -> bool {
        if self.queued.load(Ordering::Acquire) > 0 {
            return false;
        }
        if self.take_available() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    fn take_available(&self) -> bool {
        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Join the back of the queue, unless a permit turned up in the meantime.
    pub(crate) fn enqueue(&self, acquirer: &Arc<QueuedAcquirer>) -> Enqueued {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() && self.take_available() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return Enqueued::Acquired;
        }
        if let Some(bound) = self.max_queued {
            if waiters.len() >= bound {
                return Enqueued::Full;
            }
        }
        waiters.push_back(Arc::clone(acquirer));
        self.queued.store(waiters.len(), Ordering::Release);
        Enqueued::Queued
    }

    /// Drop a canceled entry from the queue.
    pub(crate) fn remove(&self, acquirer: &Arc<QueuedAcquirer>) {
        let mut waiters = self.waiters.lock();
        waiters.retain(|waiter| !Arc::ptr_eq(waiter, acquirer));
        self.queued.store(waiters.len(), Ordering::Release);
    }

    /// Give back one permit held by a finished call.
    pub(crate) fn release(&self) -> bool {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                warn!(bulkhead = %self.name, "permit released without a matching acquire");
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.hand_off(1);
        true
    }

    /// Route `permits` freed permits: repay any shrink debt, then serve the
    /// queue head first, then credit the counter.
    fn hand_off(&self, permits: i64) {
        let granted = {
            let mut waiters = self.waiters.lock();
            let granted = self.hand_off_locked(&mut waiters, permits);
            self.queued.store(waiters.len(), Ordering::Release);
            granted
        };
        self.notify_granted(granted);
    }

    // the permit is accounted as handed over here, whether or not the waiter
    // ever collects it
    fn notify_granted(&self, granted: Vec<Arc<QueuedAcquirer>>) {
        for acquirer in granted {
            acquirer.notify(Ok(()));
            self.publish_permitted();
        }
    }

    fn hand_off_locked(
        &self,
        waiters: &mut VecDeque<Arc<QueuedAcquirer>>,
        permits: i64,
    ) -> Vec<Arc<QueuedAcquirer>> {
        let mut remaining = permits;

        let debt = (-self.available.load(Ordering::Acquire)).max(0);
        let repaid = remaining.min(debt);
        if repaid > 0 {
            self.available.fetch_add(repaid, Ordering::AcqRel);
            remaining -= repaid;
        }

        let mut granted = Vec::new();
        while remaining > 0 {
            let Some(head) = waiters.pop_front() else {
                break;
            };
            // a canceled head lost its race with us; its permit goes to the next entry
            if head.try_complete() {
                granted.push(head);
                remaining -= 1;
            }
        }
        if !granted.is_empty() {
            self.in_flight.fetch_add(granted.len() as i64, Ordering::AcqRel);
        }
        if remaining > 0 {
            self.available.fetch_add(remaining, Ordering::AcqRel);
        }
        granted
    }

    fn resize(&self, max_concurrent_calls: u32) -> i64 {
        let new_max = max_concurrent_calls as i64;
        let (old_max, granted) = {
            let mut waiters = self.waiters.lock();
            let old_max = self.max_concurrent.swap(new_max, Ordering::AcqRel);
            let delta = new_max - old_max;
            let granted = if delta > 0 {
                self.hand_off_locked(&mut waiters, delta)
            } else {
                self.available.fetch_add(delta, Ordering::AcqRel);
                Vec::new()
            };
            self.queued.store(waiters.len(), Ordering::Release);
            (old_max, granted)
        };
        self.notify_granted(granted);
        old_max
    }

    pub(crate) fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            max_concurrent_calls: self.max_concurrent.load(Ordering::Acquire) as u32,
            available_concurrent_calls: self.available.load(Ordering::Acquire).max(0) as u32,
            in_flight_calls: self.in_flight.load(Ordering::Acquire).max(0) as u32,
            queued_calls: self.queued.load(Ordering::Acquire),
        }
    }

    pub(crate) fn publish_permitted(&self) {
        trace!(bulkhead = %self.name, "call permitted");
        self.events.publish(EventKind::CallPermitted, Vec::new);
    }

    pub(crate) fn publish_rejected(&self, reason: &AdmissionError) {
        trace!(bulkhead = %self.name, %reason, "call rejected");
        self.events
            .publish(EventKind::CallRejected, || vec![("reason", reason.to_string())]);
    }

    pub(crate) fn publish_finished(&self) {
        self.events.publish(EventKind::CallFinished, Vec::new);
    }
}

/// Bounds the number of calls in flight at once.
///
/// Cloning is cheap and every clone shares the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    core: Arc<BulkheadCore>,
}

impl ConcurrencyLimiter {
    pub fn with_config(name: impl Into<String>, config: BulkheadConfig) -> Result<Self, AdmissionError> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(BulkheadCore::new(name.into(), &config)),
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub(crate) fn core(&self) -> &Arc<BulkheadCore> {
        &self.core
    }

    /// Take a permit if one is free right now. Never waits, never queues.
    pub fn try_acquire_permission(&self) -> Result<Permit, AdmissionError> {
        if self.core.try_take() {
            self.core.publish_permitted();
            Ok(Permit::granted(Arc::clone(&self.core)))
        } else {
            self.reject(AdmissionError::PermissionDenied)
        }
    }

    /// Take a permit, queueing for up to the configured max wait duration.
    pub fn acquire(&self) -> Result<Permit, AdmissionError> {
        self.acquire_permission(self.core.max_wait())
    }

    /// Take a permit, parking the calling thread in the wait queue for up to
    /// `timeout`. A zero timeout fails fast.
    pub fn acquire_permission(&self, timeout: Duration) -> Result<Permit, AdmissionError> {
        if self.core.try_take() {
            self.core.publish_permitted();
            return Ok(Permit::granted(Arc::clone(&self.core)));
        }
        if timeout.is_zero() {
            return self.reject(AdmissionError::PermissionDenied);
        }

        let acquirer = Arc::new(QueuedAcquirer::parked(thread::current()));
        match self.core.enqueue(&acquirer) {
            Enqueued::Acquired => {
                self.core.publish_permitted();
                return Ok(Permit::granted(Arc::clone(&self.core)));
            }
            Enqueued::Full => return self.reject(AdmissionError::PermissionDenied),
            Enqueued::Queued => {}
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            if acquirer.state() == AcquirerState::Completed {
                return Ok(Permit::new(Arc::clone(&self.core), acquirer));
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        if acquirer.try_cancel() {
                            self.core.remove(&acquirer);
                            return self.reject(AdmissionError::Timeout);
                        }
                        // the permit arrived as the deadline passed; keep it
                        continue;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        }
    }

    /// Return a permit. A permit that was already returned is ignored.
    pub fn release_permission(&self, permit: &Permit) {
        if self.owns(permit) {
            permit.give_back();
        }
    }

    /// Return a permit and record that the call finished.
    pub fn on_complete(&self, permit: &Permit) {
        self.finish(permit);
    }

    /// Like [`on_complete`](Self::on_complete); reports whether this call
    /// actually returned the permit.
    pub(crate) fn finish(&self, permit: &Permit) -> bool {
        self.owns(permit) && permit.finish()
    }

    fn owns(&self, permit: &Permit) -> bool {
        let owned = Arc::ptr_eq(&self.core, &permit.core);
        if !owned {
            warn!(bulkhead = %self.core.name, other = %permit.core.name, "permit belongs to another bulkhead");
        }
        owned
    }

    /// Resize the bulkhead. Growing hands the new permits to queued callers
    /// first; shrinking below the in-flight count takes effect as those calls
    /// finish.
    pub fn change_max_concurrent_calls(&self, max_concurrent_calls: u32) -> Result<(), AdmissionError> {
        BulkheadConfig::new(max_concurrent_calls).validate()?;
        let old = self.core.resize(max_concurrent_calls);
        let new = max_concurrent_calls as i64;
        if new != old {
            debug!(bulkhead = %self.core.name, old, new, "concurrency limit changed");
            let kind = if new > old {
                EventKind::LimitIncreased
            } else {
                EventKind::LimitDecreased
            };
            self.core.events.publish(kind, || {
                vec![
                    ("previousLimit", old.to_string()),
                    ("newLimit", new.to_string()),
                ]
            });
        }
        Ok(())
    }

    /// Replace the wait budget used by [`acquire`](Self::acquire).
    pub fn change_max_wait_duration(&self, max_wait: Duration) {
        self.core
            .max_wait_nanos
            .store(max_wait.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);
    }

    pub fn max_wait_duration(&self) -> Duration {
        self.core.max_wait()
    }

    pub fn max_concurrent_calls(&self) -> u32 {
        self.core.max_concurrent.load(Ordering::Acquire) as u32
    }

    pub fn available_permits(&self) -> u32 {
        self.core.metrics().available_concurrent_calls
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        self.core.metrics()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.core.events.subscribe()
    }

    fn reject(&self, err: AdmissionError) -> Result<Permit, AdmissionError> {
        self.core.publish_rejected(&err);
        Err(err)
    }
}

/// The right of one admitted call to run.
///
/// A permit goes back to its bulkhead exactly once: through
/// [`complete`](Self::complete), [`release`](Self::release), the limiter's
/// `release_permission`/`on_complete`, or when it is dropped. Every later
/// attempt is a no-op.
#[derive(Debug)]
#[must_use = "dropping a permit returns it to the bulkhead immediately"]
pub struct Permit {
    core: Arc<BulkheadCore>,
    acquirer: Arc<QueuedAcquirer>,
    acquired_at: Instant,
}

impl Permit {
    pub(crate) fn new(core: Arc<BulkheadCore>, acquirer: Arc<QueuedAcquirer>) -> Self {
        Self {
            core,
            acquirer,
            acquired_at: Instant::now(),
        }
    }

    /// A permit taken without queueing.
    pub(crate) fn granted(core: Arc<BulkheadCore>) -> Self {
        Self::new(core, Arc::new(QueuedAcquirer::granted()))
    }

    /// Time since the permit was handed to the caller.
    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Return the permit, recording a finished call. Returns how long the
    /// permit was held.
    pub fn complete(self) -> Duration {
        let held = self.elapsed();
        self.finish();
        held
    }

    /// Return the permit without recording a finished call.
    pub fn release(self) {
        drop(self);
    }

    fn give_back(&self) -> bool {
        self.acquirer.try_release() && self.core.release()
    }

    fn finish(&self) -> bool {
        let released = self.give_back();
        if released {
            self.core.publish_finished();
        }
        released
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.give_back();
    }
}
