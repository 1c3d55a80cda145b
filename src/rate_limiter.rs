// src/rate_limiter.rs

// token-bucket rate limiter with lock-free permit bookkeeping

// dependencies
use crate::clock::{Clock, MonotonicClock};
use crate::config::{MAX_BUCKET_PERMITS, RateLimiterConfig, RefillStrategy};
use crate::errors::AdmissionError;
use crate::events::{EventKind, EventPublisher, LimiterEvent};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

/// Rate limiter handing out `limit_for_period` permits per
/// `limit_refresh_period`.
///
/// The whole mutable state is one 64-bit word: the index of the cycle the
/// state was computed for (high half, wrapping) and the available permit
/// count (low half, signed). Every acquisition reads the word, computes the
/// refilled and reserved successor, and publishes it with a single
/// compare-and-swap, so refills racing across threads cannot be applied
/// twice. A negative permit count means future cycles have already been
/// reserved by callers that are waiting for them.
#[derive(Debug)]
pub struct TokenRateLimiter<C = MonotonicClock>
where
    C: Clock,
{
    name: String,
    config: RateLimiterConfig,
    cycle_nanos: u64,
    permits_per_cycle: i64,
    capacity: i64,
    timeout_nanos: AtomicU64,
    state: AtomicU64,
    // latest clock reading seen; a clock stepping back never moves time backwards here
    latest_now: AtomicU64,
    waiting_threads: AtomicUsize,
    events: EventPublisher,
    clock: C,
}

/// Outcome of one pass of the state calculation.
#[derive(Debug, Clone, Copy)]
struct Reservation {
    next_state: u64,
    available: i64,
    nanos_to_wait: u64,
    granted: bool,
}

impl TokenRateLimiter<MonotonicClock> {
    /// Create a rate limiter on the monotonic clock.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Result<Self, AdmissionError> {
        Self::with_config(name, config, MonotonicClock::new())
    }
}

impl<C> TokenRateLimiter<C>
where
    C: Clock,
{
    /// Create a rate limiter from a config object and an explicit clock
    pub fn with_config(
        name: impl Into<String>,
        config: RateLimiterConfig,
        clock: C,
    ) -> Result<Self, AdmissionError> {
        config.validate()?;

        let period_nanos = config.limit_refresh_period.as_nanos().min(u64::MAX as u128) as u64;
        let (cycle_nanos, permits_per_cycle) = match config.strategy {
            RefillStrategy::Cycle => (period_nanos, config.limit_for_period as i64),
            RefillStrategy::Refill => (period_nanos / config.limit_for_period as u64, 1),
        };
        let capacity = config.capacity() as i64;
        let now = clock.now()?;
        let name = name.into();

        Ok(Self {
            events: EventPublisher::new(name.clone()),
            name,
            cycle_nanos,
            permits_per_cycle,
            capacity,
            timeout_nanos: AtomicU64::new(duration_nanos(config.timeout_duration)),
            state: AtomicU64::new(pack(now / cycle_nanos, capacity)),
            latest_now: AtomicU64::new(now),
            waiting_threads: AtomicUsize::new(0),
            config,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Take `permits` only if they are available right now.
    pub fn try_acquire_permission(&self, permits: u32) -> Result<(), AdmissionError> {
        self.reserve_permission(permits, Duration::ZERO).map(|_| ())
    }

    /// Take `permits`, blocking the calling thread for up to `timeout` until
    /// the reserved permits become valid.
    pub fn acquire_permission(&self, permits: u32, timeout: Duration) -> Result<(), AdmissionError> {
        let wait = self.reserve_permission(permits, timeout)?;
        if !wait.is_zero() {
            self.waiting_threads.fetch_add(1, Ordering::Relaxed);
            self.clock.sleep(wait);
            self.waiting_threads.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Like [`acquire_permission`](Self::acquire_permission), waiting at most
    /// the limiter's current timeout budget.
    pub fn acquire(&self, permits: u32) -> Result<(), AdmissionError> {
        self.acquire_permission(permits, self.timeout_duration())
    }

    /// Reserve `permits` without blocking and return how long the caller has
    /// to wait before using them. Nothing is reserved when the wait would
    /// exceed `timeout`.
    pub fn reserve_permission(
        &self,
        permits: u32,
        timeout: Duration,
    ) -> Result<Duration, AdmissionError> {
        if permits == 0 {
            return Ok(Duration::ZERO);
        }
        if permits as i64 > self.capacity {
            trace!(limiter = %self.name, permits, "request exceeds bucket capacity");
            self.publish_rejected(permits, u64::MAX);
            return Err(AdmissionError::PermissionDenied);
        }

        let timeout_nanos = duration_nanos(timeout);
        let reservation = self.update_state(permits as i64, timeout_nanos)?;

        if reservation.granted {
            trace!(
                limiter = %self.name,
                permits,
                nanos_to_wait = reservation.nanos_to_wait,
                "permits reserved"
            );
            self.events.publish(EventKind::CallPermitted, || {
                vec![
                    ("permits", permits.to_string()),
                    ("nanosToWait", reservation.nanos_to_wait.to_string()),
                ]
            });
            Ok(Duration::from_nanos(reservation.nanos_to_wait))
        } else {
            trace!(
                limiter = %self.name,
                permits,
                nanos_to_wait = reservation.nanos_to_wait,
                timeout_nanos,
                "permits denied"
            );
            self.publish_rejected(permits, reservation.nanos_to_wait);
            Err(AdmissionError::PermissionDenied)
        }
    }

    /// Throw away every permit left in the current cycle. Reservations
    /// already made stay valid.
    pub fn drain_permissions(&self) -> Result<(), AdmissionError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let now = self.now()?;
            let cycle = now / self.cycle_nanos;
            let available = self.refill(current, cycle).min(0);
            match self.state.compare_exchange_weak(
                current,
                pack(cycle, available),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Replace the default wait budget used by [`acquire`](Self::acquire).
    pub fn change_timeout_duration(&self, timeout: Duration) {
        self.timeout_nanos
            .store(duration_nanos(timeout), Ordering::Release);
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos.load(Ordering::Acquire))
    }

    /// Estimated permits available right now; negative when future cycles
    /// are already reserved.
    pub fn available_permissions(&self) -> Result<i64, AdmissionError> {
        Ok(self.estimate()?.available)
    }

    /// Estimated wait for a single permit right now.
    pub fn nanos_to_wait(&self) -> Result<u64, AdmissionError> {
        Ok(self.estimate()?.nanos_to_wait)
    }

    /// Threads currently blocked in [`acquire_permission`](Self::acquire_permission).
    pub fn waiting_threads(&self) -> usize {
        self.waiting_threads.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.events.subscribe()
    }

    // read-compute-CAS loop; never blocks, retries with the fresh state on contention
    fn update_state(&self, permits: i64, timeout_nanos: u64) -> Result<Reservation, AdmissionError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let now = self.now()?;
            let reservation = self.calculate_next_state(permits, timeout_nanos, current, now);
            if !reservation.granted {
                return Ok(reservation);
            }
            match self.state.compare_exchange_weak(
                current,
                reservation.next_state,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(reservation),
                Err(actual) => current = actual,
            }
        }
    }

    fn now(&self) -> Result<u64, AdmissionError> {
        let now = self.clock.now()?;
        let latest = self.latest_now.fetch_max(now, Ordering::AcqRel);
        Ok(now.max(latest))
    }

    fn estimate(&self) -> Result<Reservation, AdmissionError> {
        let now = self.now()?;
        let current = self.state.load(Ordering::Acquire);
        Ok(self.calculate_next_state(1, 0, current, now))
    }

    // side-effect free: computes the successor of `current` at time `now`
    fn calculate_next_state(
        &self,
        permits: i64,
        timeout_nanos: u64,
        current: u64,
        now: u64,
    ) -> Reservation {
        let cycle = now / self.cycle_nanos;
        let available = self.refill(current, cycle);
        let nanos_to_wait = self.nanos_to_wait_for(permits, available, now, cycle);

        let remaining = available - permits;
        let granted = nanos_to_wait <= timeout_nanos && remaining >= -(MAX_BUCKET_PERMITS as i64);
        let next_available = if granted { remaining } else { available };

        Reservation {
            next_state: pack(cycle, next_available),
            available,
            nanos_to_wait,
            granted,
        }
    }

    // permits available in `cycle`, counting every cycle elapsed since the stored one
    fn refill(&self, current: u64, cycle: u64) -> i64 {
        let (stored_cycle, available) = unpack(current);
        let elapsed = (cycle as u32).wrapping_sub(stored_cycle) as i64;
        if elapsed == 0 {
            return available;
        }
        available
            .saturating_add(elapsed.saturating_mul(self.permits_per_cycle))
            .min(self.capacity)
    }

    // time until the cycle that covers the missing permits starts
    fn nanos_to_wait_for(&self, permits: i64, available: i64, now: u64, cycle: u64) -> u64 {
        if available >= permits {
            return 0;
        }
        let missing = permits - available;
        let cycles_to_wait = (missing + self.permits_per_cycle - 1) / self.permits_per_cycle;
        let next_cycle_start = (cycle + 1).saturating_mul(self.cycle_nanos);
        let nanos_to_next_cycle = next_cycle_start.saturating_sub(now);
        ((cycles_to_wait - 1) as u64)
            .saturating_mul(self.cycle_nanos)
            .saturating_add(nanos_to_next_cycle)
    }

    fn publish_rejected(&self, permits: u32, nanos_to_wait: u64) {
        self.events.publish(EventKind::CallRejected, || {
            vec![
                ("permits", permits.to_string()),
                ("nanosToWait", nanos_to_wait.to_string()),
            ]
        });
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

// cycle index in the high half (wrapping), signed permit count in the low half
fn pack(cycle: u64, available: i64) -> u64 {
    ((cycle as u32 as u64) << 32) | (available as i32 as u32 as u64)
}

fn unpack(state: u64) -> (u32, i64) {
    ((state >> 32) as u32, state as u32 as i32 as i64)
}
