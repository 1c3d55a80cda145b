// src/clock.rs

// clock abstraction used by the rate limiter to find its current cycle

// dependencies
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock trait to abstract time retrieval and waiting.
/// Implementors must be thread-safe (Send + Sync).
/// `now` returns the current time in nanoseconds as a u64; only differences
/// between readings matter, so the origin is up to the implementation.
/// `sleep` blocks the calling thread; a test clock can advance itself instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<u64, ClockError>;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    SystemTimeError,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClockError::SystemTimeError => write!(f, "system time is before the Unix epoch"),
        }
    }
}

/// Monotonic clock measuring nanoseconds since the clock was created.
/// Never fails and never goes backwards, which makes it the default for
/// limiters: cycle boundaries cannot be replayed by a wall-clock adjustment.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Result<u64, ClockError> {
        Ok(self.origin.elapsed().as_nanos() as u64)
    }
}

/// SystemClock implementation using the system time.
/// Returns the current time in nanoseconds since the Unix epoch, or an error
/// if the system clock is set before the epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64, ClockError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .map_err(|_| ClockError::SystemTimeError)
    }
}
