// tests/admission/fixtures/test_clock.rs

// dependencies
use flux_admission::{Clock, ClockError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// Manually driven clock; sleeping advances it instead of blocking
#[derive(Debug, Clone)]
pub struct TestClock {
    time: Arc<AtomicU64>, // Store as nanos
    should_fail: Arc<AtomicBool>,
}

impl TestClock {
    pub fn new(initial_time: f64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new((initial_time * 1_000_000_000.0) as u64)),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let nanos = (seconds * 1_000_000_000.0) as u64;
        self.time.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn set_time(&self, seconds: f64) {
        let nanos = (seconds * 1_000_000_000.0) as u64;
        self.time.store(nanos, Ordering::SeqCst);
    }

    // Make the next call to `now()` return an error
    pub fn fail_next_call(&self) {
        self.should_fail.store(true, Ordering::SeqCst);
    }

    pub fn nanos(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    // Helper to get time as f64 for test assertions
    pub fn time_as_f64(&self) -> f64 {
        self.nanos() as f64 / 1_000_000_000.0
    }
}

impl Clock for TestClock {
    fn now(&self) -> Result<u64, ClockError> {
        if self.should_fail.swap(false, Ordering::SeqCst) {
            Err(ClockError::SystemTimeError)
        } else {
            Ok(self.time.load(Ordering::SeqCst))
        }
    }

    fn sleep(&self, duration: Duration) {
        self.time.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}
