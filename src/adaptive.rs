// src/adaptive.rs

//! Latency-driven retuning of a concurrency limit.
//!
//! [`AdaptiveLimitController`] is fed one latency sample per finished call.
//! Samples land in a short adaptation window; each time that window fills,
//! its average decides whether the bulkhead grows by one permit or shrinks by
//! the drop multiplier, and how much of the latency budget is left over for
//! callers to wait in the queue. The averages themselves feed a long
//! reconfiguration window that moves the latency ceiling used by those
//! decisions, bounded between `desirable_latency × low_latency_multiplier`
//! and `max_acceptable_latency`.

// dependencies
use crate::config::{AdaptiveConfig, BulkheadConfig};
use crate::bulkhead::{ConcurrencyLimiter, Permit};
use crate::errors::AdmissionError;
use crate::events::LimiterEvent;
use crate::rate_limiter::TokenRateLimiter;
use crate::window::MovingAverageWindow;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug)]
struct ControllerState {
    adaptation: MovingAverageWindow,
    reconfiguration: MovingAverageWindow,
    current_max_latency: f64,
}

/// Feedback loop retuning a [`ConcurrencyLimiter`] from observed latency.
///
/// Windows are serialized behind one mutex, so `observe` may be called from
/// any thread.
#[derive(Debug)]
pub struct AdaptiveLimitController {
    config: AdaptiveConfig,
    limiter: ConcurrencyLimiter,
    rate_limiter: Option<Arc<TokenRateLimiter>>,
    state: Mutex<ControllerState>,
}

impl AdaptiveLimitController {
    pub fn new(config: AdaptiveConfig, limiter: ConcurrencyLimiter) -> Result<Self, AdmissionError> {
        config.validate()?;
        let state = ControllerState {
            adaptation: MovingAverageWindow::new(config.adaptation_window_size()),
            reconfiguration: MovingAverageWindow::new(config.reconfiguration_window_size()),
            current_max_latency: clamp_latency(&config, nanos(config.desirable_latency)),
        };
        Ok(Self {
            config,
            limiter,
            rate_limiter: None,
            state: Mutex::new(state),
        })
    }

    /// Also push the wait budget into `rate_limiter` as its timeout.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<TokenRateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Record the latency of one finished call.
    pub fn observe(&self, latency: Duration) -> Result<(), AdmissionError> {
        let mut state = self.state.lock();
        if !state.adaptation.add(nanos(latency)) {
            return Ok(());
        }

        let average = state.adaptation.average();
        self.adapt(average, state.current_max_latency)?;

        if state.reconfiguration.add(average) {
            let ceiling = state.reconfiguration.average() + state.reconfiguration.standard_deviation();
            state.current_max_latency = clamp_latency(&self.config, ceiling);
            debug!(
                bulkhead = %self.limiter.name(),
                current_max_latency_nanos = state.current_max_latency,
                "latency ceiling reconfigured"
            );
        }
        Ok(())
    }

    /// Latency ceiling above which the limit is cut.
    pub fn current_max_latency(&self) -> Duration {
        to_duration(self.state.lock().current_max_latency)
    }

    /// Average over the samples currently in the adaptation window.
    pub fn average_latency(&self) -> Duration {
        to_duration(self.state.lock().adaptation.average())
    }

    pub fn current_limit(&self) -> u32 {
        self.limiter.max_concurrent_calls()
    }

    fn adapt(&self, average: f64, current_max_latency: f64) -> Result<(), AdmissionError> {
        let room = to_duration((nanos(self.config.desirable_latency) - average).max(0.0));
        self.limiter.change_max_wait_duration(room);
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.change_timeout_duration(room);
        }

        let current = self.limiter.max_concurrent_calls();
        let next = if average > current_max_latency {
            (current as f64 * self.config.concurrency_drop_multiplier).floor() as u32
        } else {
            current.saturating_add(1)
        };
        let next = next.clamp(self.config.min_concurrent_calls, self.config.max_concurrent_calls);

        debug!(
            bulkhead = %self.limiter.name(),
            average_latency_nanos = average,
            wait_budget = ?room,
            limit = next,
            "adaptation window complete"
        );
        self.limiter.change_max_concurrent_calls(next)
    }
}

fn nanos(duration: Duration) -> f64 {
    duration.as_nanos() as f64
}

fn to_duration(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.round() as u64)
}

fn clamp_latency(config: &AdaptiveConfig, latency: f64) -> f64 {
    let floor = nanos(config.desirable_latency) * config.low_latency_multiplier;
    latency.min(nanos(config.max_acceptable_latency)).max(floor)
}

/// A [`ConcurrencyLimiter`] whose limit follows its own call latencies.
#[derive(Debug)]
pub struct AdaptiveBulkhead {
    controller: AdaptiveLimitController,
}

impl AdaptiveBulkhead {
    /// Starts at the concurrency that sustains the desirable throughput at the
    /// desirable latency, with the whole latency target as wait budget.
    pub fn with_config(name: impl Into<String>, config: AdaptiveConfig) -> Result<Self, AdmissionError> {
        config.validate()?;
        let bulkhead = BulkheadConfig::new(config.initial_concurrent_calls())
            .max_wait(config.desirable_latency);
        let limiter = ConcurrencyLimiter::with_config(name, bulkhead)?;
        Ok(Self {
            controller: AdaptiveLimitController::new(config, limiter)?,
        })
    }

    pub fn name(&self) -> &str {
        self.limiter().name()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        self.controller.limiter()
    }

    pub fn controller(&self) -> &AdaptiveLimitController {
        &self.controller
    }

    pub fn try_acquire_permission(&self) -> Result<Permit, AdmissionError> {
        self.limiter().try_acquire_permission()
    }

    /// Queue for up to the current wait budget.
    pub fn acquire(&self) -> Result<Permit, AdmissionError> {
        self.limiter().acquire()
    }

    pub fn acquire_permission(&self, timeout: Duration) -> Result<Permit, AdmissionError> {
        self.limiter().acquire_permission(timeout)
    }

    pub fn release_permission(&self, permit: &Permit) {
        self.limiter().release_permission(permit);
    }

    /// Return the permit of a finished call and feed its latency back. A
    /// permit that was already returned contributes no sample.
    pub fn on_complete(&self, permit: &Permit, latency: Duration) -> Result<(), AdmissionError> {
        if self.limiter().finish(permit) {
            self.controller.observe(latency)
        } else {
            Ok(())
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.limiter().subscribe()
    }
}
