// src/config.rs

//! Configuration types for the admission limiters

// dependencies
use crate::errors::{AdmissionError, ConfigError};
use std::time::Duration;

/// Largest permit count a rate limiter bucket may hold; the permit counter
/// shares a 64-bit word with the cycle index.
pub(crate) const MAX_BUCKET_PERMITS: u32 = (i32::MAX / 2) as u32;

/// Most samples an adaptive controller window may hold.
pub const MAX_WINDOW_SAMPLES: usize = 1 << 20;

/// How a rate limiter turns elapsed time into new permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefillStrategy {
    /// Time is cut into cycles of `limit_refresh_period`; each new cycle adds
    /// `limit_for_period` permits at once.
    #[default]
    Cycle,
    /// Permits trickle in one at a time, every
    /// `limit_refresh_period / limit_for_period`.
    Refill,
}

/// Configuration for the token rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub(crate) limit_for_period: u32,
    pub(crate) limit_refresh_period: Duration,
    pub(crate) timeout_duration: Duration,
    pub(crate) burst_limit: Option<u32>,
    pub(crate) strategy: RefillStrategy,
}

impl RateLimiterConfig {
    /// Create a new configuration admitting `limit_for_period` permits every
    /// `limit_refresh_period`
    pub fn new(limit_for_period: u32, limit_refresh_period: Duration) -> Self {
        Self {
            limit_for_period,
            limit_refresh_period,
            ..Self::default()
        }
    }

    /// Builder-style: set the default time a caller may wait for a permit
    pub fn timeout(mut self, timeout_duration: Duration) -> Self {
        self.timeout_duration = timeout_duration;
        self
    }

    /// Builder-style: let idle periods bank permits up to `burst_limit`
    pub fn burst(mut self, burst_limit: u32) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// Builder-style: choose the refill strategy
    pub fn strategy(mut self, strategy: RefillStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn limit_for_period(&self) -> u32 {
        self.limit_for_period
    }

    pub fn limit_refresh_period(&self) -> Duration {
        self.limit_refresh_period
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }

    /// Most permits the bucket can ever hold
    pub fn capacity(&self) -> u32 {
        self.burst_limit.unwrap_or(self.limit_for_period)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.limit_for_period == 0 || self.limit_for_period > MAX_BUCKET_PERMITS {
            return Err(ConfigError::InvalidLimitForPeriod.into());
        }
        if self.limit_refresh_period.is_zero() {
            return Err(ConfigError::InvalidRefreshPeriod.into());
        }
        if let Some(burst) = self.burst_limit {
            if burst < self.limit_for_period || burst > MAX_BUCKET_PERMITS {
                return Err(ConfigError::InvalidBurstLimit.into());
            }
        }
        if self.strategy == RefillStrategy::Refill
            && self.limit_refresh_period.as_nanos() < self.limit_for_period as u128
        {
            return Err(ConfigError::InvalidRefreshPeriod.into());
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit_for_period: 50,
            limit_refresh_period: Duration::from_nanos(500),
            timeout_duration: Duration::from_secs(5),
            burst_limit: None,
            strategy: RefillStrategy::Cycle,
        }
    }
}

/// Configuration for the concurrency limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    pub(crate) max_concurrent_calls: u32,
    pub(crate) max_wait_duration: Duration,
    pub(crate) max_queued_calls: Option<usize>,
}

impl BulkheadConfig {
    pub fn new(max_concurrent_calls: u32) -> Self {
        Self {
            max_concurrent_calls,
            ..Self::default()
        }
    }

    /// Builder-style: how long a caller may queue for a permit; zero fails fast
    pub fn max_wait(mut self, max_wait_duration: Duration) -> Self {
        self.max_wait_duration = max_wait_duration;
        self
    }

    /// Builder-style: cap the number of queued callers
    pub fn max_queued(mut self, max_queued_calls: usize) -> Self {
        self.max_queued_calls = Some(max_queued_calls);
        self
    }

    pub fn max_concurrent_calls(&self) -> u32 {
        self.max_concurrent_calls
    }

    pub fn max_wait_duration(&self) -> Duration {
        self.max_wait_duration
    }

    pub fn max_queued_calls(&self) -> Option<usize> {
        self.max_queued_calls
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.max_concurrent_calls == 0 || self.max_concurrent_calls > i32::MAX as u32 {
            return Err(ConfigError::InvalidMaxConcurrentCalls.into());
        }
        Ok(())
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 25,
            max_wait_duration: Duration::ZERO,
            max_queued_calls: None,
        }
    }
}

/// Configuration for the latency-driven controller
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub(crate) desirable_latency: Duration,
    pub(crate) max_acceptable_latency: Duration,
    pub(crate) desirable_average_throughput: f64,
    pub(crate) window_for_adaptation: Duration,
    pub(crate) window_for_reconfiguration: Duration,
    pub(crate) low_latency_multiplier: f64,
    pub(crate) concurrency_drop_multiplier: f64,
    pub(crate) min_concurrent_calls: u32,
    pub(crate) max_concurrent_calls: u32,
}

impl AdaptiveConfig {
    /// Create a configuration aiming for `desirable_latency` per call at
    /// `desirable_average_throughput` calls per second, never accepting more
    /// than `max_acceptable_latency`
    pub fn new(
        desirable_latency: Duration,
        max_acceptable_latency: Duration,
        desirable_average_throughput: f64,
    ) -> Self {
        Self {
            desirable_latency,
            max_acceptable_latency,
            desirable_average_throughput,
            window_for_adaptation: Duration::from_secs(5),
            window_for_reconfiguration: Duration::from_secs(60),
            low_latency_multiplier: 0.8,
            concurrency_drop_multiplier: 0.5,
            min_concurrent_calls: 2,
            max_concurrent_calls: 25,
        }
    }

    /// Builder-style: time span covered by one adaptation window
    pub fn adaptation_window(mut self, window: Duration) -> Self {
        self.window_for_adaptation = window;
        self
    }

    /// Builder-style: time span covered by one reconfiguration window
    pub fn reconfiguration_window(mut self, window: Duration) -> Self {
        self.window_for_reconfiguration = window;
        self
    }

    /// Builder-style: floor for the latency ceiling, as a multiple of the
    /// desirable latency
    pub fn low_latency_multiplier(mut self, multiplier: f64) -> Self {
        self.low_latency_multiplier = multiplier;
        self
    }

    /// Builder-style: factor applied to the limit when latency is too high
    pub fn concurrency_drop_multiplier(mut self, multiplier: f64) -> Self {
        self.concurrency_drop_multiplier = multiplier;
        self
    }

    /// Builder-style: bounds for the adapted concurrency limit
    pub fn concurrency_range(mut self, min: u32, max: u32) -> Self {
        self.min_concurrent_calls = min;
        self.max_concurrent_calls = max;
        self
    }

    pub fn desirable_latency(&self) -> Duration {
        self.desirable_latency
    }

    pub fn max_acceptable_latency(&self) -> Duration {
        self.max_acceptable_latency
    }

    pub fn min_concurrent_calls(&self) -> u32 {
        self.min_concurrent_calls
    }

    pub fn max_concurrent_calls(&self) -> u32 {
        self.max_concurrent_calls
    }

    /// Samples per adaptation window: enough to cover the adaptation span at
    /// the desirable throughput
    pub fn adaptation_window_size(&self) -> usize {
        window_size(self.adaptation_samples())
    }

    /// Adaptation averages per reconfiguration window
    pub fn reconfiguration_window_size(&self) -> usize {
        window_size(self.reconfiguration_samples())
    }

    fn adaptation_samples(&self) -> f64 {
        (self.window_for_adaptation.as_secs_f64() * self.desirable_average_throughput).ceil()
    }

    fn reconfiguration_samples(&self) -> f64 {
        (self.window_for_reconfiguration.as_secs_f64() / self.window_for_adaptation.as_secs_f64()).ceil()
    }

    /// Starting concurrency: the in-flight count that sustains the desirable
    /// throughput at the desirable latency
    pub fn initial_concurrent_calls(&self) -> u32 {
        let little = self.desirable_average_throughput * self.desirable_latency.as_secs_f64();
        (little.round() as u32).clamp(self.min_concurrent_calls, self.max_concurrent_calls)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if !self.desirable_average_throughput.is_finite() || self.desirable_average_throughput <= 0.0
        {
            return Err(ConfigError::InvalidThroughput.into());
        }
        if self.desirable_latency.is_zero()
            || self.max_acceptable_latency < self.desirable_latency
        {
            return Err(ConfigError::InvalidLatency.into());
        }
        if !(self.low_latency_multiplier.is_finite() && self.low_latency_multiplier > 0.0) {
            return Err(ConfigError::InvalidMultiplier.into());
        }
        // the latency ceiling floor may not sit above its cap
        if self.desirable_latency.as_secs_f64() * self.low_latency_multiplier
            > self.max_acceptable_latency.as_secs_f64()
        {
            return Err(ConfigError::InvalidMultiplier.into());
        }
        if !(self.concurrency_drop_multiplier > 0.0 && self.concurrency_drop_multiplier < 1.0) {
            return Err(ConfigError::InvalidMultiplier.into());
        }
        if self.window_for_adaptation.is_zero()
            || self.window_for_reconfiguration < self.window_for_adaptation
        {
            return Err(ConfigError::InvalidWindow.into());
        }
        if self.adaptation_samples() > MAX_WINDOW_SAMPLES as f64 {
            return Err(ConfigError::InvalidThroughput.into());
        }
        if self.reconfiguration_samples() > MAX_WINDOW_SAMPLES as f64 {
            return Err(ConfigError::InvalidWindow.into());
        }
        if self.min_concurrent_calls == 0
            || self.min_concurrent_calls > self.max_concurrent_calls
            || self.max_concurrent_calls > i32::MAX as u32
        {
            return Err(ConfigError::InvalidConcurrencyRange.into());
        }
        Ok(())
    }
}

fn window_size(samples: f64) -> usize {
    (samples as usize).clamp(1, MAX_WINDOW_SAMPLES)
}
