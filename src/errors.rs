// src/errors.rs

// error handling for the admission limiters

// dependencies
use std::error::Error;
use std::fmt;

use crate::clock::ClockError;

/// Error type returned by every admission operation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    PermissionDenied,             // limiter full, rejected without waiting
    Timeout,                      // a queued caller outlived its wait budget
    Cancelled,                    // the caller gave up before resolution
    InvalidConfig(ConfigError),   // rejected at construction time
    ClockError(ClockError),       // the limiter clock could not be read
}

/// The configuration field that failed validation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    InvalidLimitForPeriod,   // for limit_for_period == 0
    InvalidRefreshPeriod,    // for a zero period, or one shorter than a nanosecond per permit
    InvalidBurstLimit,       // for burst < limit_for_period
    InvalidMaxConcurrentCalls,
    InvalidThroughput,       // for a non-positive or non-finite throughput
    InvalidLatency,
    InvalidMultiplier,
    InvalidWindow,
    InvalidConcurrencyRange, // for min > max or min == 0
}

impl AdmissionError {
    /// Whether the caller was turned away by the limiter itself, as opposed
    /// to misconfiguration or a broken clock.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AdmissionError::PermissionDenied | AdmissionError::Timeout | AdmissionError::Cancelled
        )
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AdmissionError::PermissionDenied => write!(f, "Permission denied: limiter is full"),
            AdmissionError::Timeout => write!(f, "Timed out waiting for a permit"),
            AdmissionError::Cancelled => write!(f, "Permit acquisition was cancelled"),
            AdmissionError::InvalidConfig(err) => write!(f, "Invalid configuration: {}", err),
            AdmissionError::ClockError(err) => write!(f, "Clock error occurred: {}", err),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::InvalidLimitForPeriod => "limit for period must be positive",
            ConfigError::InvalidRefreshPeriod => {
                "refresh period must be positive and at least one nanosecond per permit"
            }
            ConfigError::InvalidBurstLimit => {
                "burst limit must not be smaller than the limit for period"
            }
            ConfigError::InvalidMaxConcurrentCalls => "max concurrent calls must be positive",
            ConfigError::InvalidThroughput => "desirable average throughput must be positive",
            ConfigError::InvalidLatency => {
                "latencies must be positive and the acceptable maximum must not be below the desirable latency"
            }
            ConfigError::InvalidMultiplier => "multiplier is out of range",
            ConfigError::InvalidWindow => {
                "windows must be positive and reconfiguration must not be shorter than adaptation"
            }
            ConfigError::InvalidConcurrencyRange => {
                "concurrency range must satisfy 0 < min <= max"
            }
        };
        f.write_str(msg)
    }
}

impl Error for AdmissionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AdmissionError::InvalidConfig(err) => Some(err),
            _ => None,
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for AdmissionError {
    fn from(err: ConfigError) -> Self {
        AdmissionError::InvalidConfig(err)
    }
}

impl From<ClockError> for AdmissionError {
    fn from(err: ClockError) -> Self {
        AdmissionError::ClockError(err)
    }
}
