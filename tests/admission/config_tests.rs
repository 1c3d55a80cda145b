// tests/admission/config_tests.rs

#[cfg(test)]
mod tests {

    use crate::fixtures::test_clock::TestClock;
    use flux_admission::{
        AdaptiveBulkhead, AdaptiveConfig, AdmissionError, BulkheadConfig, ConcurrencyLimiter, ConfigError,
        MAX_WINDOW_SAMPLES, RateLimiterConfig, RefillStrategy, TokenRateLimiter,
    };
    use std::time::Duration;

    fn config_error(result: Result<(), AdmissionError>) -> ConfigError {
        match result {
            Err(AdmissionError::InvalidConfig(err)) => err,
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    fn adaptive() -> AdaptiveConfig {
        AdaptiveConfig::new(Duration::from_millis(50), Duration::from_millis(200), 100.0)
    }

    #[test]
    fn rate_limiter_defaults() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.limit_for_period(), 50);
        assert_eq!(config.limit_refresh_period(), Duration::from_nanos(500));
        assert_eq!(config.timeout_duration(), Duration::from_secs(5));
        assert_eq!(config.capacity(), 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rate_limiter_rejects_bad_values() {
        let zero_limit = RateLimiterConfig::new(0, Duration::from_secs(1));
        assert_eq!(config_error(zero_limit.validate()), ConfigError::InvalidLimitForPeriod);

        let zero_period = RateLimiterConfig::new(1, Duration::ZERO);
        assert_eq!(config_error(zero_period.validate()), ConfigError::InvalidRefreshPeriod);

        let small_burst = RateLimiterConfig::new(5, Duration::from_secs(1)).burst(4);
        assert_eq!(config_error(small_burst.validate()), ConfigError::InvalidBurstLimit);

        // a refill interval shorter than a nanosecond cannot be expressed
        let too_fine = RateLimiterConfig::new(10, Duration::from_nanos(5)).strategy(RefillStrategy::Refill);
        assert_eq!(config_error(too_fine.validate()), ConfigError::InvalidRefreshPeriod);
    }

    #[test]
    fn invalid_rate_limiter_is_never_built() {
        let config = RateLimiterConfig::new(0, Duration::from_secs(1));
        let result = TokenRateLimiter::with_config("api", config, TestClock::new(0.0));
        assert!(matches!(
            result,
            Err(AdmissionError::InvalidConfig(ConfigError::InvalidLimitForPeriod))
        ));
    }

    #[test]
    fn bulkhead_defaults_and_validation() {
        let config = BulkheadConfig::default();
        assert_eq!(config.max_concurrent_calls(), 25);
        assert_eq!(config.max_wait_duration(), Duration::ZERO);
        assert_eq!(config.max_queued_calls(), None);

        assert_eq!(
            config_error(BulkheadConfig::new(0).validate()),
            ConfigError::InvalidMaxConcurrentCalls
        );
        assert!(matches!(
            ConcurrencyLimiter::with_config("db", BulkheadConfig::new(0)),
            Err(AdmissionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn resizing_to_zero_is_rejected() {
        let bulkhead = ConcurrencyLimiter::with_config("db", BulkheadConfig::new(2)).unwrap();
        assert!(bulkhead.change_max_concurrent_calls(0).is_err());
        assert_eq!(bulkhead.max_concurrent_calls(), 2);
    }

    #[test]
    fn adaptive_window_sizes() {
        let config = adaptive()
            .adaptation_window(Duration::from_millis(1500))
            .reconfiguration_window(Duration::from_secs(10));
        assert_eq!(config.adaptation_window_size(), 150);
        assert_eq!(config.reconfiguration_window_size(), 7);
        assert_eq!(config.initial_concurrent_calls(), 5);
    }

    #[test]
    fn adaptive_rejects_bad_values() {
        let zero_throughput =
            AdaptiveConfig::new(Duration::from_millis(50), Duration::from_millis(200), 0.0);
        assert_eq!(config_error(zero_throughput.validate()), ConfigError::InvalidThroughput);

        let inverted = AdaptiveConfig::new(Duration::from_millis(50), Duration::from_millis(10), 1.0);
        assert_eq!(config_error(inverted.validate()), ConfigError::InvalidLatency);

        let no_drop = adaptive().concurrency_drop_multiplier(1.0);
        assert_eq!(config_error(no_drop.validate()), ConfigError::InvalidMultiplier);

        let short_reconfiguration = adaptive()
            .adaptation_window(Duration::from_secs(10))
            .reconfiguration_window(Duration::from_secs(1));
        assert_eq!(config_error(short_reconfiguration.validate()), ConfigError::InvalidWindow);

        let empty_range = adaptive().concurrency_range(5, 4);
        assert_eq!(config_error(empty_range.validate()), ConfigError::InvalidConcurrencyRange);
    }

    #[test]
    fn adaptive_latency_floor_may_not_exceed_the_cap() {
        let inverted = AdaptiveConfig::new(Duration::from_millis(10), Duration::from_millis(20), 10.0)
            .low_latency_multiplier(3.0);
        assert_eq!(config_error(inverted.validate()), ConfigError::InvalidMultiplier);

        let touching = AdaptiveConfig::new(Duration::from_millis(10), Duration::from_millis(20), 10.0)
            .low_latency_multiplier(2.0);
        assert!(touching.validate().is_ok());
    }

    #[test]
    fn adaptive_windows_are_bounded() {
        let fine_grained = adaptive()
            .adaptation_window(Duration::from_nanos(1))
            .reconfiguration_window(Duration::from_secs(3600));
        assert_eq!(config_error(fine_grained.validate()), ConfigError::InvalidWindow);
        assert!(AdaptiveBulkhead::with_config("orders", fine_grained.clone()).is_err());
        assert!(fine_grained.reconfiguration_window_size() <= MAX_WINDOW_SAMPLES);

        let flood = AdaptiveConfig::new(Duration::from_millis(50), Duration::from_millis(200), 1e12);
        assert_eq!(config_error(flood.validate()), ConfigError::InvalidThroughput);
        assert!(AdaptiveBulkhead::with_config("orders", flood.clone()).is_err());
        assert_eq!(flood.adaptation_window_size(), MAX_WINDOW_SAMPLES);
    }
}
