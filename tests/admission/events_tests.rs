// tests/admission/events_tests.rs

#[cfg(test)]
mod tests {

    use crate::fixtures::test_clock::TestClock;
    use flux_admission::{
        BulkheadConfig, ConcurrencyLimiter, EventKind, RateLimiterConfig, TokenRateLimiter,
    };
    use std::time::Duration;

    #[test]
    fn rate_limiter_reports_decisions() {
        let limiter = TokenRateLimiter::with_config(
            "api",
            RateLimiterConfig::new(1, Duration::from_secs(1)),
            TestClock::new(0.0),
        )
        .unwrap();
        let mut events = limiter.subscribe();

        limiter.try_acquire_permission(1).unwrap();
        assert!(limiter.try_acquire_permission(1).is_err());

        let permitted = events.try_recv().unwrap();
        assert_eq!(permitted.name, "api");
        assert_eq!(permitted.kind, EventKind::CallPermitted);
        assert_eq!(permitted.metadata_value("permits"), Some("1"));

        let rejected = events.try_recv().unwrap();
        assert_eq!(rejected.kind, EventKind::CallRejected);
        assert_eq!(rejected.metadata_value("nanosToWait"), Some("1000000000"));
    }

    #[test]
    fn bulkhead_reports_the_call_lifecycle() {
        let bulkhead = ConcurrencyLimiter::with_config("db", BulkheadConfig::new(1)).unwrap();
        let mut events = bulkhead.subscribe();

        let permit = bulkhead.try_acquire_permission().unwrap();
        assert!(bulkhead.try_acquire_permission().is_err());
        bulkhead.on_complete(&permit);
        bulkhead.change_max_concurrent_calls(3).unwrap();
        bulkhead.change_max_concurrent_calls(2).unwrap();

        let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CallPermitted,
                EventKind::CallRejected,
                EventKind::CallFinished,
                EventKind::LimitIncreased,
                EventKind::LimitDecreased,
            ]
        );
    }

    #[test]
    fn completing_a_permit_twice_records_one_finish() {
        let bulkhead = ConcurrencyLimiter::with_config("db", BulkheadConfig::new(1)).unwrap();
        let permit = bulkhead.try_acquire_permission().unwrap();
        let mut events = bulkhead.subscribe();

        bulkhead.on_complete(&permit);
        bulkhead.on_complete(&permit);
        permit.complete();

        assert_eq!(events.try_recv().unwrap().kind, EventKind::CallFinished);
        assert!(events.try_recv().is_err());
        assert_eq!(bulkhead.available_permits(), 1);
    }

    #[test]
    fn queued_hand_off_reports_permitted() {
        let bulkhead = ConcurrencyLimiter::with_config(
            "db",
            BulkheadConfig::new(1).max_wait(Duration::from_secs(5)),
        )
        .unwrap();
        let held = bulkhead.try_acquire_permission().unwrap();

        let worker = bulkhead.clone();
        let waiter = std::thread::spawn(move || worker.acquire());
        while bulkhead.metrics().queued_calls == 0 {
            std::thread::yield_now();
        }

        let mut events = bulkhead.subscribe();
        held.release();
        let permit = waiter.join().unwrap().unwrap();

        let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::CallPermitted]);
        permit.complete();
    }
}
