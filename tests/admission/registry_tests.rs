// tests/admission/registry_tests.rs

#[cfg(test)]
mod tests {

    use flux_admission::{BulkheadConfig, BulkheadRegistry, RateLimiterConfig, RateLimiterRegistry};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_lookups_share_one_instance() {
        let registry = BulkheadRegistry::new(BulkheadConfig::new(2));

        let limiters: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.get_or_create("db").unwrap()))
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(limiters.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn registered_limiters_keep_their_state() {
        let registry = RateLimiterRegistry::new(RateLimiterConfig::new(1, Duration::from_secs(60)));

        registry.get_or_create("api").unwrap().try_acquire_permission(1).unwrap();
        let again = registry.get("api").unwrap();
        assert!(again.try_acquire_permission(1).is_err());

        registry.remove("api");
        let fresh = registry.get_or_create("api").unwrap();
        assert!(fresh.try_acquire_permission(1).is_ok());
    }
}
