// tests/admission/async_queue_tests.rs

#[cfg(test)]
mod tests {

    use flux_admission::{AdmissionError, AsyncAdmissionQueue, BulkheadConfig, ConcurrencyLimiter, EventKind};
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::time::Instant;

    fn queue(max: u32, wait: Duration) -> AsyncAdmissionQueue {
        let config = BulkheadConfig::new(max).max_wait(wait);
        let limiter = ConcurrencyLimiter::with_config("async", config).unwrap();
        AsyncAdmissionQueue::new(limiter, Handle::current())
    }

    fn assert_quiescent(queue: &AsyncAdmissionQueue) {
        let metrics = queue.limiter().metrics();
        assert_eq!(metrics.in_flight_calls, 0);
        assert_eq!(metrics.queued_calls, 0);
        assert_eq!(metrics.available_concurrent_calls, metrics.max_concurrent_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_resolves_when_the_holder_releases() {
        let queue = queue(1, Duration::from_millis(500));
        let holder = queue.try_acquire_permission().unwrap();
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            holder.release();
        });

        let permit = queue.acquire_permission().await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(500));

        drop(permit);
        assert_quiescent(&queue);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_times_out() {
        let queue = queue(1, Duration::from_millis(500));
        let holder = queue.try_acquire_permission().unwrap();
        let mut events = queue.limiter().subscribe();
        let start = Instant::now();

        let outcome = queue.acquire_permission().await;
        assert_eq!(outcome.unwrap_err(), AdmissionError::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(queue.limiter().metrics().queued_calls, 0);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::CallRejected);
        assert_eq!(event.metadata_value("reason"), Some("Timed out waiting for a permit"));

        holder.release();
        assert_quiescent(&queue);
    }

    #[tokio::test]
    async fn futures_resolve_in_queue_order() {
        let queue = queue(1, Duration::from_secs(5));
        let holder = queue.try_acquire_permission().unwrap();

        let first = queue.acquire_permission();
        let second = queue.acquire_permission();
        assert!(!first.is_ready());
        assert_eq!(queue.limiter().metrics().queued_calls, 2);

        holder.release();
        let permit = first.await.unwrap();
        assert_eq!(queue.limiter().metrics().queued_calls, 1);

        permit.complete();
        let permit = second.await.unwrap();
        permit.complete();
        assert_quiescent(&queue);
    }

    #[tokio::test]
    async fn dropping_a_queued_future_cancels_it() {
        let queue = queue(1, Duration::from_secs(5));
        let holder = queue.try_acquire_permission().unwrap();
        let mut events = queue.limiter().subscribe();

        let waiting = queue.acquire_permission();
        assert_eq!(queue.limiter().metrics().queued_calls, 1);
        drop(waiting);
        assert_eq!(queue.limiter().metrics().queued_calls, 0);
        assert_eq!(
            events.try_recv().unwrap().metadata_value("reason"),
            Some("Permit acquisition was cancelled")
        );

        holder.release();
        assert_quiescent(&queue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timeouts_and_cancellations_racing_releases_lose_no_permits() {
        let queue = queue(2, Duration::ZERO);

        let mut tasks = Vec::new();
        for i in 0..400u64 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                let future = queue.acquire_permission_within(Duration::from_micros(i % 300 + 1));
                let outcome = if i % 3 == 0 {
                    // abandon some waits from the outside instead of via the timer
                    match tokio::time::timeout(Duration::from_micros(i % 200 + 1), future).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(AdmissionError::Cancelled),
                    }
                } else {
                    future.await
                };
                match outcome {
                    Ok(permit) => {
                        tokio::task::yield_now().await;
                        permit.complete();
                    }
                    Err(err) => assert!(err.is_rejection()),
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_quiescent(&queue);
    }

    #[tokio::test]
    async fn bounded_wait_list_rejects_overflow() {
        let config = BulkheadConfig::new(1).max_wait(Duration::from_secs(5)).max_queued(1);
        let limiter = ConcurrencyLimiter::with_config("async", config).unwrap();
        let queue = AsyncAdmissionQueue::new(limiter, Handle::current());
        let holder = queue.try_acquire_permission().unwrap();

        let waiting = queue.acquire_permission();
        let overflow = queue.acquire_permission();
        assert!(overflow.is_ready());
        assert_eq!(overflow.await.unwrap_err(), AdmissionError::PermissionDenied);

        holder.release();
        waiting.await.unwrap().release();
        assert_quiescent(&queue);
    }
}
