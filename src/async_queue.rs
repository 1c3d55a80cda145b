// src/async_queue.rs

//! Non-blocking admission on top of [`ConcurrencyLimiter`].
//!
//! Callers get an [`AdmissionFuture`] instead of a parked thread. Each queued
//! entry owns a one-shot channel and a timeout task spawned on the runtime
//! handle the queue was built with. The timeout task, a releasing caller and
//! the future's own drop all race for the same entry; whoever wins its state
//! transition resolves it, and every loser leaves the permit count untouched.

// dependencies
use crate::bulkhead::{BulkheadCore, ConcurrencyLimiter, Enqueued, Permit, QueuedAcquirer};
use crate::errors::AdmissionError;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Hands out permits of a [`ConcurrencyLimiter`] as futures.
#[derive(Debug, Clone)]
pub struct AsyncAdmissionQueue {
    limiter: ConcurrencyLimiter,
    runtime: Handle,
}

impl AsyncAdmissionQueue {
    /// Timeout tasks are spawned on `runtime`, which must have its time
    /// driver enabled.
    pub fn new(limiter: ConcurrencyLimiter, runtime: Handle) -> Self {
        Self { limiter, runtime }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Take a permit if one is free right now.
    pub fn try_acquire_permission(&self) -> Result<Permit, AdmissionError> {
        self.limiter.try_acquire_permission()
    }

    /// Queue for a permit for up to the limiter's max wait duration.
    pub fn acquire_permission(&self) -> AdmissionFuture {
        self.acquire_permission_within(self.limiter.max_wait_duration())
    }

    /// Queue for a permit for up to `timeout`. The caller's place in the
    /// queue is taken when this is called, not when the future is first
    /// polled.
    pub fn acquire_permission_within(&self, timeout: Duration) -> AdmissionFuture {
        let core = Arc::clone(self.limiter.core());
        if core.try_take() {
            core.publish_permitted();
            return AdmissionFuture::ready(Ok(Permit::granted(core)));
        }
        if timeout.is_zero() {
            return AdmissionFuture::rejected(&core, AdmissionError::PermissionDenied);
        }

        let (sender, receiver) = oneshot::channel();
        let acquirer = Arc::new(QueuedAcquirer::channel(sender));
        match core.enqueue(&acquirer) {
            Enqueued::Acquired => {
                core.publish_permitted();
                return AdmissionFuture::ready(Ok(Permit::granted(core)));
            }
            Enqueued::Full => {
                return AdmissionFuture::rejected(&core, AdmissionError::PermissionDenied);
            }
            Enqueued::Queued => {}
        }

        let timer = self.runtime.spawn(expire(
            Arc::clone(&core),
            Arc::clone(&acquirer),
            timeout,
        ));
        acquirer.set_timer(timer);

        AdmissionFuture {
            inner: Inner::Waiting {
                core,
                acquirer,
                receiver,
            },
        }
    }
}

async fn expire(core: Arc<BulkheadCore>, acquirer: Arc<QueuedAcquirer>, after: Duration) {
    tokio::time::sleep(after).await;
    if acquirer.try_cancel() {
        core.remove(&acquirer);
        core.publish_rejected(&AdmissionError::Timeout);
        acquirer.notify(Err(AdmissionError::Timeout));
    }
}

/// Resolves to a permit, or to the reason none was granted.
///
/// Dropping the future before it resolves gives up the caller's place in
/// the queue. If a permit had already been handed over but not yet
/// collected, it goes straight back to the limiter.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled, and dropping this one gives up the queued permit"]
pub struct AdmissionFuture {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Ready(Result<Permit, AdmissionError>),
    Waiting {
        core: Arc<BulkheadCore>,
        acquirer: Arc<QueuedAcquirer>,
        receiver: oneshot::Receiver<Result<(), AdmissionError>>,
    },
    Done,
}

impl AdmissionFuture {
    fn ready(outcome: Result<Permit, AdmissionError>) -> Self {
        Self {
            inner: Inner::Ready(outcome),
        }
    }

    fn rejected(core: &BulkheadCore, err: AdmissionError) -> Self {
        core.publish_rejected(&err);
        Self::ready(Err(err))
    }

    /// Whether the outcome was decided without queueing.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(_))
    }
}

impl Future for AdmissionFuture {
    type Output = Result<Permit, AdmissionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Inner::Waiting { receiver, .. } = &mut this.inner {
            let delivered = ready!(Pin::new(receiver).poll(cx));
            if let Inner::Waiting { core, acquirer, .. } = mem::replace(&mut this.inner, Inner::Done)
            {
                return Poll::Ready(match delivered {
                    Ok(Ok(())) => Ok(Permit::new(core, acquirer)),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(AdmissionError::Cancelled),
                });
            }
        }

        match mem::replace(&mut this.inner, Inner::Done) {
            Inner::Ready(outcome) => Poll::Ready(outcome),
            _ => panic!("AdmissionFuture polled after completion"),
        }
    }
}

impl Drop for AdmissionFuture {
    fn drop(&mut self) {
        if let Inner::Waiting { core, acquirer, .. } = &self.inner {
            if acquirer.try_cancel() {
                core.remove(acquirer);
                core.publish_rejected(&AdmissionError::Cancelled);
                acquirer.notify(Err(AdmissionError::Cancelled));
            } else if acquirer.try_release() {
                // handed a permit that never reached the caller
                core.release();
            }
        }
    }
}
