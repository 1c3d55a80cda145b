// src/lib.rs

//! # Flux Admission
//!
//! In-process admission control for calls to downstream services: a
//! lock-free token-bucket rate limiter, a bulkhead with a fair FIFO wait
//! queue, a future-based variant of that queue for async callers, and a
//! feedback controller that retunes the bulkhead from observed latency.
//!
//! ## Quick Example
//!
//! ```rust
//! use flux_admission::{BulkheadConfig, ConcurrencyLimiter, RateLimiterConfig, TokenRateLimiter};
//! use std::time::Duration;
//!
//! let limiter = TokenRateLimiter::new("api", RateLimiterConfig::new(10, Duration::from_secs(1))).unwrap();
//! if limiter.try_acquire_permission(1).is_ok() {
//!     println!("Request allowed");
//! }
//!
//! let bulkhead = ConcurrencyLimiter::with_config("db", BulkheadConfig::new(4)).unwrap();
//! let permit = bulkhead.try_acquire_permission().unwrap();
//! // ... call the database ...
//! bulkhead.on_complete(&permit);
//! ```

// private modules
mod adaptive;
mod async_queue;
mod bulkhead;
mod clock;
mod config;
mod errors;
mod events;
mod rate_limiter;
mod registry;
mod window;

// public API exports
pub use adaptive::{AdaptiveBulkhead, AdaptiveLimitController};
pub use async_queue::{AdmissionFuture, AsyncAdmissionQueue};
pub use bulkhead::{BulkheadMetrics, ConcurrencyLimiter, Permit};
pub use clock::{Clock, ClockError, MonotonicClock, SystemClock};
pub use config::{AdaptiveConfig, BulkheadConfig, MAX_WINDOW_SAMPLES, RateLimiterConfig, RefillStrategy};
pub use errors::{AdmissionError, ConfigError};
pub use events::{EventKind, EventPublisher, LimiterEvent};
pub use rate_limiter::TokenRateLimiter;
pub use registry::{BulkheadRegistry, RateLimiterRegistry, Registrable, Registry};
pub use window::MovingAverageWindow;
