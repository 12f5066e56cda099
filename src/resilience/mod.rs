//! # Resilience Module
//!
//! Fault-tolerance primitives shared by every stage consumer: the per-stage
//! circuit breaker and the bounded exponential-backoff retry wrapper.
//! Composition order is fixed at the call sites - retry wraps the breaker, so
//! each attempt re-checks breaker state and fails fast once a circuit opens.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docflow_core::resilience::{
//!     retry_with_backoff, BreakerSettings, CircuitBreaker, RetryPolicy,
//! };
//! use docflow_core::stages::{StageKind, StageServiceError};
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(StageKind::Translation, BreakerSettings::default());
//!
//! let result = retry_with_backoff(RetryPolicy::default(), || {
//!     breaker.execute(|| async {
//!         Ok::<_, StageServiceError>("translated".to_string())
//!     })
//! })
//! .await;
//! # let _ = result;
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use config::BreakerSettings;
pub use metrics::BreakerSnapshot;
pub use retry::{retry_with_backoff, Recoverable, RetryPolicy};
