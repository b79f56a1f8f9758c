//! Resilience patterns for aegis-runtime.
//!
//! This module provides:
//! - Per-operation circuit breakers
//! - Bounded retry with exponential backoff and attempt timeouts
//! - Fallbacks and static fallback data

mod circuit_breaker;
mod error;
mod fallback;
mod retry;
mod stats;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use error::{ResilienceError, Resolved, ResultSource};
pub use fallback::Fallback;
pub use retry::{RetryConfig, RetryContext, RetryExecutor, RunOptions};
pub use stats::ResilienceStats;

pub(crate) use retry::until_cancelled;
