//! # aegis-runtime
//!
//! Resilience and caching layer for AI calls.
//!
//! Model calls are slow, rate limited and occasionally down. This crate
//! puts three things between callers and the model:
//!
//! - a [`RequestCache`] with adaptive TTLs, request deduplication and
//!   stale-on-error serving,
//! - a per-operation [`CircuitBreaker`] so a failing model stops being
//!   called,
//! - a [`RetryExecutor`] with exponential backoff, attempt timeouts and a
//!   fallback chain that always ends in an answer when static data is given.
//!
//! [`ResilienceOrchestrator`] combines them; [`AnalysisEngine`] uses the
//! orchestrator to answer marketplace questions, falling back to the
//! deterministic heuristics of `aegis-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aegis_runtime::{Fallback, ResilienceOrchestrator, RunOptions, RuntimeConfig};
//!
//! let orchestrator = ResilienceOrchestrator::new(RuntimeConfig::from_env()?);
//!
//! let resolved = orchestrator
//!     .run_cached(
//!         "pricing",
//!         "price:42:3000",
//!         || async { call_model().await },
//!         Fallback::sync(|| heuristic_price()),
//!         RunOptions::default().with_fallback_data(canned_price()),
//!     )
//!     .await?;
//!
//! if resolved.is_degraded() {
//!     tracing::warn!(source = ?resolved.source, "Served a degraded answer");
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod providers;
pub mod resilience;

pub use cache::{CacheConfig, CacheMetrics, CacheOrigin, CacheValue, RequestCache};
pub use config::{ConfigError, ProviderSettings, RuntimeConfig};
pub use engine::{AnalysisEngine, AnalysisEngineBuilder, AnalysisStrategy, StrategyError};
pub use orchestrator::{CachedResult, HealthSnapshot, ResilienceOrchestrator};
pub use providers::{JsonAnswer, JsonPrompt, LlmProvider, ProviderError};
pub use resilience::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    Fallback, ResilienceError, ResilienceStats, Resolved, ResultSource, RetryConfig,
    RetryExecutor, RunOptions,
};
