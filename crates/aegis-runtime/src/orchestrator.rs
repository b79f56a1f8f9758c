//! Resilience orchestrator.
//!
//! Front door for every AI call: consults the operation's circuit breaker,
//! runs the primary under bounded retries, falls back when needed, and
//! optionally memoizes the outcome in the shared request cache.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{CacheMetrics, CacheOrigin, CacheValue, RequestCache};
use crate::config::RuntimeConfig;
use crate::resilience::{
    until_cancelled, BreakerSnapshot, CircuitBreakerRegistry, Fallback, ResilienceError,
    ResilienceStats, Resolved, ResultSource, RetryExecutor, RunOptions,
};

/// A run outcome as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub data: serde_json::Value,
    pub source: ResultSource,
    pub attempts: u32,
}

impl CacheValue for CachedResult {
    fn confidence(&self) -> Option<f64> {
        self.data.confidence()
    }
}

/// Everything an operator needs to judge health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub cache: CacheMetrics,
    pub breakers: BTreeMap<String, BreakerSnapshot>,
    pub resilience: ResilienceStats,
}

/// Shared resilience layer. Construct once and share by `Arc`.
pub struct ResilienceOrchestrator {
    config: RuntimeConfig,
    executor: Arc<RetryExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: RequestCache<CachedResult, ResilienceError>,
    sweeper_started: AtomicBool,
}

impl ResilienceOrchestrator {
    pub fn new(config: RuntimeConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let executor = Arc::new(RetryExecutor::new(config.retry.clone(), Arc::clone(&breakers)));
        let cache = RequestCache::new(config.cache.clone());

        Self {
            config,
            executor,
            breakers,
            cache,
            sweeper_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &RequestCache<CachedResult, ResilienceError> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Run `primary` under `operation`'s breaker with retries and fallback.
    pub async fn run<'f, T, E, F, Fut>(
        &self,
        operation: &str,
        primary: F,
        fallback: Fallback<'f, T>,
        options: RunOptions<T>,
    ) -> Result<Resolved<T>, ResilienceError>
    where
        T: Send + 'f,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.executor.run(operation, primary, fallback, options).await
    }

    /// [`run`](Self::run) memoized under `cache_key`.
    ///
    /// Concurrent callers share one run. Only primary results are stored
    /// unless `options.cache_fallback` is set. When primary and fallback
    /// both fail, an expired entry wins over `options.fallback_data`.
    /// Cancellation abandons this caller's wait; the shared run continues
    /// for the others.
    pub async fn run_cached<T, E, F, Fut>(
        &self,
        operation: &str,
        cache_key: &str,
        primary: F,
        fallback: Fallback<'static, T>,
        options: RunOptions<T>,
    ) -> Result<Resolved<T>, ResilienceError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.ensure_sweeper();

        let ttl = options.ttl;
        let cache_fallback = options.cache_fallback;
        let mut cancel = options.cancel.clone();
        let mut shared_options = RunOptions {
            cancel: None,
            ..options
        };
        let fallback_data = shared_options.fallback_data.take();

        let executor = Arc::clone(&self.executor);
        let operation_name = operation.to_string();
        let fetch = move || async move {
            let resolved = executor
                .run(&operation_name, primary, fallback, shared_options)
                .await?;
            Ok::<_, ResilienceError>(CachedResult {
                data: serde_json::to_value(&resolved.value)?,
                source: resolved.source,
                attempts: resolved.attempts,
            })
        };
        let should_store =
            move |result: &CachedResult| result.source == ResultSource::Primary || cache_fallback;

        let lookup = self.cache.lookup(cache_key, fetch, ttl, should_store);
        let (cached, origin) = match until_cancelled(&mut cancel, lookup).await {
            Some(Ok(found)) => found,
            Some(Err(err @ ResilienceError::BothFailed { .. })) => {
                let Some(value) = fallback_data else {
                    return Err(err);
                };
                self.executor.record_fallback_data();
                tracing::debug!(operation, key = cache_key, error = %err, "Using fallback data");
                return Ok(Resolved {
                    value,
                    source: ResultSource::FallbackData,
                    attempts: 0,
                });
            }
            Some(Err(err)) => return Err(err),
            None => {
                self.executor.record_cancellation();
                tracing::debug!(operation, key = cache_key, "Cached run cancelled by caller");
                return Err(ResilienceError::Cancelled);
            }
        };

        let (source, attempts) = match origin {
            CacheOrigin::Hit => (ResultSource::Cache, 0),
            CacheOrigin::Stale => (ResultSource::StaleCache, 0),
            CacheOrigin::Fetched | CacheOrigin::Joined => (cached.source, cached.attempts),
        };

        Ok(Resolved {
            value: serde_json::from_value(cached.data)?,
            source,
            attempts,
        })
    }

    fn ensure_sweeper(&self) {
        if !self.sweeper_started.swap(true, Ordering::AcqRel) {
            self.cache.start_sweeper();
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, regex::Error> {
        self.cache.invalidate_pattern(pattern)
    }

    pub fn reset_circuit_breaker(&self, operation: &str) -> bool {
        self.breakers.reset(operation)
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.breakers.reset_all();
        tracing::info!("All circuits manually reset");
    }

    pub fn reset_metrics(&self) {
        self.executor.reset_stats();
        self.cache.reset_metrics();
    }

    /// Stop the sweeper and drop cache and breaker state. In-flight runs
    /// still complete for their callers.
    pub fn shutdown(&self) {
        self.cache.shutdown();
        self.breakers.clear();
        self.sweeper_started.store(false, Ordering::Release);
        tracing::info!("Resilience orchestrator shut down");
    }

    pub fn metrics(&self) -> HealthSnapshot {
        HealthSnapshot {
            captured_at: chrono::Utc::now(),
            cache: self.cache.metrics(),
            breakers: self.breakers.snapshot(),
            resilience: self.executor.stats(),
        }
    }

    pub fn breaker_metrics(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers.snapshot()
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }
}

impl Default for ResilienceOrchestrator {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        price: f64,
        confidence: f64,
    }

    fn quote(price: f64) -> Quote {
        Quote {
            price,
            confidence: 80.0,
        }
    }

    fn counting_primary(
        calls: &Arc<AtomicU32>,
        result: anyhow::Result<Quote>,
    ) -> impl FnMut() -> futures::future::BoxFuture<'static, anyhow::Result<Quote>> + Send + 'static
    {
        use futures::FutureExt;
        let calls = Arc::clone(calls);
        let result = result.map_err(|e| e.to_string());
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let result = result.clone().map_err(anyhow::Error::msg);
            async move { result }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cached_hits_on_second_call() {
        let orchestrator = ResilienceOrchestrator::default();
        let calls = Arc::new(AtomicU32::new(0));

        let first = orchestrator
            .run_cached(
                "pricing",
                "quote:1",
                counting_primary(&calls, Ok(quote(10.0))),
                Fallback::value(quote(0.0)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        let second = orchestrator
            .run_cached(
                "pricing",
                "quote:1",
                counting_primary(&calls, Ok(quote(99.0))),
                Fallback::value(quote(0.0)),
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(first.source, ResultSource::Primary);
        assert_eq!(first.attempts, 1);
        assert_eq!(second.value, quote(10.0));
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.cache().sweeper_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_results_are_not_cached_by_default() {
        let orchestrator = ResilienceOrchestrator::default();
        let calls = Arc::new(AtomicU32::new(0));
        let options = || RunOptions::default().with_max_retries(0);

        let degraded = orchestrator
            .run_cached(
                "pricing",
                "quote:2",
                counting_primary(&calls, Err(anyhow::anyhow!("down"))),
                Fallback::value(quote(1.0)),
                options(),
            )
            .await
            .unwrap();
        assert_eq!(degraded.source, ResultSource::Fallback);
        assert!(orchestrator.cache().is_empty());

        let cached = orchestrator
            .run_cached(
                "pricing",
                "quote:2",
                counting_primary(&calls, Err(anyhow::anyhow!("down"))),
                Fallback::value(quote(2.0)),
                options().cache_fallback(),
            )
            .await
            .unwrap();
        assert_eq!(cached.value, quote(2.0));
        assert_eq!(orchestrator.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_cancel_shared_run() {
        let orchestrator = Arc::new(ResilienceOrchestrator::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let slow_primary = || async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, anyhow::Error>(quote(5.0))
        };

        let cancelled = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .run_cached(
                        "pricing",
                        "quote:3",
                        slow_primary,
                        Fallback::value(quote(0.0)),
                        RunOptions::default().with_cancel(cancel_rx),
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;

        let joiner = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .run_cached(
                        "pricing",
                        "quote:3",
                        slow_primary,
                        Fallback::value(quote(0.0)),
                        RunOptions::default(),
                    )
                    .await
            }
        });

        sleep(Duration::from_millis(10)).await;
        cancel_tx.send(true).unwrap();

        assert!(cancelled.await.unwrap().unwrap_err().is_cancelled());
        let joined = joiner.await.unwrap().unwrap();
        assert_eq!(joined.value, quote(5.0));
        assert_eq!(joined.source, ResultSource::Primary);
        assert_eq!(orchestrator.cache().len(), 1);
        assert_eq!(orchestrator.metrics().resilience.cancellations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_state() {
        let orchestrator = ResilienceOrchestrator::default();
        orchestrator
            .run_cached(
                "scoring",
                "score:1",
                || async { Ok::<_, anyhow::Error>(quote(1.0)) },
                Fallback::value(quote(0.0)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(orchestrator.breaker_metrics().len(), 1);

        orchestrator.shutdown();

        assert!(orchestrator.cache().is_empty());
        assert!(orchestrator.breaker_metrics().is_empty());
        assert!(!orchestrator.cache().sweeper_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_reset_and_snapshot() {
        let mut config = RuntimeConfig::default();
        config.circuit_breaker.failure_threshold = 1;
        let orchestrator = ResilienceOrchestrator::new(config);

        orchestrator
            .run(
                "matching",
                || async { Err::<Quote, _>(anyhow::anyhow!("down")) },
                Fallback::value(quote(0.0)),
                RunOptions::default().with_max_retries(0),
            )
            .await
            .unwrap();
        assert_eq!(
            orchestrator.breaker_metrics()["matching"].state,
            CircuitState::Open
        );

        assert!(orchestrator.reset_circuit_breaker("matching"));
        assert_eq!(
            orchestrator.breaker_metrics()["matching"].state,
            CircuitState::Closed
        );

        let snapshot = serde_json::to_value(orchestrator.metrics()).unwrap();
        assert_eq!(snapshot["resilience"]["fallbacks"], 1);
        assert_eq!(snapshot["breakers"]["matching"]["state"], "closed");
        assert!(snapshot["captured_at"].is_string());

        orchestrator.reset_metrics();
        assert_eq!(orchestrator.metrics().resilience, ResilienceStats::default());
    }
}
