//! Bounded retry with exponential backoff, per-attempt timeouts and a
//! fallback of last resort.

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
use super::error::{ResilienceError, Resolved, ResultSource};
use super::fallback::Fallback;
use super::stats::{ResilienceStats, RunCounters};
use crate::config::human_duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub backoff_multiplier: f64,

    /// Delay before the first retry
    #[serde(with = "human_duration")]
    pub base_delay: Duration,

    /// Cap on any single delay
    #[serde(with = "human_duration")]
    pub max_delay: Duration,

    /// Bound on each primary attempt and on the fallback
    #[serde(with = "human_duration")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_multiplier: 1.5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delays between attempts: `min(max_delay, base_delay * multiplier^(n-1))`
    /// for the n-th retry, one per retry.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.backoff_multiplier.max(1.0) as f32)
            .with_max_times(self.max_retries as usize)
            .build()
    }
}

/// Per-call overrides and options.
#[derive(Debug, Clone)]
pub struct RunOptions<T> {
    pub max_retries: Option<u32>,
    pub backoff_multiplier: Option<f64>,

    /// Attempt timeout override
    pub timeout: Option<Duration>,

    /// Skip the primary while the operation's circuit is open
    pub use_circuit_breaker: bool,

    /// Returned when the fallback fails too
    pub fallback_data: Option<T>,

    /// Flips to `true` to abandon the run
    pub cancel: Option<watch::Receiver<bool>>,

    /// TTL for cached results
    pub ttl: Option<Duration>,

    /// Cache fallback results as well as primary ones
    pub cache_fallback: bool,

    pub log_errors: bool,
}

impl<T> Default for RunOptions<T> {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff_multiplier: None,
            timeout: None,
            use_circuit_breaker: true,
            fallback_data: None,
            cancel: None,
            ttl: None,
            cache_fallback: false,
            log_errors: true,
        }
    }
}

impl<T> RunOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.use_circuit_breaker = false;
        self
    }

    pub fn with_fallback_data(mut self, data: T) -> Self {
        self.fallback_data = Some(data);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache_fallback(mut self) -> Self {
        self.cache_fallback = true;
        self
    }

    pub fn without_error_logging(mut self) -> Self {
        self.log_errors = false;
        self
    }
}

/// State of one run.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub operation: String,
    pub started_at: Instant,
    pub last_error: Option<ResilienceError>,
}

impl RetryContext {
    fn new(operation: &str, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            operation: operation.to_string(),
            started_at: Instant::now(),
            last_error: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Runs a primary under the operation's circuit breaker with bounded
/// retries, then the fallback.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    counters: RunCounters,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            config,
            breakers,
            counters: RunCounters::default(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn stats(&self) -> ResilienceStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    pub(crate) fn record_cancellation(&self) {
        RunCounters::incr(&self.counters.cancellations);
    }

    pub(crate) fn record_fallback_data(&self) {
        RunCounters::incr(&self.counters.fallback_data_used);
    }

    /// Run `primary` with retries, falling back when the circuit is open or
    /// every attempt failed.
    pub async fn run<'f, T, E, F, Fut>(
        &self,
        operation: &str,
        mut primary: F,
        fallback: Fallback<'f, T>,
        options: RunOptions<T>,
    ) -> Result<Resolved<T>, ResilienceError>
    where
        T: Send + 'f,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        RunCounters::incr(&self.counters.runs);

        let RunOptions {
            max_retries,
            backoff_multiplier,
            timeout: attempt_timeout,
            use_circuit_breaker,
            fallback_data,
            mut cancel,
            log_errors,
            ..
        } = options;

        let schedule = RetryConfig {
            max_retries: max_retries.unwrap_or(self.config.max_retries),
            backoff_multiplier: backoff_multiplier.unwrap_or(self.config.backoff_multiplier),
            attempt_timeout: attempt_timeout.unwrap_or(self.config.attempt_timeout),
            ..self.config.clone()
        };
        let mut ctx = RetryContext::new(operation, schedule.max_retries.saturating_add(1));
        let breaker = self.breakers.get_or_create(operation);

        if is_cancelled(&cancel) {
            self.record_cancellation();
            return Err(ResilienceError::Cancelled);
        }

        if use_circuit_breaker && !breaker.can_execute() {
            RunCounters::incr(&self.counters.circuit_rejections);
            tracing::debug!(operation, "Circuit open, using fallback");
            let rejected = ResilienceError::CircuitOpen(operation.to_string());
            return self
                .fall_back(&ctx, rejected, fallback, fallback_data, &schedule, &mut cancel, log_errors)
                .await;
        }
        let holds_probe = use_circuit_breaker && breaker.state().state == CircuitState::HalfOpen;
        if holds_probe {
            // a failed probe reopens the circuit; don't keep hammering it
            ctx.max_attempts = 1;
        }

        let mut delays = schedule.backoff();

        while ctx.attempt < ctx.max_attempts {
            ctx.attempt += 1;
            if ctx.attempt > 1 {
                RunCounters::incr(&self.counters.retries);
            }

            let outcome = until_cancelled(&mut cancel, timeout(schedule.attempt_timeout, primary())).await;

            let error = match outcome {
                None => return Err(self.abandon(&breaker, holds_probe, &ctx)),
                Some(Ok(Ok(value))) => {
                    breaker.on_success();
                    RunCounters::incr(&self.counters.primary_successes);
                    return Ok(Resolved {
                        value,
                        source: ResultSource::Primary,
                        attempts: ctx.attempt,
                    });
                }
                Some(Ok(Err(e))) => ResilienceError::primary(e),
                Some(Err(_)) => {
                    RunCounters::incr(&self.counters.timeouts);
                    ResilienceError::Timeout(schedule.attempt_timeout)
                }
            };

            breaker.on_failure();
            if log_errors {
                tracing::warn!(
                    operation,
                    attempt = ctx.attempt,
                    max_attempts = ctx.max_attempts,
                    error = %error,
                    "Attempt failed"
                );
            }
            ctx.last_error = Some(error);

            if ctx.attempt < ctx.max_attempts {
                if let Some(delay) = delays.next() {
                    tracing::debug!(operation, delay = ?delay, "Backing off before retry");
                    if until_cancelled(&mut cancel, sleep(delay)).await.is_none() {
                        return Err(self.abandon(&breaker, false, &ctx));
                    }
                }
            }
        }

        let primary_error = ctx
            .last_error
            .clone()
            .unwrap_or_else(|| ResilienceError::CircuitOpen(operation.to_string()));
        self.fall_back(&ctx, primary_error, fallback, fallback_data, &schedule, &mut cancel, log_errors)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fall_back<'a, T: Send + 'a>(
        &self,
        ctx: &RetryContext,
        primary_error: ResilienceError,
        fallback: Fallback<'a, T>,
        fallback_data: Option<T>,
        schedule: &RetryConfig,
        cancel: &mut Option<watch::Receiver<bool>>,
        log_errors: bool,
    ) -> Result<Resolved<T>, ResilienceError> {
        let outcome = until_cancelled(cancel, timeout(schedule.attempt_timeout, fallback.invoke())).await;

        let fallback_error = match outcome {
            None => {
                self.record_cancellation();
                return Err(ResilienceError::Cancelled);
            }
            Some(Ok(Ok(value))) => {
                RunCounters::incr(&self.counters.fallbacks);
                tracing::debug!(operation = %ctx.operation, attempts = ctx.attempt, "Resolved by fallback");
                return Ok(Resolved {
                    value,
                    source: ResultSource::Fallback,
                    attempts: ctx.attempt,
                });
            }
            Some(Ok(Err(e))) => ResilienceError::fallback(e),
            Some(Err(_)) => {
                RunCounters::incr(&self.counters.timeouts);
                ResilienceError::Timeout(schedule.attempt_timeout)
            }
        };

        if log_errors {
            tracing::warn!(operation = %ctx.operation, error = %fallback_error, "Fallback failed");
        }

        if let Some(value) = fallback_data {
            RunCounters::incr(&self.counters.fallback_data_used);
            return Ok(Resolved {
                value,
                source: ResultSource::FallbackData,
                attempts: ctx.attempt,
            });
        }

        RunCounters::incr(&self.counters.failures);
        let error = ResilienceError::BothFailed {
            primary: Box::new(primary_error),
            fallback: Box::new(fallback_error),
        };
        if log_errors {
            tracing::error!(
                operation = %ctx.operation,
                attempts = ctx.attempt,
                elapsed = ?ctx.elapsed(),
                error = %error,
                "Primary and fallback both failed"
            );
        }
        Err(error)
    }

    fn abandon(&self, breaker: &CircuitBreaker, holds_probe: bool, ctx: &RetryContext) -> ResilienceError {
        if holds_probe && ctx.attempt <= 1 {
            breaker.release_probe();
        }
        self.record_cancellation();
        tracing::debug!(operation = %ctx.operation, attempt = ctx.attempt, "Run cancelled");
        ResilienceError::Cancelled
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolve to `None` as soon as `cancel` flips to `true`.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &mut Option<watch::Receiver<bool>>,
    fut: F,
) -> Option<F::Output> {
    let Some(rx) = cancel else {
        return Some(fut.await);
    };
    if *rx.borrow() {
        return None;
    }

    tokio::select! {
        out = fut => Some(out),
        _ = cancelled(rx) => None,
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // a dropped sender can no longer cancel
    let closed = rx.wait_for(|flag| *flag).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
