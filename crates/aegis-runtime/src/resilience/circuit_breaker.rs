//! Circuit breaker to prevent cascade failures.
//!
//! When an operation fails repeatedly, its circuit opens and subsequent
//! calls go straight to the fallback until a recovery probe succeeds.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::human_duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time after the last failure before a recovery probe is allowed
    #[serde(with = "human_duration")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// All calls bypass the primary
    Open,

    /// One probe call decides whether to close
    HalfOpen,
}

/// Observable view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_failures: u64,
    pub rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_granted_at: Option<Instant>,
    total_failures: u64,
    rejections: u64,
}

/// Breaker for a single operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                probe_granted_at: None,
                total_failures: 0,
                rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may go to the primary.
    ///
    /// Moves an open circuit to half-open once the reset timeout has passed
    /// since the last failure, and hands out the single half-open probe. A
    /// probe that never reports back is re-granted after another reset
    /// timeout.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner.last_failure_at.map_or(true, |at| {
                    now.saturating_duration_since(at) >= self.config.reset_timeout
                });
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_granted_at = Some(now);
                    tracing::info!(operation = %self.name, "Circuit half-open, allowing recovery probe");
                }
                cooled
            }
            CircuitState::HalfOpen => {
                let probe_outstanding = inner.probe_granted_at.is_some_and(|at| {
                    now.saturating_duration_since(at) < self.config.reset_timeout
                });
                if !probe_outstanding {
                    inner.probe_granted_at = Some(now);
                }
                !probe_outstanding
            }
        };

        if !allowed {
            inner.rejections += 1;
            tracing::debug!(operation = %self.name, state = ?inner.state, "Circuit rejected call");
        }
        allowed
    }

    /// Record a successful primary call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_granted_at = None;

        if previous != CircuitState::Closed {
            tracing::info!(operation = %self.name, "Circuit closed after successful recovery");
        }
    }

    /// Record a failed primary call.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe_granted_at = None;
                tracing::warn!(operation = %self.name, "Circuit reopened after failed recovery probe");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    operation = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    /// Give back a half-open probe that was granted but never ran.
    pub(crate) fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_granted_at = None;
        }
    }

    pub fn state(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            total_failures: inner.total_failures,
            rejections: inner.rejections,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        inner.probe_granted_at = None;
    }
}

/// Per-operation breakers, created lazily on first use of a name.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone()))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// Returns `false` if no breaker exists under `name`.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                tracing::info!(operation = %name, "Circuit manually reset");
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn clear(&self) {
        self.breakers.write().clear();
    }
}
