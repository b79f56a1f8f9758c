use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from a resilient run.
///
/// Causes are held in `Arc` so one failure can be handed to every caller
/// waiting on a shared fetch.
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    #[error("primary failed: {0:#}")]
    PrimaryFailed(Arc<anyhow::Error>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit open for operation '{0}'")]
    CircuitOpen(String),

    #[error("fallback failed: {0:#}")]
    FallbackFailed(Arc<anyhow::Error>),

    #[error("primary and fallback both failed (primary: {primary}; fallback: {fallback})")]
    BothFailed {
        primary: Box<ResilienceError>,
        fallback: Box<ResilienceError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ResilienceError {
    pub fn primary(err: impl Into<anyhow::Error>) -> Self {
        Self::PrimaryFailed(Arc::new(err.into()))
    }

    pub fn fallback(err: impl Into<anyhow::Error>) -> Self {
        Self::FallbackFailed(Arc::new(err.into()))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Which path produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Primary,
    Fallback,
    FallbackData,
    Cache,
    StaleCache,
}

impl ResultSource {
    /// True when the value did not come from a healthy primary call.
    pub fn is_degraded(self) -> bool {
        !matches!(self, Self::Primary | Self::Cache)
    }
}

/// A successful run and how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ResultSource,

    /// Primary attempts made; zero on a short-circuit or cache hit
    pub attempts: u32,
}

impl<T> Resolved<T> {
    pub fn is_degraded(&self) -> bool {
        self.source.is_degraded()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            source: self.source,
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_failed_names_both_causes() {
        let err = ResilienceError::BothFailed {
            primary: Box::new(ResilienceError::Timeout(Duration::from_secs(30))),
            fallback: Box::new(ResilienceError::fallback(anyhow::anyhow!("no heuristic"))),
        };
        let message = err.to_string();
        assert!(message.contains("timed out after 30s"));
        assert!(message.contains("no heuristic"));
    }

    #[test]
    fn test_degraded_sources() {
        assert!(!ResultSource::Primary.is_degraded());
        assert!(!ResultSource::Cache.is_degraded());
        assert!(ResultSource::Fallback.is_degraded());
        assert!(ResultSource::FallbackData.is_degraded());
        assert!(ResultSource::StaleCache.is_degraded());
    }
}
