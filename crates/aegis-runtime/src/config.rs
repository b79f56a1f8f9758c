//! Runtime configuration.
//!
//! Loaded from defaults, environment variables, or YAML. Durations are
//! written as humantime strings (`"5m"`, `"1500ms"`) or bare integers in
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Settings for the LLM-backed strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub model: String,

    /// Request timeout of the HTTP client
    #[serde(with = "human_duration")]
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub provider: ProviderSettings,

    /// Never call the LLM; serve heuristics only
    pub offline_mode: bool,
}

impl RuntimeConfig {
    /// Load from the process environment.
    ///
    /// Environment variables:
    /// - `AI_CACHE_TTL`: default cache TTL (default: 5m)
    /// - `AI_CACHE_SIZE`: max cache entries (default: 1000)
    /// - `AI_ADAPTIVE_TTL`: "false" disables adaptive TTL
    /// - `AI_CACHE_CLEANUP`: expiry sweep period (default: 1h)
    /// - `AI_FALLBACK_RETRIES`: retries after the first attempt (default: 2)
    /// - `AI_BACKOFF_MULTIPLIER`: backoff growth factor (default: 1.5)
    /// - `AI_CIRCUIT_BREAKER_THRESHOLD`: failures before opening (default: 5)
    /// - `AI_CIRCUIT_RESET_TIMEOUT`: open duration before a probe (default: 60s)
    /// - `AI_ATTEMPT_TIMEOUT`: bound on each attempt (default: 30s)
    /// - `GEMINI_MODEL`, `GEMINI_TIMEOUT`: provider settings
    /// - `OFFLINE_MODE`: "true" disables LLM calls
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ttl) = env_duration(&lookup, "AI_CACHE_TTL")? {
            config.cache.default_ttl = ttl;
        }
        if let Some(size) = env_parse(&lookup, "AI_CACHE_SIZE")? {
            config.cache.max_size = size;
        }
        if let Some(value) = lookup("AI_ADAPTIVE_TTL") {
            config.cache.adaptive_ttl = !value.trim().eq_ignore_ascii_case("false");
        }
        if let Some(interval) = env_duration(&lookup, "AI_CACHE_CLEANUP")? {
            config.cache.cleanup_interval = interval;
        }

        if let Some(retries) = env_parse(&lookup, "AI_FALLBACK_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(multiplier) = env_parse(&lookup, "AI_BACKOFF_MULTIPLIER")? {
            config.retry.backoff_multiplier = multiplier;
        }
        if let Some(timeout) = env_duration(&lookup, "AI_ATTEMPT_TIMEOUT")? {
            config.retry.attempt_timeout = timeout;
        }

        if let Some(threshold) = env_parse(&lookup, "AI_CIRCUIT_BREAKER_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(reset) = env_duration(&lookup, "AI_CIRCUIT_RESET_TIMEOUT")? {
            config.circuit_breaker.reset_timeout = reset;
        }

        if let Some(model) = lookup("GEMINI_MODEL").filter(|m| !m.trim().is_empty()) {
            config.provider.model = model.trim().to_string();
        }
        if let Some(timeout) = env_duration(&lookup, "GEMINI_TIMEOUT")? {
            config.provider.timeout = timeout;
        }

        if let Some(value) = lookup("OFFLINE_MODE") {
            config.offline_mode = value.trim().eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check bounds; reports every violation at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.cache.default_ttl < Duration::from_secs(1) {
            errors.push("cache.default_ttl must be at least 1s".to_string());
        }
        if self.cache.max_size < 10 {
            errors.push("cache.max_size must be at least 10".to_string());
        }
        if self.cache.cleanup_interval.is_zero() {
            errors.push("cache.cleanup_interval must be non-zero".to_string());
        }
        if !(self.retry.backoff_multiplier >= 1.0 && self.retry.backoff_multiplier.is_finite()) {
            errors.push("retry.backoff_multiplier must be a finite value >= 1.0".to_string());
        }
        if self.retry.attempt_timeout.is_zero() {
            errors.push("retry.attempt_timeout must be non-zero".to_string());
        }
        if self.circuit_breaker.failure_threshold < 1 {
            errors.push("circuit_breaker.failure_threshold must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn env_duration<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            parse_duration(&value).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Parse `"1500"` (milliseconds) or a humantime string such as `"5m"`.
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(_) => humantime::parse_duration(value),
    }
}

/// Serde adapter for durations in config files.
pub(crate) mod human_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
            Raw::Text(text) => super::parse_duration(&text).map_err(de::Error::custom),
        }
    }
}
