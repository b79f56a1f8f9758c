//! Adaptive TTL policy.
//!
//! Volatile data (market, prices) expires fast, stable data (profiles,
//! trust) lives long, and high-confidence results earn an extended window.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CacheConfig;
use crate::config::human_duration;

/// Keys containing any of `contains` get `ttl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlRule {
    pub contains: Vec<String>,

    #[serde(with = "human_duration")]
    pub ttl: Duration,
}

impl TtlRule {
    pub fn new(contains: &[&str], ttl: Duration) -> Self {
        Self {
            contains: contains.iter().map(|s| s.to_string()).collect(),
            ttl,
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.contains.iter().any(|needle| key.contains(needle.as_str()))
    }
}

/// Rules applied in order; the first match wins.
pub fn default_ttl_rules() -> Vec<TtlRule> {
    vec![
        TtlRule::new(&["market", "price"], Duration::from_secs(60)),
        TtlRule::new(&["score", "analysis"], Duration::from_secs(5 * 60)),
        TtlRule::new(&["profile", "trust"], Duration::from_secs(30 * 60)),
    ]
}

#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    adaptive: bool,
    rules: Vec<TtlRule>,
    high_confidence_threshold: f64,
    high_confidence_ttl: Duration,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            adaptive: config.adaptive_ttl,
            rules: config.ttl_rules.clone(),
            high_confidence_threshold: config.high_confidence_threshold,
            high_confidence_ttl: config.high_confidence_ttl,
        }
    }

    /// TTL for a freshly fetched value stored under `key`.
    pub fn ttl_for(&self, key: &str, confidence: Option<f64>) -> Duration {
        if !self.adaptive {
            return self.default_ttl;
        }

        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(key)) {
            return rule.ttl;
        }

        match confidence {
            Some(c) if c > self.high_confidence_threshold => self.high_confidence_ttl,
            _ => self.default_ttl,
        }
    }
}
