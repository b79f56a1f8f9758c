use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Run outcome counters.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub runs: AtomicU64,
    pub primary_successes: AtomicU64,
    pub fallbacks: AtomicU64,
    pub fallback_data_used: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub circuit_rejections: AtomicU64,
    pub cancellations: AtomicU64,
    pub retries: AtomicU64,
}

impl RunCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn all(&self) -> [&AtomicU64; 9] {
        [
            &self.runs,
            &self.primary_successes,
            &self.fallbacks,
            &self.fallback_data_used,
            &self.failures,
            &self.timeouts,
            &self.circuit_rejections,
            &self.cancellations,
            &self.retries,
        ]
    }

    pub fn reset(&self) {
        for counter in self.all() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ResilienceStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ResilienceStats {
            runs: load(&self.runs),
            primary_successes: load(&self.primary_successes),
            fallbacks: load(&self.fallbacks),
            fallback_data_used: load(&self.fallback_data_used),
            failures: load(&self.failures),
            timeouts: load(&self.timeouts),
            circuit_rejections: load(&self.circuit_rejections),
            cancellations: load(&self.cancellations),
            retries: load(&self.retries),
        }
    }
}

/// Snapshot of [`RunCounters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceStats {
    pub runs: u64,
    pub primary_successes: u64,
    pub fallbacks: u64,
    pub fallback_data_used: u64,
    /// Runs where both primary and fallback failed
    pub failures: u64,
    pub timeouts: u64,
    pub circuit_rejections: u64,
    pub cancellations: u64,
    pub retries: u64,
}
