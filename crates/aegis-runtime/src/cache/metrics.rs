//! Cache counters and their read-only snapshot.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_WINDOW: usize = 256;

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub requests: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub stale_served: AtomicU64,
    pub expired_swept: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.stale_served,
            &self.expired_swept,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Mean over the most recent samples.
#[derive(Debug)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Duration>,
    total: Duration,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
            total: Duration::ZERO,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            if let Some(oldest) = self.samples.pop_front() {
                self.total -= oldest;
            }
        }
        self.samples.push_back(sample);
        self.total += sample;
    }

    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.total / self.samples.len() as u32
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total = Duration::ZERO;
    }
}

/// Point-in-time view of the cache for health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub in_flight: usize,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    pub stale_served: u64,
    pub expired_swept: u64,
}

impl CacheMetrics {
    pub(crate) fn capture(
        counters: &CacheCounters,
        latency: &LatencyWindow,
        size: usize,
        in_flight: usize,
    ) -> Self {
        let requests = counters.requests.load(Ordering::Relaxed);
        let hits = counters.hits.load(Ordering::Relaxed);
        Self {
            requests,
            hits,
            misses: counters.misses.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            size,
            in_flight,
            hit_rate: if requests > 0 {
                hits as f64 / requests as f64
            } else {
                0.0
            },
            avg_latency_ms: latency.mean().as_secs_f64() * 1000.0,
            stale_served: counters.stale_served.load(Ordering::Relaxed),
            expired_swept: counters.expired_swept.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_mean() {
        let mut window = LatencyWindow::new();
        assert_eq!(window.mean(), Duration::ZERO);

        window.record(Duration::from_millis(10));
        window.record(Duration::from_millis(30));
        assert_eq!(window.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_latency_window_forgets_old_samples() {
        let mut window = LatencyWindow::new();
        window.record(Duration::from_secs(100));
        for _ in 0..LATENCY_WINDOW {
            window.record(Duration::from_millis(1));
        }
        assert_eq!(window.mean(), Duration::from_millis(1));
    }

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        counters.requests.store(4, Ordering::Relaxed);
        counters.hits.store(3, Ordering::Relaxed);
        let metrics = CacheMetrics::capture(&counters, &LatencyWindow::new(), 2, 0);
        assert_eq!(metrics.hit_rate, 0.75);
        assert_eq!(metrics.size, 2);
    }
}
