//! Cache entries and the cost-aware eviction score.

use std::time::Duration;
use tokio::time::Instant;

/// One memoized value.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub hit_count: u64,
    pub last_accessed: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration, now: Instant) -> Self {
        Self {
            data,
            stored_at: now,
            ttl,
            hit_count: 0,
            last_accessed: now,
        }
    }

    /// Valid iff `now - stored_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    pub fn record_hit(&mut self, now: Instant) {
        self.hit_count += 1;
        self.last_accessed = now;
    }

    /// Higher is a better eviction candidate: idle for long and rarely hit.
    pub fn eviction_score(&self, now: Instant, weights: EvictionWeights) -> f64 {
        let idle = now.saturating_duration_since(self.last_accessed).as_secs_f64();
        weights.recency * idle * weights.frequency / (self.hit_count as f64 + 1.0)
    }
}

/// Weights of the composite eviction score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionWeights {
    pub recency: f64,
    pub frequency: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            recency: 1.0,
            frequency: 1.0,
        }
    }
}

/// Key of the entry with the highest eviction score, if any.
pub(crate) fn select_victim<'a, T: 'a>(
    entries: impl Iterator<Item = (&'a String, &'a CacheEntry<T>)>,
    now: Instant,
    weights: EvictionWeights,
) -> Option<String> {
    entries
        .map(|(key, entry)| (key, entry.eviction_score(now, weights)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn base() -> Instant {
        Instant::now() + Duration::from_secs(100_000)
    }

    #[test]
    fn test_validity_boundary() {
        let t0 = base();
        let entry = CacheEntry::new("v", Duration::from_millis(100), t0);
        assert!(entry.is_valid_at(t0));
        assert!(entry.is_valid_at(t0 + Duration::from_millis(99)));
        assert!(!entry.is_valid_at(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_frequently_hit_old_entry_outlives_fresh_unused_one() {
        let now = base();
        let mut entries = HashMap::new();

        let mut popular = CacheEntry::new(1, Duration::from_secs(600), now - Duration::from_secs(60));
        popular.last_accessed = now - Duration::from_secs(30);
        popular.hit_count = 99;
        entries.insert("popular".to_string(), popular);

        let fresh = CacheEntry::new(2, Duration::from_secs(600), now - Duration::from_secs(5));
        entries.insert("fresh".to_string(), fresh);

        // 30s / 100 = 0.3 vs 5s / 1 = 5.0
        let victim = select_victim(entries.iter(), now, EvictionWeights::default());
        assert_eq!(victim.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_just_hit_entry_is_never_the_victim() {
        let now = base();
        let mut entries = HashMap::new();

        entries.insert(
            "old_unused".to_string(),
            CacheEntry::new(1, Duration::from_secs(600), now - Duration::from_secs(10)),
        );
        let mut popular = CacheEntry::new(2, Duration::from_secs(600), now - Duration::from_secs(10));
        for _ in 0..5 {
            popular.record_hit(now);
        }
        entries.insert("popular".to_string(), popular);

        let victim = select_victim(entries.iter(), now, EvictionWeights::default());
        assert_eq!(victim.as_deref(), Some("old_unused"));
    }

    #[test]
    fn test_no_victim_when_empty() {
        let entries: HashMap<String, CacheEntry<u8>> = HashMap::new();
        assert!(select_victim(entries.iter(), base(), EvictionWeights::default()).is_none());
    }

    proptest! {
        #[test]
        fn prop_victim_has_maximal_score(
            stats in proptest::collection::vec((0u64..10_000, 0u64..1_000), 1..40)
        ) {
            let now = base();
            let weights = EvictionWeights::default();
            let entries: HashMap<String, CacheEntry<usize>> = stats
                .iter()
                .enumerate()
                .map(|(i, (idle, hits))| {
                    let mut entry = CacheEntry::new(i, Duration::from_secs(60), now - Duration::from_secs(*idle));
                    entry.hit_count = *hits;
                    (format!("k{i}"), entry)
                })
                .collect();

            let victim = select_victim(entries.iter(), now, weights).unwrap();
            let victim_score = entries[&victim].eviction_score(now, weights);
            for entry in entries.values() {
                prop_assert!(victim_score >= entry.eviction_score(now, weights));
            }
        }
    }
}
