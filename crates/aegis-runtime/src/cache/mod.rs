//! Request-deduplicating memo cache.
//!
//! Concurrent misses for one key share a single fetch; every waiter sees the
//! same value or the same error. Entries expire on an adaptive TTL, are
//! evicted by a recency/frequency score when the cache is full, and an
//! expired entry is served as a last resort when a refresh fails.

mod entry;
mod metrics;
mod ttl;

pub use entry::{CacheEntry, EvictionWeights};
pub use metrics::CacheMetrics;
pub use ttl::{default_ttl_rules, TtlPolicy, TtlRule};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::human_duration;
use entry::select_victim;
use metrics::{CacheCounters, LatencyWindow};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL when no rule or confidence bonus applies
    #[serde(with = "human_duration")]
    pub default_ttl: Duration,

    /// Entry count that triggers eviction
    pub max_size: usize,

    /// Derive TTL from key rules and value confidence
    pub adaptive_ttl: bool,

    /// Period of the background expiry sweep
    #[serde(with = "human_duration")]
    pub cleanup_interval: Duration,

    pub ttl_rules: Vec<TtlRule>,

    /// Confidence above which `high_confidence_ttl` applies
    pub high_confidence_threshold: f64,

    #[serde(with = "human_duration")]
    pub high_confidence_ttl: Duration,

    pub recency_weight: f64,
    pub frequency_weight: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_size: 1000,
            adaptive_ttl: true,
            cleanup_interval: Duration::from_secs(60 * 60),
            ttl_rules: default_ttl_rules(),
            high_confidence_threshold: 90.0,
            high_confidence_ttl: Duration::from_secs(10 * 60),
            recency_weight: 1.0,
            frequency_weight: 1.0,
        }
    }
}

/// Values the cache can hold.
///
/// `confidence` feeds the adaptive TTL.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn confidence(&self) -> Option<f64> {
        None
    }
}

impl CacheValue for serde_json::Value {
    fn confidence(&self) -> Option<f64> {
        self.get("confidence").and_then(serde_json::Value::as_f64)
    }
}

impl CacheValue for String {}

/// Where a looked-up value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// Valid entry
    Hit,
    /// This caller ran the fetch
    Fetched,
    /// Another caller's fetch was joined
    Joined,
    /// Fetch failed; an expired entry was returned instead
    Stale,
}

type SharedFetch<T, E> = Shared<BoxFuture<'static, Result<(T, CacheOrigin), E>>>;

enum Step<T, E> {
    Hit(T),
    Join(SharedFetch<T, E>),
    Fetch(SharedFetch<T, E>),
}

struct InFlight<T, E> {
    generation: u64,
    fetch: SharedFetch<T, E>,
}

struct CacheState<T, E> {
    entries: HashMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, InFlight<T, E>>,
    next_generation: u64,
}

struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct CacheInner<T, E> {
    state: Mutex<CacheState<T, E>>,
    ttl_policy: TtlPolicy,
    max_size: usize,
    weights: EvictionWeights,
    cleanup_interval: Duration,
    counters: CacheCounters,
    latency: Mutex<LatencyWindow>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<T: CacheValue, E> CacheInner<T, E> {
    /// Store under the state lock, evicting first when a new key would
    /// exceed capacity.
    fn insert_locked(
        &self,
        state: &mut CacheState<T, E>,
        key: String,
        data: T,
        ttl: Duration,
        now: Instant,
    ) {
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            if let Some(victim) = select_victim(state.entries.iter(), now, self.weights) {
                state.entries.remove(&victim);
                CacheCounters::incr(&self.counters.evictions);
                tracing::debug!(key = %victim, "evicted cache entry");
            }
        }
        state.entries.insert(key, CacheEntry::new(data, ttl, now));
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_valid_at(now));
        let removed = before - state.entries.len();
        drop(state);

        self.counters
            .expired_swept
            .fetch_add(removed as u64, std::sync::atomic::Ordering::Relaxed);
        removed
    }
}

/// Shared handle to a memo cache. Cloning is cheap.
pub struct RequestCache<T, E> {
    inner: Arc<CacheInner<T, E>>,
}

impl<T, E> Clone for RequestCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> RequestCache<T, E>
where
    T: CacheValue,
    E: Clone + Display + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_generation: 0,
                }),
                ttl_policy: TtlPolicy::from_config(&config),
                max_size: config.max_size.max(1),
                weights: EvictionWeights {
                    recency: config.recency_weight,
                    frequency: config.frequency_weight,
                },
                cleanup_interval: config.cleanup_interval.max(Duration::from_millis(1)),
                counters: CacheCounters::default(),
                latency: Mutex::new(LatencyWindow::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Return the cached value for `key`, or run `fetch` once no matter how
    /// many callers miss concurrently.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.lookup(key, fetch, ttl, |_| true)
            .await
            .map(|(data, _)| data)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), also reporting where the
    /// value came from. `should_store` may veto caching a fetched value.
    ///
    /// The fetch runs on its own task, so dropping this future only stops
    /// this caller's wait.
    pub async fn lookup<F, Fut, S>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
        should_store: S,
    ) -> Result<(T, CacheOrigin), E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        S: FnOnce(&T) -> bool + Send + 'static,
    {
        let started = Instant::now();
        CacheCounters::incr(&self.inner.counters.requests);

        let step = {
            let mut state = self.inner.state.lock();

            let hit = state
                .entries
                .get_mut(key)
                .filter(|entry| entry.is_valid_at(started))
                .map(|entry| {
                    entry.record_hit(started);
                    entry.data.clone()
                });

            match hit {
                Some(data) => Step::Hit(data),
                None => match state.in_flight.get(key) {
                    Some(flight) => Step::Join(flight.fetch.clone()),
                    None => {
                        let generation = state.next_generation;
                        state.next_generation += 1;
                        let shared = populate(
                            Arc::clone(&self.inner),
                            key.to_string(),
                            generation,
                            fetch,
                            ttl,
                            should_store,
                            started,
                        )
                        .boxed()
                        .shared();
                        state.in_flight.insert(
                            key.to_string(),
                            InFlight {
                                generation,
                                fetch: shared.clone(),
                            },
                        );
                        Step::Fetch(shared)
                    }
                },
            }
        };

        match step {
            Step::Hit(data) => {
                CacheCounters::incr(&self.inner.counters.hits);
                self.inner.latency.lock().record(started.elapsed());
                tracing::debug!(key, "cache hit");
                Ok((data, CacheOrigin::Hit))
            }
            Step::Join(fetch) => {
                CacheCounters::incr(&self.inner.counters.misses);
                tracing::debug!(key, "joining in-flight fetch");
                fetch.await.map(|(data, origin)| match origin {
                    CacheOrigin::Stale => (data, CacheOrigin::Stale),
                    _ => (data, CacheOrigin::Joined),
                })
            }
            Step::Fetch(shared) => {
                CacheCounters::incr(&self.inner.counters.misses);
                tracing::debug!(key, "cache miss, fetching");
                if let Ok(runtime) = Handle::try_current() {
                    let driver = shared.clone();
                    runtime.spawn(async move {
                        let _ = driver.await;
                    });
                }
                shared.await
            }
        }
    }

    /// Warm several keys concurrently. Keys already cached or in flight are
    /// left alone; failed fetches are logged and skipped. Returns how many
    /// keys ended up holding a value.
    pub async fn preload<F, Fut>(
        &self,
        items: impl IntoIterator<Item = (String, F)>,
        ttl: Option<Duration>,
    ) -> usize
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let loads = items.into_iter().map(|(key, fetch)| async move {
            match self.lookup(&key, fetch, ttl, |_| true).await {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "preload failed");
                    false
                }
            }
        });

        join_all(loads).await.into_iter().filter(|loaded| *loaded).count()
    }

    /// Store unconditionally, bypassing deduplication. `ttl` defaults to the
    /// adaptive policy.
    pub fn set(&self, key: &str, data: T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.inner.ttl_policy.ttl_for(key, data.confidence()));
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        self.inner
            .insert_locked(&mut state, key.to_string(), data, ttl, now);
    }

    /// Read without fetching. Counts toward the hit rate.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        CacheCounters::incr(&self.inner.counters.requests);

        let data = self
            .inner
            .state
            .lock()
            .entries
            .get_mut(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| {
                entry.record_hit(now);
                entry.data.clone()
            });

        match data {
            Some(_) => CacheCounters::incr(&self.inner.counters.hits),
            None => CacheCounters::incr(&self.inner.counters.misses),
        }
        data
    }

    /// Drop one key. An in-flight fetch for it is not cancelled and may
    /// store its result afterwards.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.state.lock().entries.remove(key).is_some()
    }

    /// Drop every key matching `pattern`; returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, regex::Error> {
        let regex = regex::Regex::new(pattern)?;
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !regex.is_match(key));
        let removed = before - state.entries.len();
        drop(state);

        tracing::debug!(pattern, removed, "invalidated cache entries");
        Ok(removed)
    }

    /// Drop all entries and in-flight markers. Running fetches still finish.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    /// One sweep pass over expired entries.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn metrics(&self) -> CacheMetrics {
        let (size, in_flight) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.in_flight.len())
        };
        let latency = self.inner.latency.lock();
        CacheMetrics::capture(&self.inner.counters, &latency, size, in_flight)
    }

    pub fn reset_metrics(&self) {
        self.inner.counters.reset();
        self.inner.latency.lock().clear();
    }

    /// Spawn the periodic expiry sweep. Returns `false` if it is already
    /// running or there is no tokio runtime.
    pub fn start_sweeper(&self) -> bool {
        let mut slot = self.inner.sweeper.lock();
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return false;
        }

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no tokio runtime, cache sweeper not started");
            return false;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = self.inner.cleanup_interval;
        let handle = runtime.spawn(sweep_loop(Arc::downgrade(&self.inner), period, shutdown_rx));

        *slot = Some(Sweeper {
            shutdown_tx,
            handle,
        });
        tracing::info!(interval = ?period, "cache sweeper started");
        true
    }

    pub fn sweeper_active(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Stop the sweeper and clear both tables. In-flight fetches are not
    /// drained.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            let _ = sweeper.shutdown_tx.send(true);
            tracing::info!("cache sweeper stopping");
        }
        self.clear();
    }
}

impl<T, E> Default for RequestCache<T, E>
where
    T: CacheValue,
    E: Clone + Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

async fn populate<T, E, F, Fut, S>(
    inner: Arc<CacheInner<T, E>>,
    key: String,
    generation: u64,
    fetch: F,
    ttl: Option<Duration>,
    should_store: S,
    started: Instant,
) -> Result<(T, CacheOrigin), E>
where
    T: CacheValue,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnOnce(&T) -> bool,
{
    let outcome = match AssertUnwindSafe(async move { fetch().await })
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            // Joiners see the panic too; later lookups must start a fresh fetch.
            release_marker(&mut inner.state.lock(), &key, generation);
            tracing::error!(key = %key, "fetch panicked, in-flight marker released");
            resume_unwind(panic);
        }
    };

    let store_ttl = outcome
        .as_ref()
        .ok()
        .filter(|&data| should_store(data))
        .map(|data| ttl.unwrap_or_else(|| inner.ttl_policy.ttl_for(&key, data.confidence())));

    let now = Instant::now();
    let mut state = inner.state.lock();
    release_marker(&mut state, &key, generation);

    let result = match outcome {
        Ok(data) => {
            if let Some(ttl) = store_ttl {
                inner.insert_locked(&mut state, key.clone(), data.clone(), ttl, now);
            }
            Ok((data, CacheOrigin::Fetched))
        }
        Err(err) => match state.entries.get(&key) {
            Some(entry) => {
                let data = entry.data.clone();
                CacheCounters::incr(&inner.counters.stale_served);
                tracing::warn!(key = %key, error = %err, "fetch failed, serving stale entry");
                Ok((data, CacheOrigin::Stale))
            }
            None => Err(err),
        },
    };
    drop(state);

    inner.latency.lock().record(now.saturating_duration_since(started));
    result
}

/// Drop `key`'s in-flight marker unless a newer fetch has replaced it.
fn release_marker<T, E>(state: &mut CacheState<T, E>, key: &str, generation: u64) {
    if state
        .in_flight
        .get(key)
        .is_some_and(|flight| flight.generation == generation)
    {
        state.in_flight.remove(key);
    }
}

async fn sweep_loop<T, E>(
    cache: Weak<CacheInner<T, E>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: CacheValue,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = cache.upgrade() else { break };
                let removed = inner.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired cache entries");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("cache sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    type Cache = RequestCache<String, String>;

    fn counted(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        result: Result<&str, &str>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        let result = result.map(str::to_string).map_err(str::to_string);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                result
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lookup_hits() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .lookup("k", counted(&calls, Duration::ZERO, Ok("v")), None, |_| true)
            .await
            .unwrap();
        let second = cache
            .lookup("k", counted(&calls, Duration::ZERO, Ok("other")), None, |_| true)
            .await
            .unwrap();

        assert_eq!(first, ("v".to_string(), CacheOrigin::Fetched));
        assert_eq!(second, ("v".to_string(), CacheOrigin::Hit));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_rate, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..10).map(|_| {
            cache.lookup(
                "k",
                counted(&calls, Duration::from_millis(50), Ok("v")),
                None,
                |_| true,
            )
        });
        let results = join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let fetched = results
            .iter()
            .filter(|r| matches!(r, Ok((_, CacheOrigin::Fetched))))
            .count();
        let joined = results
            .iter()
            .filter(|r| matches!(r, Ok((_, CacheOrigin::Joined))))
            .count();
        assert_eq!((fetched, joined), (1, 9));
        assert!(results.iter().all(|r| r.as_ref().unwrap().0 == "v"));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reaches_every_waiter() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..3).map(|_| {
            cache.get_or_fetch(
                "k",
                counted(&calls, Duration::from_millis(10), Err("boom")),
                None,
            )
        });
        let results = join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|r| r.as_ref().err().map(String::as_str) == Some("boom")));
        assert_eq!(cache.in_flight_count(), 0);
        assert!(cache.is_empty());

        // marker is gone, so the next miss fetches again
        let retried = cache
            .get_or_fetch("k", counted(&calls, Duration::ZERO, Ok("v")), None)
            .await;
        assert_eq!(retried.as_deref(), Ok("v"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_millis(100));

        cache
            .get_or_fetch("k", counted(&calls, Duration::ZERO, Ok("v1")), ttl)
            .await
            .unwrap();

        sleep(Duration::from_millis(99)).await;
        let cached = cache
            .get_or_fetch("k", counted(&calls, Duration::ZERO, Ok("v2")), ttl)
            .await;
        assert_eq!(cached.as_deref(), Ok("v1"));

        sleep(Duration::from_millis(1)).await;
        let refreshed = cache
            .get_or_fetch("k", counted(&calls, Duration::ZERO, Ok("v2")), ttl)
            .await;
        assert_eq!(refreshed.as_deref(), Ok("v2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_when_refresh_fails() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set("price:42", "cached".to_string(), Some(Duration::from_millis(100)));
        sleep(Duration::from_millis(150)).await;

        let result = cache
            .lookup(
                "price:42",
                counted(&calls, Duration::ZERO, Err("upstream down")),
                None,
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(("cached".to_string(), CacheOrigin::Stale)));
        assert_eq!(cache.metrics().stale_served, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_idle_unpopular_entry() {
        let cache = Cache::new(CacheConfig {
            max_size: 2,
            ..CacheConfig::default()
        });

        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        sleep(Duration::from_secs(10)).await;
        assert!(cache.get("a").is_some());

        cache.set("c", "3".to_string(), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = Cache::new(CacheConfig {
            max_size: 2,
            ..CacheConfig::default()
        });
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.set("a", "3".to_string(), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().evictions, 0);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = Cache::default();
        cache.set("price:1", "a".to_string(), None);
        cache.set("price:2", "b".to_string(), None);
        cache.set("score:1", "c".to_string(), None);

        assert_eq!(cache.invalidate_pattern("^price:").unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("score:1"));
        assert!(!cache.invalidate("score:1"));
        assert!(cache.invalidate_pattern("(unclosed").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vetoed_value_is_returned_but_not_stored() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .lookup("k", counted(&calls, Duration::ZERO, Ok("v")), None, |_| false)
            .await;

        assert_eq!(result, Ok(("v".to_string(), CacheOrigin::Fetched)));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confidence_extends_ttl() {
        let cache: RequestCache<serde_json::Value, String> = RequestCache::default();
        cache.set("brief:1", serde_json::json!({ "confidence": 95.0 }), None);
        cache.set("brief:2", serde_json::json!({ "confidence": 60.0 }), None);

        sleep(Duration::from_secs(6 * 60)).await;

        assert!(cache.get("brief:1").is_some());
        assert!(cache.get("brief:2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = Cache::default();
        cache.set("short", "a".to_string(), Some(Duration::from_millis(10)));
        cache.set("long", "b".to_string(), Some(Duration::from_secs(60)));

        sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.metrics().expired_swept, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Cache::new(CacheConfig {
            cleanup_interval: Duration::from_secs(1),
            ..CacheConfig::default()
        });
        assert!(cache.start_sweeper());
        assert!(!cache.start_sweeper());

        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));
        sleep(Duration::from_millis(1500)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.metrics().expired_swept, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeper_and_clears() {
        let cache = Cache::new(CacheConfig {
            cleanup_interval: Duration::from_secs(1),
            ..CacheConfig::default()
        });
        cache.start_sweeper();
        cache.set("k", "v".to_string(), None);

        cache.shutdown();
        sleep(Duration::from_millis(10)).await;

        assert!(!cache.sweeper_active());
        assert!(cache.is_empty());
        assert!(cache.start_sweeper());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_skips_failures() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.set("warm", "old".to_string(), None);

        let loaded = cache
            .preload(
                vec![
                    ("a".to_string(), counted(&calls, Duration::from_millis(5), Ok("1"))),
                    ("b".to_string(), counted(&calls, Duration::ZERO, Err("down"))),
                    ("warm".to_string(), counted(&calls, Duration::ZERO, Ok("new"))),
                ],
                None,
            )
            .await;

        assert_eq!(loaded, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("warm").as_deref(), Some("old"));
        assert!(cache.get("b").is_none());
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_fetch_releases_marker() {
        let cache = Cache::default();

        let panicked = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get_or_fetch(
                        "k",
                        || async {
                            if true {
                                panic!("provider client bug");
                            }
                            Ok::<String, String>(String::new())
                        },
                        None,
                    )
                    .await
            }
        })
        .await;

        assert!(panicked.unwrap_err().is_panic());
        assert_eq!(cache.in_flight_count(), 0);

        let recovered = cache
            .get_or_fetch("k", || async { Ok::<_, String>("v".to_string()) }, None)
            .await;
        assert_eq!(recovered.as_deref(), Ok("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_does_not_remove_newer_marker() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let old = tokio::spawn({
            let cache = cache.clone();
            let fetch = counted(&calls, Duration::from_millis(10), Ok("old"));
            async move { cache.get_or_fetch("k", fetch, None).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(cache.in_flight_count(), 1);

        cache.clear();

        let new = tokio::spawn({
            let cache = cache.clone();
            let fetch = counted(&calls, Duration::from_millis(100), Ok("new"));
            async move { cache.get_or_fetch("k", fetch, None).await }
        });

        sleep(Duration::from_millis(20)).await;
        assert_eq!(old.await.unwrap().as_deref(), Ok("old"));
        assert_eq!(cache.in_flight_count(), 1);

        assert_eq!(new.await.unwrap().as_deref(), Ok("new"));
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
