//! Cache behavior through the public API: coalescing, expiry, eviction and
//! stale-on-error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_runtime::{CacheConfig, CacheOrigin, RequestCache};
use futures::future::join_all;
use tokio::time::{advance, sleep};

fn cache(max_size: usize) -> RequestCache<String, String> {
    RequestCache::new(CacheConfig {
        max_size,
        adaptive_ttl: false,
        ..CacheConfig::default()
    })
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_fetch() {
    let cache = cache(100);
    let calls = Arc::new(AtomicU32::new(0));

    let lookups = (0..10).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            cache
                .lookup(
                    "analysis:brief-7",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>("standardized".to_string())
                    },
                    None,
                    |_| true,
                )
                .await
        }
    });
    let results = join_all(lookups).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results
        .iter()
        .all(|r| r.as_ref().map(|(v, _)| v.as_str()) == Ok("standardized")));

    let fetched = results
        .iter()
        .filter(|r| matches!(r, Ok((_, CacheOrigin::Fetched))))
        .count();
    assert_eq!(fetched, 1);
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn entry_expires_exactly_at_ttl() {
    let cache = cache(100);
    cache.set("score:m1:p1", "72".to_string(), Some(Duration::from_millis(100)));

    advance(Duration::from_millis(99)).await;
    assert_eq!(cache.get("score:m1:p1").as_deref(), Some("72"));

    advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("score:m1:p1"), None);
}

#[tokio::test(start_paused = true)]
async fn full_cache_evicts_idle_unpopular_entry() {
    let cache = cache(2);
    cache.set("hot", "h".to_string(), None);
    cache.set("cold", "c".to_string(), None);

    advance(Duration::from_secs(10)).await;
    for _ in 0..3 {
        assert!(cache.get("hot").is_some());
    }

    cache.set("new", "n".to_string(), None);

    assert_eq!(cache.len(), 2);
    assert!(cache.get("hot").is_some());
    assert!(cache.get("new").is_some());
    assert!(cache.get("cold").is_none());
    assert_eq!(cache.metrics().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_served_when_refresh_fails() {
    let cache = cache(100);
    cache.set("price:42", "1500".to_string(), Some(Duration::from_millis(100)));

    advance(Duration::from_millis(150)).await;

    let (value, origin) = cache
        .lookup(
            "price:42",
            || async { Err::<String, _>("model unavailable".to_string()) },
            None,
            |_| true,
        )
        .await
        .unwrap();

    assert_eq!(value, "1500");
    assert_eq!(origin, CacheOrigin::Stale);
    assert_eq!(cache.metrics().stale_served, 1);

    let fresh = cache
        .get_or_fetch(
            "price:42",
            || async { Ok::<_, String>("1600".to_string()) },
            None,
        )
        .await
        .unwrap();
    assert_eq!(fresh, "1600");
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_without_entry_propagates() {
    let cache = cache(100);

    let result = cache
        .get_or_fetch(
            "price:43",
            || async { Err::<String, _>("model unavailable".to_string()) },
            None,
        )
        .await;

    assert_eq!(result, Err("model unavailable".to_string()));
    assert!(cache.is_empty());
}
