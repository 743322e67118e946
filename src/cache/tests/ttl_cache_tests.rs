// src/cache/tests/ttl_cache_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time;

use crate::cache::TtlCache;
use crate::config::CacheConfig;

fn cache(max_entries: usize, ttl_ms: u64) -> TtlCache<String, u32> {
    TtlCache::new(CacheConfig::new(max_entries, Duration::from_millis(ttl_ms)))
}

fn key(name: &str) -> String {
    name.to_string()
}

#[tokio::test(start_paused = true)]
async fn test_evicts_least_recently_used() {
    let cache = cache(3, 10_000);

    cache.set(key("a"), 1);
    cache.set(key("b"), 2);
    cache.set(key("c"), 3);
    cache.set(key("d"), 4);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&key("a")), None, "Oldest entry should be evicted");
    assert_eq!(cache.get(&key("b")), Some(2));
    assert_eq!(cache.get(&key("d")), Some(4));
}

#[tokio::test(start_paused = true)]
async fn test_get_promotes_entry() {
    let cache = cache(2, 10_000);

    cache.set(key("a"), 1);
    cache.set(key("b"), 2);
    assert_eq!(cache.get(&key("a")), Some(1));
    cache.set(key("c"), 3);

    assert!(cache.has(&key("a")));
    assert!(!cache.has(&key("b")));
    assert!(cache.has(&key("c")));
}

#[tokio::test(start_paused = true)]
async fn test_has_does_not_promote() {
    let cache = cache(2, 10_000);

    cache.set(key("a"), 1);
    cache.set(key("b"), 2);
    assert!(cache.has(&key("a")));
    cache.set(key("c"), 3);

    assert!(!cache.has(&key("a")), "has() must not protect an entry from eviction");
    assert!(cache.has(&key("b")));
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_refreshes_value_and_ttl() {
    let cache = cache(2, 1_000);

    cache.set(key("a"), 1);
    time::advance(Duration::from_millis(800)).await;
    cache.set(key("a"), 10);
    time::advance(Duration::from_millis(800)).await;

    assert_eq!(cache.get(&key("a")), Some(10));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_read_as_absent() {
    let cache = cache(10, 1_000);

    cache.set(key("a"), 1);
    time::advance(Duration::from_millis(999)).await;
    assert_eq!(cache.get(&key("a")), Some(1));

    time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get(&key("a")), None);
    assert!(!cache.has(&key("a")));
    assert!(cache.is_empty(), "Expired entry is removed on access");
}

#[tokio::test(start_paused = true)]
async fn test_purge_expired() {
    let cache = cache(10, 1_000);

    cache.set(key("a"), 1);
    cache.set(key("b"), 2);
    time::advance(Duration::from_millis(600)).await;
    cache.set(key("c"), 3);
    time::advance(Duration::from_millis(600)).await;

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.purge_expired(), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&key("c")), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_delete_and_clear() {
    let cache = cache(10, 10_000);

    cache.set(key("a"), 1);
    cache.set(key("b"), 2);

    assert!(cache.delete(&key("a")));
    assert!(!cache.delete(&key("a")));
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_zero_capacity_holds_one_entry() {
    let cache = cache(0, 10_000);
    assert_eq!(cache.capacity(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_try_insert_with_caches_success_only() {
    let cache = cache(10, 10_000);
    let loads = AtomicUsize::new(0);

    let failed: Result<u32, String> = cache
        .get_or_try_insert_with(key("a"), || async {
            loads.fetch_add(1, Ordering::SeqCst);
            Err("upstream down".to_string())
        })
        .await;
    assert!(failed.is_err());
    assert!(!cache.has(&key("a")), "Errors are not cached");

    for _ in 0..3 {
        let value: Result<u32, String> = cache
            .get_or_try_insert_with(key("a"), || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(value, Ok(7));
    }

    assert_eq!(loads.load(Ordering::SeqCst), 2);
}
