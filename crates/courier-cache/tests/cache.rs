//! Two-tier cache behaviour against the in-process store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use courier_cache::{CacheConfig, CacheEntry, LegacyCache, LocalLegacyCache, TwoTierCache};
use courier_config::{FeatureFlag, SharedFeatureFlags, capabilities};
use courier_store::{BackingStore, MemoryStore, StoreHandle};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
    roles: Vec<String>,
}

fn profile(id: u64) -> Profile {
    Profile {
        id,
        name: format!("user-{id}"),
        roles: vec!["reader".into(), "writer".into()],
    }
}

struct Harness {
    cache: TwoTierCache,
    store: Arc<MemoryStore>,
    flags: SharedFeatureFlags,
    legacy: Arc<LocalLegacyCache>,
}

fn harness(config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let flags = SharedFeatureFlags::default();
    let legacy = Arc::new(LocalLegacyCache::new());
    let cache = TwoTierCache::new(
        config,
        Arc::new(flags.clone()),
        StoreHandle::with_store(store.clone()),
        Some(legacy.clone()),
    );
    Harness {
        cache,
        store,
        flags,
        legacy,
    }
}

#[tokio::test]
async fn test_set_then_get_returns_equal_value() {
    let h = harness(CacheConfig::default());
    h.cache.set("user:1", &profile(1), None, &[]).await;

    let cached: Option<Profile> = h.cache.get("user:1").await;
    assert_eq!(cached, Some(profile(1)));

    // Shared tier holds the envelope
    let raw = h.store.get("cache:user:1").await.unwrap().unwrap();
    let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
    assert!(!entry.compressed);
    assert_eq!(entry.value, serde_json::to_value(profile(1)).unwrap());
}

#[tokio::test]
async fn test_missing_key_is_absent() {
    let h = harness(CacheConfig::default());
    assert_eq!(h.cache.get::<Profile>("nope").await, None);

    let stats = h.cache.stats().await;
    assert_eq!(stats.l1_misses, 1);
    assert_eq!(stats.l2_misses, 1);
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.hit_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_absent_after_shared_ttl_elapses() {
    let h = harness(CacheConfig::default());
    h.cache
        .set("session", &json!({"token": "abc"}), Some(Duration::from_secs(2)), &[])
        .await;
    assert!(h.cache.get::<serde_json::Value>("session").await.is_some());

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(h.cache.get::<serde_json::Value>("session").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_promoted_entry_does_not_outlive_shared_tier() {
    let h = harness(CacheConfig::default());
    h.cache
        .set("k", &"v", Some(Duration::from_secs(10)), &[])
        .await;
    h.legacy.del("k").await;
    h.cache.clear_local();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(h.cache.get::<String>("k").await.as_deref(), Some("v"));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(h.cache.get::<String>("k").await, None);
}

#[tokio::test]
async fn test_shared_hit_is_promoted_to_local() {
    let h = harness(CacheConfig::default());
    h.cache.set("k", &42u64, None, &[]).await;
    h.cache.clear_local();

    assert_eq!(h.cache.get::<u64>("k").await, Some(42));
    assert_eq!(h.cache.get::<u64>("k").await, Some(42));

    let stats = h.cache.stats().await;
    assert_eq!(stats.l1_misses, 1);
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.hit_rate, 100.0);
    assert_eq!(stats.cache_size, 1);
}

#[tokio::test]
async fn test_contains_does_not_count_requests() {
    let h = harness(CacheConfig::default());
    h.cache.set("k", &1, None, &[]).await;
    h.cache.clear_local();

    assert!(h.cache.contains("k").await);
    assert!(!h.cache.contains("missing").await);
    assert_eq!(h.cache.stats().await.total_requests, 0);
}

#[tokio::test]
async fn test_invalidate_tag_removes_keys_from_both_tiers() {
    let h = harness(CacheConfig::default());
    h.cache.set("k1", &1, None, &["users"]).await;
    h.cache.set("k2", &2, None, &["users", "admins"]).await;
    h.cache.set("k3", &3, None, &["other"]).await;

    assert_eq!(h.cache.invalidate_tag("users").await, 2);

    assert_eq!(h.cache.get::<i32>("k1").await, None);
    assert_eq!(h.cache.get::<i32>("k2").await, None);
    assert_eq!(h.cache.get::<i32>("k3").await, Some(3));
    assert!(h.store.get("cache:k1").await.unwrap().is_none());
    assert!(h.store.get("cache:k2").await.unwrap().is_none());
    assert!(h.store.smembers("cache:tag:users").await.unwrap().is_empty());

    let mut tags = h.store.smembers("cache:tags").await.unwrap();
    tags.sort();
    assert_eq!(tags, vec!["admins".to_string(), "other".to_string()]);

    assert_eq!(h.cache.invalidate_tag("users").await, 0);
    assert_eq!(h.cache.invalidate_tag("never-used").await, 0);
}

#[tokio::test]
async fn test_del_prunes_tag_sets() {
    let h = harness(CacheConfig::default());
    h.cache.set("a", &1, None, &["t1", "t2"]).await;
    h.cache.set("b", &2, None, &["t2"]).await;

    h.cache.del("a").await;

    assert_eq!(h.cache.get::<i32>("a").await, None);
    assert!(h.legacy.get("a").await.is_none());
    assert!(h.store.smembers("cache:tag:t1").await.unwrap().is_empty());
    assert_eq!(
        h.store.smembers("cache:tag:t2").await.unwrap(),
        vec!["b".to_string()]
    );
    assert_eq!(
        h.store.smembers("cache:tags").await.unwrap(),
        vec!["t2".to_string()]
    );
}

#[tokio::test]
async fn test_large_values_are_compressed_in_shared_tier() {
    let h = harness(CacheConfig {
        compression_threshold: 256,
        ..CacheConfig::default()
    });
    let body = "lorem ipsum ".repeat(200);
    h.cache.set("doc", &body, None, &[]).await;

    let raw = h.store.get("cache:doc").await.unwrap().unwrap();
    let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
    assert!(entry.compressed);
    assert!(raw.len() < body.len());

    h.cache.clear_local();
    h.legacy.del("doc").await;
    assert_eq!(h.cache.get::<String>("doc").await, Some(body));
}

#[tokio::test]
async fn test_undecodable_value_is_a_miss() {
    let h = harness(CacheConfig::default());
    h.cache.set("k", &"not a number", None, &[]).await;
    assert_eq!(h.cache.get::<u64>("k").await, None);
}

#[tokio::test]
async fn test_warm_loads_only_absent_keys() {
    let h = harness(CacheConfig {
        warm_batch_size: 2,
        ..CacheConfig::default()
    });
    h.cache.set("b", &profile(2), None, &[]).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let keys = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
    let loaded = h
        .cache
        .warm(keys, move |key: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if key == "c" {
                    Err(format!("no source for {key}"))
                } else {
                    Ok(profile(key.len() as u64))
                }
            }
        })
        .await;

    assert_eq!(loaded, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(h.cache.get::<Profile>("a").await.is_some());
    assert!(h.cache.get::<Profile>("d").await.is_some());
    assert_eq!(h.cache.get::<Profile>("c").await, None);
}

#[tokio::test]
async fn test_store_outage_degrades_to_local_tier() {
    let h = harness(CacheConfig::default());
    h.store.set_available(false);
    assert!(!h.cache.is_shared_tier_available().await);

    h.cache.set("k", &"v", None, &["t"]).await;
    assert_eq!(h.cache.get::<String>("k").await.as_deref(), Some("v"));
    assert_eq!(h.cache.invalidate_tag("t").await, 0);

    h.cache.del("k").await;
    assert_eq!(h.cache.get::<String>("k").await, None);
}

#[tokio::test]
async fn test_without_store_uses_local_and_legacy() {
    let legacy = Arc::new(LocalLegacyCache::new());
    let cache = TwoTierCache::new(
        CacheConfig::default(),
        Arc::new(SharedFeatureFlags::default()),
        StoreHandle::new(),
        Some(legacy.clone()),
    );

    cache.set("k", &1, None, &[]).await;
    assert_eq!(cache.get::<i32>("k").await, Some(1));
    assert!(!cache.is_shared_tier_available().await);

    cache.clear_local();
    assert_eq!(cache.get::<i32>("k").await, Some(1));
    assert_eq!(cache.stats().await.l2_hits, 1);
}

#[tokio::test]
async fn test_legacy_hit_is_promoted() {
    let h = harness(CacheConfig::default());
    h.legacy
        .set("old", json!({"v": 1}), Duration::from_secs(60))
        .await;

    assert_eq!(h.cache.get::<serde_json::Value>("old").await, Some(json!({"v": 1})));
    assert_eq!(h.cache.get::<serde_json::Value>("old").await, Some(json!({"v": 1})));

    let stats = h.cache.stats().await;
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.l1_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_promotion_does_not_outlive_legacy_entry() {
    let h = harness(CacheConfig::default());
    h.legacy
        .set("old", json!("short-lived"), Duration::from_secs(2))
        .await;

    assert_eq!(h.cache.get::<String>("old").await.as_deref(), Some("short-lived"));

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(h.cache.get::<String>("old").await, None);
}

#[tokio::test]
async fn test_gate_off_uses_legacy_only() {
    let h = harness(CacheConfig::default());
    h.flags
        .set(FeatureFlag::boolean(capabilities::CACHE_TWO_TIER, false));

    h.cache.set("k", &"legacy", None, &["t"]).await;
    assert!(h.store.get("cache:k").await.unwrap().is_none());
    assert_eq!(h.cache.get::<String>("k").await.as_deref(), Some("legacy"));
    assert_eq!(h.cache.invalidate_tag("t").await, 0);

    h.cache.del("k").await;
    assert_eq!(h.cache.get::<String>("k").await, None);

    h.flags
        .set(FeatureFlag::boolean(capabilities::CACHE_TWO_TIER, true));
    h.cache.set("k2", &"shared", None, &[]).await;
    assert!(h.store.get("cache:k2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_gate_off_without_legacy_is_absent() {
    let flags = SharedFeatureFlags::default();
    flags.set(FeatureFlag::boolean(capabilities::CACHE_TWO_TIER, false));
    let cache = TwoTierCache::new(
        CacheConfig::default(),
        Arc::new(flags),
        StoreHandle::with_store(Arc::new(MemoryStore::new())),
        None,
    );

    cache.set("k", &1, None, &[]).await;
    assert_eq!(cache.get::<i32>("k").await, None);
    assert_eq!(cache.warm(vec!["x".into()], |_| async { Ok::<_, String>(1) }).await, 1);
    assert_eq!(cache.get::<i32>("x").await, None);
}

#[tokio::test]
async fn test_capacity_bound_counts_evictions() {
    let h = harness(CacheConfig {
        l1_max_capacity: 2,
        ..CacheConfig::default()
    });
    for i in 0..10 {
        h.cache.set(&format!("k{i}"), &i, None, &[]).await;
    }

    let stats = h.cache.stats().await;
    assert!(stats.cache_size <= 2);
    assert!(stats.evictions > 0);
}
