//! Two-tier cache: moka in front of the shared backing store.
//!
//! ## Lookup order
//!
//! 1. Tier 1 (in-process, bounded, short TTL)
//! 2. Tier 2 (`cache:{key}` envelope), promoted into tier 1 on a hit
//! 3. Legacy fallback cache, promoted into tier 1 on a hit
//!
//! ## Storage layout
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `cache:{key}` | string | [`CacheEntry`] JSON |
//! | `cache:tag:{tag}` | set | keys written with the tag |
//! | `cache:tags` | set | every tag with a live set |

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use courier_config::{FeatureGate, capabilities};
use courier_core::{Ema, now_millis};
use courier_store::{BatchOp, DynStore, StoreHandle};
use futures_util::future::join_all;
use moka::future::Cache;
use moka::notification::RemovalCause;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::{CacheConfig, CacheEntry, CacheResult, CacheStats, DynLegacyCache};

const TAG_REGISTRY: &str = "cache:tags";

fn entry_key(key: &str) -> String {
    format!("cache:{key}")
}

fn tag_key(tag: &str) -> String {
    format!("cache:tag:{tag}")
}

fn record_request(tier: &'static str, result: &'static str) {
    metrics::counter!("courier_cache_requests_total", "tier" => tier, "result" => result)
        .increment(1);
}

/// Tier-1 entry. Expiry is tracked per entry because writes may carry a
/// shorter TTL than the tier default.
struct LocalEntry {
    value: Value,
    expires_at: Instant,
    hit_count: AtomicU64,
    last_accessed_at: AtomicI64,
}

impl LocalEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            hit_count: AtomicU64::new(0),
            last_accessed_at: AtomicI64::new(now_millis()),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn touch(&self) -> u64 {
        self.last_accessed_at.store(now_millis(), Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Default)]
struct Counters {
    l1_hits: u64,
    l1_misses: u64,
    l2_hits: u64,
    l2_misses: u64,
    total_requests: u64,
    response_time: Ema,
}

struct Inner {
    config: CacheConfig,
    gate: Arc<dyn FeatureGate>,
    store: StoreHandle,
    legacy: Option<DynLegacyCache>,
    local: Cache<String, Arc<LocalEntry>>,
    evictions: Arc<AtomicU64>,
    counters: Mutex<Counters>,
}

/// Two-tier cache. Cheap to clone; clones share both tiers and stats.
///
/// Every public method absorbs its own failures: reads degrade to a miss and
/// writes to a partial write, with the cause logged.
#[derive(Clone)]
pub struct TwoTierCache {
    inner: Arc<Inner>,
}

impl TwoTierCache {
    pub fn new(
        config: CacheConfig,
        gate: Arc<dyn FeatureGate>,
        store: StoreHandle,
        legacy: Option<DynLegacyCache>,
    ) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let evicted = Arc::clone(&evictions);
        let local: Cache<String, Arc<LocalEntry>> = Cache::builder()
            .max_capacity(config.l1_max_capacity)
            .time_to_live(config.l1_ttl())
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Size) {
                    evicted.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("courier_cache_evictions_total").increment(1);
                }
            })
            .build();

        Self {
            inner: Arc::new(Inner {
                config,
                gate,
                store,
                legacy,
                local,
                evictions,
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    fn two_tier_enabled(&self) -> bool {
        self.inner.gate.is_enabled(capabilities::CACHE_TWO_TIER)
    }

    /// Read `key` through both tiers and the fallback.
    ///
    /// A value that does not decode to `T` is reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = std::time::Instant::now();
        let value = self.lookup(key).await;
        self.inner
            .counters
            .lock()
            .response_time
            .record(started.elapsed().as_secs_f64() * 1000.0);

        match serde_json::from_value(value?) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached value does not decode, treating as miss");
                None
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<Value> {
        self.inner.counters.lock().total_requests += 1;

        if !self.two_tier_enabled() {
            return self.lookup_legacy(key, false).await;
        }

        if let Some(entry) = self.inner.local.get(key).await {
            if !entry.is_expired() {
                let hits = entry.touch();
                self.inner.counters.lock().l1_hits += 1;
                record_request("l1", "hit");
                tracing::trace!(key = %key, hits, "cache hit (L1)");
                return Some(entry.value.clone());
            }
            self.inner.local.invalidate(key).await;
        }
        self.inner.counters.lock().l1_misses += 1;
        record_request("l1", "miss");

        if let Some(store) = self.inner.store.current() {
            match self.read_shared(&store, key).await {
                Ok(Some((value, remaining))) => {
                    self.inner.counters.lock().l2_hits += 1;
                    record_request("l2", "hit");
                    tracing::debug!(key = %key, "cache hit (L2)");
                    let ttl = self.inner.config.l1_ttl().min(remaining);
                    self.insert_local(key, value.clone(), ttl).await;
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Shared tier read failed");
                }
            }
        }

        self.lookup_legacy(key, true).await
    }

    /// Fallback read. Hits count as tier-2 hits; a promoted hit never
    /// outlives the fallback entry.
    async fn lookup_legacy(&self, key: &str, promote: bool) -> Option<Value> {
        let found = match &self.inner.legacy {
            Some(legacy) => legacy.get_with_ttl(key).await,
            None => None,
        };

        match found {
            Some((value, remaining)) => {
                self.inner.counters.lock().l2_hits += 1;
                record_request("legacy", "hit");
                if promote {
                    let ttl = self.inner.config.l1_ttl_for(remaining);
                    self.insert_local(key, value.clone(), ttl).await;
                }
                Some(value)
            }
            None => {
                self.inner.counters.lock().l2_misses += 1;
                record_request("l2", "miss");
                None
            }
        }
    }

    /// Decoded tier-2 value and its remaining lifetime.
    async fn read_shared(
        &self,
        store: &DynStore,
        key: &str,
    ) -> CacheResult<Option<(Value, Duration)>> {
        let Some(raw) = store.get(&entry_key(key)).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw)?;
        let now = now_millis();
        if entry.is_expired(now) {
            return Ok(None);
        }
        let remaining = Duration::from_millis(entry.remaining_ms(now));
        Ok(Some((entry.decode()?, remaining)))
    }

    async fn insert_local(&self, key: &str, value: Value, ttl: Duration) {
        self.inner
            .local
            .insert(key.to_string(), Arc::new(LocalEntry::new(value, ttl)))
            .await;
    }

    /// Write `value` to tier 1, tier 2 and the fallback.
    ///
    /// `ttl` defaults to the tier-2 TTL; tier 1 keeps the shorter of `ttl`
    /// and its own TTL. Tags index the key for [`invalidate_tag`](Self::invalidate_tag).
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Value is not serializable, not cached");
                return;
            }
        };
        let shared_ttl = ttl.unwrap_or_else(|| self.inner.config.l2_ttl());

        if self.two_tier_enabled() {
            self.insert_local(key, value.clone(), self.inner.config.l1_ttl_for(ttl))
                .await;

            if let Some(store) = self.inner.store.current()
                && let Err(e) = self
                    .write_shared(&store, key, value.clone(), shared_ttl, tags)
                    .await
            {
                tracing::warn!(key = %key, error = %e, "Shared tier write failed");
            }
        }

        if let Some(legacy) = &self.inner.legacy {
            legacy.set(key, value, shared_ttl).await;
        }
    }

    async fn write_shared(
        &self,
        store: &DynStore,
        key: &str,
        value: Value,
        ttl: Duration,
        tags: &[&str],
    ) -> CacheResult<()> {
        let tags: Vec<String> = tags.iter().map(|t| (*t).to_string()).collect();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry::encode(
            value,
            now_millis(),
            ttl_ms,
            tags.clone(),
            self.inner.config.compression_threshold,
        )?;
        if entry.compressed {
            tracing::debug!(key = %key, "Compressed shared tier value");
        }

        let mut ops = vec![BatchOp::Set {
            key: entry_key(key),
            value: serde_json::to_string(&entry)?,
            ttl: Some(ttl),
        }];
        if !tags.is_empty() {
            for tag in &tags {
                ops.push(BatchOp::SAdd {
                    key: tag_key(tag),
                    members: vec![key.to_string()],
                });
            }
            ops.push(BatchOp::SAdd {
                key: TAG_REGISTRY.to_string(),
                members: tags,
            });
        }

        store.apply_batch(ops).await?;
        Ok(())
    }

    /// Remove `key` from both tiers and the fallback, and from every tag set.
    pub async fn del(&self, key: &str) {
        if self.two_tier_enabled() {
            self.inner.local.invalidate(key).await;

            if let Some(store) = self.inner.store.current()
                && let Err(e) = self.delete_shared(&store, key).await
            {
                tracing::warn!(key = %key, error = %e, "Shared tier delete failed");
            }
        }

        if let Some(legacy) = &self.inner.legacy {
            legacy.del(key).await;
        }
    }

    async fn delete_shared(&self, store: &DynStore, key: &str) -> CacheResult<()> {
        store.del(&[entry_key(key)]).await?;

        let member = [key.to_string()];
        for tag in store.smembers(TAG_REGISTRY).await? {
            let set = tag_key(&tag);
            if store.srem(&set, &member).await? > 0 && store.smembers(&set).await?.is_empty() {
                store.srem(TAG_REGISTRY, &[tag]).await?;
            }
        }
        Ok(())
    }

    /// Delete every key indexed under `tag` from both tiers, then drop the tag.
    ///
    /// Returns the number of keys invalidated; 0 when the tag is unknown or
    /// the shared tier is unreachable.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        if !self.two_tier_enabled() {
            return 0;
        }
        let Some(store) = self.inner.store.current() else {
            return 0;
        };

        let keys = match self.invalidate_shared_tag(&store, tag).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(tag = %tag, error = %e, "Tag invalidation failed");
                return 0;
            }
        };

        for key in &keys {
            self.inner.local.invalidate(key.as_str()).await;
            if let Some(legacy) = &self.inner.legacy {
                legacy.del(key).await;
            }
        }

        if !keys.is_empty() {
            tracing::debug!(tag = %tag, count = keys.len(), "Invalidated tag");
        }
        keys.len()
    }

    async fn invalidate_shared_tag(&self, store: &DynStore, tag: &str) -> CacheResult<Vec<String>> {
        let set = tag_key(tag);
        let keys = store.smembers(&set).await?;

        let mut doomed: Vec<String> = keys.iter().map(|k| entry_key(k)).collect();
        doomed.push(set);
        store.del(&doomed).await?;
        store.srem(TAG_REGISTRY, &[tag.to_string()]).await?;

        Ok(keys)
    }

    /// Whether `key` is cached anywhere. Does not count towards stats.
    pub async fn contains(&self, key: &str) -> bool {
        if self.two_tier_enabled() {
            if self
                .inner
                .local
                .get(key)
                .await
                .is_some_and(|entry| !entry.is_expired())
            {
                return true;
            }
            if let Some(store) = self.inner.store.current()
                && let Ok(Some(_)) = self.read_shared(&store, key).await
            {
                return true;
            }
        }

        match &self.inner.legacy {
            Some(legacy) => legacy.get(key).await.is_some(),
            None => false,
        }
    }

    /// Load and cache every absent key, `warm_batch_size` loads at a time.
    ///
    /// Loader failures are logged and skipped. Returns the number of keys loaded.
    pub async fn warm<T, E, F, Fut>(&self, keys: Vec<String>, loader: F) -> usize
    where
        T: Serialize,
        E: std::fmt::Display,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let batch_size = self.inner.config.warm_batch_size.max(1);
        let mut loaded = 0;

        for batch in keys.chunks(batch_size) {
            let results = join_all(
                batch
                    .iter()
                    .map(|key| self.warm_one::<T, E, F, Fut>(key, &loader)),
            ).await;
            loaded += results.into_iter().filter(|ok| *ok).count();
        }

        tracing::info!(requested = keys.len(), loaded, "Cache warmed");
        loaded
    }

    async fn warm_one<T, E, F, Fut>(&self, key: &str, loader: &F) -> bool
    where
        T: Serialize,
        E: std::fmt::Display,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.contains(key).await {
            return false;
        }
        match loader(key.to_string()).await {
            Ok(value) => {
                self.set(key, &value, None, &[]).await;
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache warm loader failed");
                false
            }
        }
    }

    /// Empty tier 1 of this instance.
    pub fn clear_local(&self) {
        self.inner.local.invalidate_all();
    }

    pub async fn is_shared_tier_available(&self) -> bool {
        match self.inner.store.current() {
            Some(store) => store.ping().await.is_ok(),
            None => false,
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.local.run_pending_tasks().await;
        let cache_size = self.inner.local.entry_count();
        let evictions = self.inner.evictions.load(Ordering::Relaxed);

        let counters = self.inner.counters.lock();
        let hits = counters.l1_hits + counters.l2_hits;
        let hit_rate = if counters.total_requests == 0 {
            0.0
        } else {
            hits as f64 / counters.total_requests as f64 * 100.0
        };

        CacheStats {
            l1_hits: counters.l1_hits,
            l1_misses: counters.l1_misses,
            l2_hits: counters.l2_hits,
            l2_misses: counters.l2_misses,
            total_requests: counters.total_requests,
            hit_rate,
            average_response_time: counters.response_time.value(),
            cache_size,
            evictions,
        }
    }
}
