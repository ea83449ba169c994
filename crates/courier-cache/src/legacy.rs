//! Single-tier fallback cache consumed by older callers.
//!
//! The two-tier cache mirrors writes into it and falls back to it on a
//! miss, or uses it exclusively when the two-tier path is gated off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

/// Minimal get / set-with-TTL / delete contract.
#[async_trait]
pub trait LegacyCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    /// Like [`LegacyCache::get`], with the entry's remaining lifetime when
    /// the implementation knows it.
    async fn get_with_ttl(&self, key: &str) -> Option<(Value, Option<Duration>)> {
        self.get(key).await.map(|value| (value, None))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration);

    async fn del(&self, key: &str);
}

pub type DynLegacyCache = Arc<dyn LegacyCache>;

#[derive(Clone, Debug)]
struct LegacyEntry {
    value: Value,
    cached_at: Instant,
    ttl: Duration,
}

impl LegacyEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }

    fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.cached_at.elapsed())
    }
}

/// In-process [`LegacyCache`] for deployments without an external one.
#[derive(Debug, Default)]
pub struct LocalLegacyCache {
    entries: DashMap<String, LegacyEntry>,
}

impl LocalLegacyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

#[async_trait]
impl LegacyCache for LocalLegacyCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Value, Option<Duration>)> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some((entry.value.clone(), Some(entry.remaining())));
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries
            .insert(key.to_string(), LegacyEntry::new(value, ttl));
    }

    async fn del(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = LocalLegacyCache::new();
        cache.set("k", json!("v"), Duration::from_secs(5)).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_with_ttl_reports_remaining() {
        let cache = LocalLegacyCache::new();
        cache.set("k", json!(1), Duration::from_secs(10)).await;
        tokio::time::advance(Duration::from_secs(4)).await;

        let (value, remaining) = cache.get_with_ttl("k").await.unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(remaining, Some(Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn test_del() {
        let cache = LocalLegacyCache::new();
        cache.set("k", json!(1), Duration::from_secs(60)).await;
        cache.del("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = LocalLegacyCache::new();
        cache.set("short", json!(1), Duration::from_secs(1)).await;
        cache.set("long", json!(2), Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
    }
}
