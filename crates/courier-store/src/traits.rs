//! The backing store contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::StoreResult;

/// A write grouped into a single [`BackingStore::apply_batch`] round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Key-value, list, set and sorted-set operations with per-key expiry.
///
/// Implementations must be thread-safe (`Send + Sync`); components hold them
/// as [`DynStore`](crate::DynStore). List indexes are inclusive and negative
/// values count from the tail, as in Redis.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Short backend name for logs and metrics labels.
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // ==================== Strings & keys ====================

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete keys of any type. Returns how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// Set a key's time to live. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    // ==================== Lists ====================

    /// Append to the tail. Returns the new length.
    async fn rpush(&self, key: &str, values: &[String]) -> StoreResult<u64>;

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// Keep only the `start..=stop` range.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// Remove and return up to `count` items from the head in one atomic
    /// step. Concurrent callers never receive the same item.
    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>>;

    /// Remove up to `count` occurrences of `value`, head first. Returns the
    /// number removed.
    async fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<u64>;

    // ==================== Sets ====================

    /// Returns the number of members newly added.
    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// Returns the number of members removed.
    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    // ==================== Sorted sets ====================

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Members with `min <= score <= max`, highest score first, skipping
    /// `offset` and returning at most `limit`.
    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    /// Remove members with `min <= score <= max`. Returns the number removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    // ==================== Batches ====================

    /// Apply writes in one round trip. Best-effort, not transactional.
    async fn apply_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;
}
