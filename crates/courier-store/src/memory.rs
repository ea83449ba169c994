//! In-process backing store.
//!
//! Complete implementation of the store contract for single-instance
//! deployments and tests. Expiry uses `tokio::time::Instant`, so paused-clock
//! tests can advance past a TTL without sleeping.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::{BackingStore, BatchOp, StoreError, StoreResult};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Slot>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`]. Data is kept.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock();
        data.retain(|_, slot| !slot.is_expired(now));
        data.len()
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store marked unavailable"))
        }
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut HashMap<String, Slot>) -> StoreResult<R>) -> StoreResult<R> {
        self.check()?;
        let mut data = self.data.lock();
        f(&mut data)
    }
}

fn purge_expired(data: &mut HashMap<String, Slot>, key: &str) {
    if data.get(key).is_some_and(|s| s.is_expired(Instant::now())) {
        data.remove(key);
    }
}

fn drop_if_empty(data: &mut HashMap<String, Slot>, key: &str) {
    if data.get(key).is_some_and(|s| s.value.is_empty()) {
        data.remove(key);
    }
}

/// Resolve inclusive, possibly negative list indexes against `len`.
fn normalize_range(start: isize, stop: isize, len: usize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn list_mut<'a>(data: &'a mut HashMap<String, Slot>, key: &str) -> StoreResult<&'a mut VecDeque<String>> {
    let slot = data
        .entry(key.to_string())
        .or_insert_with(|| Slot::new(Value::List(VecDeque::new())));
    match &mut slot.value {
        Value::List(list) => Ok(list),
        _ => Err(StoreError::command(WRONG_TYPE)),
    }
}

fn set_mut<'a>(data: &'a mut HashMap<String, Slot>, key: &str) -> StoreResult<&'a mut HashSet<String>> {
    let slot = data
        .entry(key.to_string())
        .or_insert_with(|| Slot::new(Value::Set(HashSet::new())));
    match &mut slot.value {
        Value::Set(set) => Ok(set),
        _ => Err(StoreError::command(WRONG_TYPE)),
    }
}

fn zset_mut<'a>(data: &'a mut HashMap<String, Slot>, key: &str) -> StoreResult<&'a mut HashMap<String, f64>> {
    let slot = data
        .entry(key.to_string())
        .or_insert_with(|| Slot::new(Value::ZSet(HashMap::new())));
    match &mut slot.value {
        Value::ZSet(zset) => Ok(zset),
        _ => Err(StoreError::command(WRONG_TYPE)),
    }
}

fn apply_set(data: &mut HashMap<String, Slot>, key: &str, value: &str, ttl: Option<Duration>) {
    data.insert(
        key.to_string(),
        Slot {
            value: Value::Str(value.to_string()),
            expires_at: ttl.map(|t| Instant::now() + t),
        },
    );
}

fn apply_expire(data: &mut HashMap<String, Slot>, key: &str, ttl: Duration) -> bool {
    purge_expired(data, key);
    match data.get_mut(key) {
        Some(slot) => {
            slot.expires_at = Some(Instant::now() + ttl);
            true
        }
        None => false,
    }
}

fn apply_sadd(data: &mut HashMap<String, Slot>, key: &str, members: &[String]) -> StoreResult<u64> {
    purge_expired(data, key);
    let set = set_mut(data, key)?;
    let added = members.iter().filter(|m| set.insert((*m).clone())).count();
    drop_if_empty(data, key);
    Ok(added as u64)
}

fn apply_zadd(data: &mut HashMap<String, Slot>, key: &str, member: &str, score: f64) -> StoreResult<()> {
    purge_expired(data, key);
    zset_mut(data, key)?.insert(member.to_string(), score);
    Ok(())
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_data(|data| {
            purge_expired(data, key);
            match data.get(key).map(|s| &s.value) {
                None => Ok(None),
                Some(Value::Str(s)) => Ok(Some(s.clone())),
                Some(_) => Err(StoreError::command(WRONG_TYPE)),
            }
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.with_data(|data| {
            apply_set(data, key, value, ttl);
            Ok(())
        })
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.with_data(|data| {
            let mut removed = 0;
            for key in keys {
                purge_expired(data, key);
                if data.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.with_data(|data| Ok(apply_expire(data, key, ttl)))
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        self.with_data(|data| {
            purge_expired(data, key);
            let list = list_mut(data, key)?;
            list.extend(values.iter().cloned());
            let len = list.len() as u64;
            drop_if_empty(data, key);
            Ok(len)
        })
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.with_data(|data| {
            purge_expired(data, key);
            let list = match data.get(key).map(|s| &s.value) {
                None => return Ok(Vec::new()),
                Some(Value::List(list)) => list,
                Some(_) => return Err(StoreError::command(WRONG_TYPE)),
            };
            Ok(match normalize_range(start, stop, list.len()) {
                Some((s, e)) => list.range(s..=e).cloned().collect(),
                None => Vec::new(),
            })
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.with_data(|data| {
            purge_expired(data, key);
            if !data.contains_key(key) {
                return Ok(());
            }
            let list = list_mut(data, key)?;
            match normalize_range(start, stop, list.len()) {
                Some((s, e)) => {
                    list.truncate(e + 1);
                    list.drain(..s);
                }
                None => list.clear(),
            }
            drop_if_empty(data, key);
            Ok(())
        })
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.with_data(|data| {
            purge_expired(data, key);
            match data.get(key).map(|s| &s.value) {
                None => Ok(0),
                Some(Value::List(list)) => Ok(list.len() as u64),
                Some(_) => Err(StoreError::command(WRONG_TYPE)),
            }
        })
    }

    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        self.with_data(|data| {
            purge_expired(data, key);
            if !data.contains_key(key) {
                return Ok(Vec::new());
            }
            let list = list_mut(data, key)?;
            let take = count.min(list.len());
            let items = list.drain(..take).collect();
            drop_if_empty(data, key);
            Ok(items)
        })
    }

    async fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<u64> {
        self.with_data(|data| {
            purge_expired(data, key);
            if !data.contains_key(key) {
                return Ok(0);
            }
            let list = list_mut(data, key)?;
            let mut removed = 0;
            list.retain(|item| {
                if removed < count && item == value {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            drop_if_empty(data, key);
            Ok(removed as u64)
        })
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.with_data(|data| apply_sadd(data, key, members))
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.with_data(|data| {
            purge_expired(data, key);
            if !data.contains_key(key) {
                return Ok(0);
            }
            let set = set_mut(data, key)?;
            let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
            drop_if_empty(data, key);
            Ok(removed as u64)
        })
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_data(|data| {
            purge_expired(data, key);
            match data.get(key).map(|s| &s.value) {
                None => Ok(Vec::new()),
                Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
                Some(_) => Err(StoreError::command(WRONG_TYPE)),
            }
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.with_data(|data| apply_zadd(data, key, member, score))
    }

    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.with_data(|data| {
            purge_expired(data, key);
            let zset = match data.get(key).map(|s| &s.value) {
                None => return Ok(Vec::new()),
                Some(Value::ZSet(zset)) => zset,
                Some(_) => return Err(StoreError::command(WRONG_TYPE)),
            };
            let mut matched: Vec<(&String, f64)> = zset
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(member, score)| (member, *score))
                .collect();
            matched.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
            Ok(matched
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|(member, _)| member.clone())
                .collect())
        })
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.with_data(|data| {
            purge_expired(data, key);
            if !data.contains_key(key) {
                return Ok(0);
            }
            let zset = zset_mut(data, key)?;
            let before = zset.len();
            zset.retain(|_, score| *score < min || *score > max);
            let removed = (before - zset.len()) as u64;
            drop_if_empty(data, key);
            Ok(removed)
        })
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.with_data(|data| {
            for op in ops {
                match op {
                    BatchOp::Set { key, value, ttl } => apply_set(data, &key, &value, ttl),
                    BatchOp::ZAdd { key, member, score } => {
                        apply_zadd(data, &key, &member, score)?;
                    }
                    BatchOp::SAdd { key, members } => {
                        apply_sadd(data, &key, &members)?;
                    }
                    BatchOp::Expire { key, ttl } => {
                        apply_expire(data, &key, ttl);
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_get_set_del() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        assert_eq!(store.del(&strings(&["k", "missing"])).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_list_range_and_trim() {
        let store = MemoryStore::new();
        store
            .rpush("l", &strings(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        assert_eq!(store.lrange("l", 0, 1).await.unwrap(), strings(&["a", "b"]));
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), strings(&["c", "d"]));
        assert_eq!(store.lrange("l", 0, 100).await.unwrap().len(), 4);

        store.ltrim("l", 2, -1).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), strings(&["c", "d"]));

        store.ltrim("l", 5, -1).await.unwrap();
        assert_eq!(store.llen("l").await.unwrap(), 0);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_lpop_and_lrem() {
        let store = MemoryStore::new();
        store
            .rpush("l", &strings(&["a", "b", "a", "c"]))
            .await
            .unwrap();

        assert_eq!(store.lrem("l", 1, "a").await.unwrap(), 1);
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), strings(&["b", "a", "c"]));

        assert_eq!(store.lpop("l", 2).await.unwrap(), strings(&["b", "a"]));
        assert_eq!(store.lpop("l", 5).await.unwrap(), strings(&["c"]));
        assert!(store.lpop("l", 5).await.unwrap().is_empty());
        assert_eq!(store.lrem("l", 1, "c").await.unwrap(), 0);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        assert_eq!(store.sadd("s", &strings(&["a", "b", "a"])).await.unwrap(), 2);
        assert_eq!(store.srem("s", &strings(&["a", "z"])).await.unwrap(), 1);
        assert_eq!(store.smembers("s").await.unwrap(), strings(&["b"]));
        store.srem("s", &strings(&["b"])).await.unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_sorted_set_reverse_range() {
        let store = MemoryStore::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            store.zadd("z", member, score).await.unwrap();
        }

        let all = store
            .zrevrangebyscore("z", f64::INFINITY, f64::NEG_INFINITY, 0, 10)
            .await
            .unwrap();
        assert_eq!(all, strings(&["d", "c", "b", "a"]));

        let page = store.zrevrangebyscore("z", 3.0, 1.0, 1, 1).await.unwrap();
        assert_eq!(page, strings(&["b"]));

        assert_eq!(store.zremrangebyscore("z", 0.0, 2.0).await.unwrap(), 2);
        assert_eq!(
            store
                .zrevrangebyscore("z", f64::INFINITY, f64::NEG_INFINITY, 0, 10)
                .await
                .unwrap(),
            strings(&["d", "c"])
        );
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        let err = store.rpush("k", &strings(&["x"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Command { .. }));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        store.set_available(false);

        assert!(store.ping().await.unwrap_err().is_unavailable());
        assert!(store.get("k").await.is_err());

        store.set_available(true);
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch() {
        let store = MemoryStore::new();
        store
            .apply_batch(vec![
                BatchOp::ZAdd {
                    key: "z".into(),
                    member: "m".into(),
                    score: 1.0,
                },
                BatchOp::SAdd {
                    key: "s".into(),
                    members: strings(&["a"]),
                },
                BatchOp::Expire {
                    key: "z".into(),
                    ttl: Duration::from_secs(5),
                },
                BatchOp::Set {
                    key: "k".into(),
                    value: "v".into(),
                    ttl: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.key_count(), 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.key_count(), 2);
    }
}
