use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compression::{compress, decompress};
use crate::CacheResult;

/// Tier-2 envelope stored as JSON under `cache:{key}`.
///
/// When `compressed` is set, `value` is a string holding the gzip + base64
/// encoding of the value's JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    /// Expiry in epoch milliseconds
    pub expires_at: i64,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hit_count: u64,
    /// Last read or write in epoch milliseconds
    pub last_accessed_at: i64,
}

impl CacheEntry {
    /// Wrap `value`, compressing it when its JSON is longer than `threshold` bytes.
    pub fn encode(
        value: Value,
        now_ms: i64,
        ttl_ms: i64,
        tags: Vec<String>,
        threshold: usize,
    ) -> CacheResult<Self> {
        let json = serde_json::to_vec(&value)?;
        let (value, compressed) = if json.len() > threshold {
            (Value::String(compress(&json)?), true)
        } else {
            (value, false)
        };

        Ok(Self {
            value,
            expires_at: now_ms.saturating_add(ttl_ms),
            compressed,
            tags,
            hit_count: 0,
            last_accessed_at: now_ms,
        })
    }

    /// The stored value, decompressed if needed.
    pub fn decode(self) -> CacheResult<Value> {
        if !self.compressed {
            return Ok(self.value);
        }
        match self.value {
            Value::String(encoded) => decompress(&encoded),
            _ => Err(crate::CacheError::compression(
                "compressed entry does not hold a string",
            )),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(self.expires_at.saturating_sub(now_ms)).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub total_requests: u64,
    /// Percentage of requests served by either tier
    pub hit_rate: f64,
    /// Moving average of `get` latency in milliseconds
    pub average_response_time: f64,
    /// Current tier-1 entry count
    pub cache_size: u64,
    /// Tier-1 entries evicted for capacity
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_values_stay_plain() {
        let entry = CacheEntry::encode(json!({"a": 1}), 1_000, 500, vec![], 1024).unwrap();
        assert!(!entry.compressed);
        assert_eq!(entry.expires_at, 1_500);
        assert_eq!(entry.decode().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_large_values_are_compressed() {
        let value = json!({"body": "x".repeat(4096)});
        let entry = CacheEntry::encode(value.clone(), 0, 1_000, vec!["t".into()], 1024).unwrap();
        assert!(entry.compressed);
        assert!(entry.value.is_string());
        assert_eq!(entry.decode().unwrap(), value);
    }

    #[test]
    fn test_envelope_field_names() {
        let entry = CacheEntry::encode(json!(1), 10, 20, vec!["a".into()], 1024).unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["expiresAt"], 30);
        assert_eq!(json["hitCount"], 0);
        assert_eq!(json["lastAccessedAt"], 10);
        assert_eq!(json["tags"], json!(["a"]));
    }

    #[test]
    fn test_remaining_lifetime() {
        let entry = CacheEntry::encode(json!(1), 0, 1_000, vec![], 1024).unwrap();
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
        assert_eq!(entry.remaining_ms(400), 600);
        assert_eq!(entry.remaining_ms(5_000), 0);
    }
}
