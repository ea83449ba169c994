use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Two-tier cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tier-1 (in-process) TTL in seconds
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,

    /// Maximum number of tier-1 entries
    #[serde(default = "default_l1_max_capacity")]
    pub l1_max_capacity: u64,

    /// Tier-2 (shared) TTL in seconds when `set` is given none
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,

    /// Serialized size in bytes above which tier-2 values are compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Keys loaded concurrently per `warm` batch
    #[serde(default = "default_warm_batch_size")]
    pub warm_batch_size: usize,
}

fn default_l1_ttl_secs() -> u64 {
    300
}

fn default_l1_max_capacity() -> u64 {
    10_000
}

fn default_l2_ttl_secs() -> u64 {
    3600
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_warm_batch_size() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl_secs: default_l1_ttl_secs(),
            l1_max_capacity: default_l1_max_capacity(),
            l2_ttl_secs: default_l2_ttl_secs(),
            compression_threshold: default_compression_threshold(),
            warm_batch_size: default_warm_batch_size(),
        }
    }
}

impl CacheConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    /// Tier-1 TTL for a write: never longer than the write's own TTL.
    pub fn l1_ttl_for(&self, ttl: Option<Duration>) -> Duration {
        ttl.map_or(self.l1_ttl(), |t| t.min(self.l1_ttl()))
    }
}
