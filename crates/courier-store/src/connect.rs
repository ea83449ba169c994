use courier_core::Backoff;
use std::sync::Arc;
use std::time::Duration;

use crate::{BackingStore, DynStore, MemoryStore, RedisConfig, RedisStore, StoreError, StoreResult};

/// Open the store described by `config`.
///
/// With Redis enabled the pool is verified with `PING`, retried up to
/// `connect_attempts` times with exponential delays. When every attempt fails
/// (or Redis is disabled) the in-process store is returned if
/// `memory_fallback` is set, otherwise [`StoreError::Unavailable`].
pub async fn connect(config: &RedisConfig) -> StoreResult<DynStore> {
    if !config.enabled {
        return fallback(config, "Redis disabled");
    }

    let store = match RedisStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool");
            return fallback(config, "Redis pool creation failed");
        }
    };

    let backoff = Backoff::new(
        Duration::from_millis(config.reconnect_base_ms),
        config.timeout(),
    );
    let attempts = config.connect_attempts.max(1);

    for attempt in 0..attempts {
        match tokio::time::timeout(config.timeout(), store.ping()).await {
            Ok(Ok(())) => {
                tracing::info!(url = %config.masked_url(), "✓ Connected to Redis");
                return Ok(Arc::new(store));
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt = attempt + 1, attempts, error = %e, "Redis connection attempt failed");
            }
            Err(_) => {
                tracing::warn!(attempt = attempt + 1, attempts, "Redis connection attempt timed out");
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }

    fallback(config, "Redis unreachable")
}

fn fallback(config: &RedisConfig, reason: &str) -> StoreResult<DynStore> {
    if config.memory_fallback {
        tracing::warn!(reason, "Using in-process store (single instance only)");
        Ok(Arc::new(MemoryStore::new()))
    } else {
        tracing::warn!(reason, "No backing store; components run in degraded mode");
        Err(StoreError::unavailable(reason))
    }
}
