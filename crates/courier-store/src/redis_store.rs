//! Redis backend over a deadpool-redis connection pool.

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{cmd, pipe};
use std::time::Duration;

use crate::{BackingStore, BatchOp, RedisConfig, StoreError, StoreResult};

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool with wait/create/recycle timeouts from `config`. Does not
    /// open a connection; see [`connect`](crate::connect) for the verified path.
    pub fn from_config(config: &RedisConfig) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("failed to create Redis pool: {e}")))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> StoreResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl BackingStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut set = cmd("SET");
        set.arg(key).arg(value);
        if let Some(ttl) = ttl {
            set.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = set.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(cmd("DEL").arg(keys).query_async(&mut conn).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        if values.is_empty() {
            return Ok(cmd("LLEN").arg(key).query_async(&mut conn).await?);
        }
        Ok(cmd("RPUSH").arg(key).arg(values).query_async(&mut conn).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        Ok(cmd("LLEN").arg(key).query_async(&mut conn).await?)
    }

    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // LRANGE + LTRIM inside MULTI/EXEC
        let (items,): (Vec<String>,) = pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(count as isize - 1)
            .cmd("LTRIM")
            .arg(key)
            .arg(count as isize)
            .arg(-1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<u64> {
        if count == 0 {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(cmd("LREM")
            .arg(key)
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(cmd("SADD").arg(key).arg(members).query_async(&mut conn).await?)
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(cmd("SREM").arg(key).arg(members).query_async(&mut conn).await?)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(cmd("SMEMBERS").arg(key).query_async(&mut conn).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: u64 = cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(max))
            .arg(score_arg(min))
            .arg("LIMIT")
            .arg(offset)
            .arg(limit.min(i64::MAX as usize))
            .query_async(&mut conn)
            .await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        Ok(cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await?)
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipeline = pipe();
        for op in &ops {
            match op {
                BatchOp::Set { key, value, ttl } => {
                    let set = pipeline.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        set.arg("PX").arg(ttl_millis(*ttl));
                    }
                    set.ignore();
                }
                BatchOp::ZAdd { key, member, score } => {
                    pipeline
                        .cmd("ZADD")
                        .arg(key)
                        .arg(score_arg(*score))
                        .arg(member)
                        .ignore();
                }
                BatchOp::SAdd { key, members } if !members.is_empty() => {
                    pipeline.cmd("SADD").arg(key).arg(members).ignore();
                }
                BatchOp::SAdd { .. } => {}
                BatchOp::Expire { key, ttl } => {
                    pipeline
                        .cmd("PEXPIRE")
                        .arg(key)
                        .arg(ttl_millis(*ttl))
                        .ignore();
                }
            }
        }

        let mut conn = self.conn().await?;
        pipeline.query_async::<()>(&mut conn).await?;
        tracing::trace!(ops = ops.len(), "Redis batch applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_arg() {
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(1_700_000_000_000.0), "1700000000000");
    }

    #[test]
    fn test_ttl_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
