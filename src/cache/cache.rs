//! Typed get/set over the Redis pool. Values are stored as JSON.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{CacheError, CacheResult};
use super::RedisPool;

#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
    default_ttl: Duration,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            default_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    pub async fn get_connection(
        &self,
    ) -> CacheResult<bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>> {
        self.pool.get().await.map_err(CacheError::from)
    }
}

#[async_trait]
impl<T> Cache<T> for RedisCache
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        match raw {
            Some(json) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    Ok(Some(value))
                }
                Err(e) => {
                    // A stale shape from an older release reads as a miss
                    warn!(key = %key, error = %e, "discarding undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("EX")
            .arg(ttl)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }
}
