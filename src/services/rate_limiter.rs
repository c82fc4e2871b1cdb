//! Sliding-window counters for abuse mitigation.
//!
//! Two backends share one trait. The in-process one is per instance and
//! therefore best effort when several instances run. The Redis one keeps a
//! sorted set of hit timestamps per key, shared by every instance.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{env_or, ConfigError};
use crate::error::{AppError, AppErrorKind, InfrastructureError};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit backend error: {0}")]
    Backend(String),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

#[cfg(feature = "cache")]
impl From<crate::cache::CacheError> for RateLimitError {
    fn from(err: crate::cache::CacheError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Lookups per user per window
    pub user_limit: u32,
    /// Lookups per client address per window
    pub ip_limit: u32,
    pub window_secs: u64,
    /// Not-found results tolerated per user before lookups are refused
    pub not_found_limit: u32,
    pub not_found_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_limit: 30,
            ip_limit: 60,
            window_secs: 60,
            not_found_limit: 10,
            not_found_window_secs: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            user_limit: env_or("LOOKUP_USER_LIMIT", defaults.user_limit)?,
            ip_limit: env_or("LOOKUP_IP_LIMIT", defaults.ip_limit)?,
            window_secs: env_or("LOOKUP_WINDOW_SECS", defaults.window_secs)?,
            not_found_limit: env_or("LOOKUP_NOT_FOUND_LIMIT", defaults.not_found_limit)?,
            not_found_window_secs: env_or(
                "LOOKUP_NOT_FOUND_WINDOW_SECS",
                defaults.not_found_window_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_limit == 0 || self.ip_limit == 0 || self.not_found_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "lookup limits must be greater than zero".to_string(),
            ));
        }
        if self.window_secs == 0 || self.not_found_window_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "lookup windows must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn not_found_window(&self) -> Duration {
        Duration::from_secs(self.not_found_window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Records a hit for `key` unless `limit` hits already fall in the window
    async fn try_acquire(&self, key: &str, limit: u32, window: Duration)
        -> RateLimitResult<RateDecision>;

    /// Hits currently inside the window, without recording one
    async fn count(&self, key: &str, window: Duration) -> RateLimitResult<u32>;

    /// Records a hit regardless of the count
    async fn record(&self, key: &str, window: Duration) -> RateLimitResult<()>;
}

// ============================================================================
// In-process backend
// ============================================================================

/// Keys tracked before idle windows are swept
const PRUNE_THRESHOLD: usize = 10_000;

/// Hits for one key, swept with the window the key is used with
#[derive(Default)]
struct HitLog {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl HitLog {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// A key keeps the longest window it has been asked about
    fn widen(&mut self, window: Duration) {
        self.window = self.window.max(window);
    }
}

#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: DashMap<String, HitLog>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn prune(&self, now: Instant) {
        if self.windows.len() < PRUNE_THRESHOLD {
            return;
        }
        self.windows.retain(|_, log| {
            let window = log.window;
            log.evict(now, window);
            !log.hits.is_empty()
        });
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimiter {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitResult<RateDecision> {
        let now = Instant::now();
        self.prune(now);

        let mut log = self.windows.entry(key.to_string()).or_default();
        log.widen(window);
        log.evict(now, window);

        if log.hits.len() < limit as usize {
            log.hits.push_back(now);
            Ok(RateDecision::Allowed {
                remaining: limit - log.hits.len() as u32,
            })
        } else {
            let retry_after = log
                .hits
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            Ok(RateDecision::Limited { retry_after })
        }
    }

    async fn count(&self, key: &str, window: Duration) -> RateLimitResult<u32> {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(mut log) => {
                log.evict(now, window);
                Ok(log.hits.len() as u32)
            }
            None => Ok(0),
        }
    }

    async fn record(&self, key: &str, window: Duration) -> RateLimitResult<()> {
        let now = Instant::now();
        let mut log = self.windows.entry(key.to_string()).or_default();
        log.widen(window);
        log.evict(now, window);
        log.hits.push_back(now);
        Ok(())
    }
}

// ============================================================================
// Redis backend
// ============================================================================

#[cfg(feature = "cache")]
pub use redis_backend::RedisRateLimiter;

#[cfg(feature = "cache")]
mod redis_backend {
    use super::*;
    use crate::cache::{CacheError, RedisPool};
    use uuid::Uuid;

    /// Sorted set per key; members are unique hit ids scored by epoch millis
    #[derive(Clone)]
    pub struct RedisRateLimiter {
        pool: RedisPool,
    }

    impl RedisRateLimiter {
        pub fn new(pool: RedisPool) -> Self {
            Self { pool }
        }

        fn now_millis() -> i64 {
            chrono::Utc::now().timestamp_millis()
        }
    }

    #[async_trait]
    impl RateLimitStore for RedisRateLimiter {
        async fn try_acquire(
            &self,
            key: &str,
            limit: u32,
            window: Duration,
        ) -> RateLimitResult<RateDecision> {
            let mut conn = self.pool.get().await.map_err(CacheError::from)?;
            let now = Self::now_millis();
            let window_ms = window.as_millis() as i64;
            let member = Uuid::new_v4().to_string();

            // Add first, then count, so racing instances cannot both slip under
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(now - window_ms)
                .ignore()
                .cmd("ZADD")
                .arg(key)
                .arg(now)
                .arg(&member)
                .ignore()
                .cmd("ZCARD")
                .arg(key)
                .cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .ignore()
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;

            if count <= limit as u64 {
                return Ok(RateDecision::Allowed {
                    remaining: limit.saturating_sub(count as u32),
                });
            }

            let _: i64 = redis::cmd("ZREM")
                .arg(key)
                .arg(&member)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;
            let oldest: Vec<(String, i64)> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(0)
                .arg("WITHSCORES")
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;
            let retry_after = oldest
                .first()
                .map(|(_, score)| (score + window_ms - now).max(0) as u64)
                .map(Duration::from_millis)
                .unwrap_or(window);
            Ok(RateDecision::Limited { retry_after })
        }

        async fn count(&self, key: &str, window: Duration) -> RateLimitResult<u32> {
            let mut conn = self.pool.get().await.map_err(CacheError::from)?;
            let since = Self::now_millis() - window.as_millis() as i64;
            let count: u64 = redis::cmd("ZCOUNT")
                .arg(key)
                .arg(since)
                .arg("+inf")
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;
            Ok(count as u32)
        }

        async fn record(&self, key: &str, window: Duration) -> RateLimitResult<()> {
            let mut conn = self.pool.get().await.map_err(CacheError::from)?;
            let now = Self::now_millis();
            let window_ms = window.as_millis() as i64;
            let _: () = redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(now - window_ms)
                .ignore()
                .cmd("ZADD")
                .arg(key)
                .arg(now)
                .arg(Uuid::new_v4().to_string())
                .ignore()
                .cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .ignore()
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_refills_after_it_slides() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(limiter.try_acquire("u1", 3, window).await.unwrap().is_allowed());
        }
        match limiter.try_acquire("u1", 3, window).await.unwrap() {
            RateDecision::Limited { retry_after } => assert_eq!(retry_after, window),
            other => panic!("expected limit, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_acquire("u1", 3, window).await.unwrap().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.try_acquire("a", 1, window).await.unwrap().is_allowed());
        assert!(!limiter.try_acquire("a", 1, window).await.unwrap().is_allowed());
        assert!(limiter.try_acquire("b", 1, window).await.unwrap().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn record_and_count_share_the_window() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(10);
        limiter.record("miss", window).await.unwrap();
        limiter.record("miss", window).await.unwrap();
        assert_eq!(limiter.count("miss", window).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.count("miss", window).await.unwrap(), 0);
        assert_eq!(limiter.count("never", window).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_hits_inside_their_own_window() {
        let limiter = InMemoryRateLimiter::new();
        let short = Duration::from_secs(60);
        let long = Duration::from_secs(600);

        for _ in 0..3 {
            limiter.record("lookup_not_found:alice", long).await.unwrap();
        }
        for i in 0..PRUNE_THRESHOLD {
            let key = format!("lookup_ip:{}", i);
            limiter.try_acquire(&key, 30, short).await.unwrap();
        }
        assert!(limiter.tracked_keys() > PRUNE_THRESHOLD);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.try_acquire("lookup_user:bob", 30, short).await.unwrap();

        // short windows were swept, the penalty window was not
        assert_eq!(limiter.tracked_keys(), 2);
        assert_eq!(limiter.count("lookup_not_found:alice", long).await.unwrap(), 3);
    }

    #[test]
    fn config_rejects_zero_limits() {
        let config = RateLimitConfig {
            user_limit: 0,
            ..RateLimitConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RateLimitConfig::default().validate().is_ok());
    }
}
