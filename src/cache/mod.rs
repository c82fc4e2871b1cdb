//! Redis layer: the exchange-rate snapshot cache and the shared
//! rate-limiter windows. Every caller degrades gracefully when Redis is down.

pub mod keys;

#[cfg(feature = "cache")]
pub mod cache;
#[cfg(feature = "cache")]
pub mod error;
#[cfg(feature = "cache")]
mod pool;

#[cfg(feature = "cache")]
pub use cache::{Cache, RedisCache};
#[cfg(feature = "cache")]
pub use error::{CacheError, CacheResult};
#[cfg(feature = "cache")]
pub use pool::{
    get_cache_stats, health_check, init_cache_pool, shutdown_cache_pool, CacheConfig, CacheStats,
    RedisPool,
};
