pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(feature = "database")]
pub mod exchange_rate_repository;
#[cfg(feature = "database")]
pub mod external_operation_repository;
#[cfg(feature = "database")]
pub mod user_repository;
#[cfg(feature = "database")]
pub mod wallet_repository;

#[cfg(feature = "database")]
pub use postgres::*;

#[cfg(feature = "database")]
mod postgres {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error, info, warn};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    /// Sizing and timeouts for the ledger's connection pool
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub acquire_timeout: Duration,
        pub idle_timeout: Option<Duration>,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 10,
                min_connections: 1,
                acquire_timeout: Duration::from_secs(10),
                idle_timeout: Some(Duration::from_secs(300)),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    impl From<&DatabaseConfig> for PoolConfig {
        fn from(config: &DatabaseConfig) -> Self {
            Self {
                max_connections: config.max_connections,
                min_connections: config.min_connections.min(config.max_connections),
                acquire_timeout: Duration::from_secs(config.connection_timeout),
                idle_timeout: config.idle_timeout.map(Duration::from_secs),
                ..Self::default()
            }
        }
    }

    /// Open a pool and make sure one connection can actually be checked out.
    /// Transfers lock wallet rows, so a pool that cannot hand out connections
    /// would only surface later as request timeouts.
    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "opening ledger database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error = %e, "could not open ledger database pool");
                DatabaseError::from_sqlx(e)
            })?;

        health_check(&pool).await?;
        info!("ledger database pool ready");
        Ok(pool)
    }

    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        init_pool(&config.url, Some(PoolConfig::from(config))).await
    }

    /// Apply `migrations/` to the connected database
    pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
            error!(error = %e, "ledger migrations failed");
            DatabaseError::unknown(format!("migration failed: {}", e))
        })?;
        info!("ledger migrations applied");
        Ok(())
    }

    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!(error = %e, "ledger database ping failed");
                DatabaseError::from_sqlx(e)
            })
    }

    /// PostgreSQL-backed ledger store. The repository traits are implemented
    /// across the `*_repository` modules.
    #[derive(Clone)]
    pub struct PgStore {
        pub(crate) pool: PgPool,
    }

    impl PgStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        pub fn pool(&self) -> &PgPool {
            &self.pool
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn pool_settings_follow_database_config() {
            let config = DatabaseConfig {
                url: "postgres://localhost/wallet".to_string(),
                max_connections: 4,
                min_connections: 8,
                connection_timeout: 3,
                idle_timeout: None,
            };
            let pool = PoolConfig::from(&config);
            assert_eq!(pool.max_connections, 4);
            // never asks for more idle connections than the pool may hold
            assert_eq!(pool.min_connections, 4);
            assert_eq!(pool.acquire_timeout, Duration::from_secs(3));
            assert!(pool.idle_timeout.is_none());
        }

        #[tokio::test]
        #[ignore] // Requires database running
        async fn pool_opens_against_a_live_database() {
            let url = std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/wallet".to_string());
            let pool = init_pool(&url, None).await.unwrap();
            health_check(&pool).await.unwrap();
        }
    }
}
