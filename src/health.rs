//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

#[cfg(feature = "cache")]
use crate::cache::RedisCache;
use crate::services::exchange_rate::ExchangeRateService;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// Health checker for the application. Components that are not configured
/// (in-memory mode) are reported as such and never fail readiness.
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
    rates: Option<Arc<ExchangeRateService>>,
    probe_timeout: Option<Duration>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rates(mut self, rates: Arc<ExchangeRateService>) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn with_probe_timeout(mut self, limit: Duration) -> Self {
        self.probe_timeout = Some(limit);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let limit = self.probe_timeout.unwrap_or(Duration::from_secs(5));
        #[allow(unused_mut)]
        let mut overall_healthy = true;

        #[cfg(feature = "database")]
        {
            if let Some(pool) = &self.db_pool {
                let component = probe("database", limit, check_database_health(pool)).await;
                overall_healthy &= component.status == ComponentState::Up;
                health_status.checks.insert("database".to_string(), component);
            }
        }

        #[cfg(feature = "cache")]
        {
            if let Some(cache) = &self.cache {
                let component = probe("cache", limit, check_cache_health(cache)).await;
                overall_healthy &= component.status == ComponentState::Up;
                health_status.checks.insert("cache".to_string(), component);
            }
        }

        if health_status.checks.is_empty() {
            health_status.checks.insert(
                "store".to_string(),
                ComponentHealth::up(None).with_details("in-memory"),
            );
        }

        // Rates only value fees for reporting; a stale source degrades, never fails
        let mut degraded = false;
        if let Some(rates) = &self.rates {
            let started = Instant::now();
            let component = match timeout(limit, rates.is_healthy()).await {
                Ok(true) => ComponentHealth::up(Some(started.elapsed().as_millis())),
                Ok(false) => ComponentHealth::warning(None, Some("no healthy provider".to_string())),
                Err(_) => ComponentHealth::warning(None, Some("Timeout".to_string())),
            };
            degraded = component.status != ComponentState::Up;
            health_status.checks.insert("rates".to_string(), component);
        }

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

impl ComponentHealth {
    fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

async fn probe<F>(name: &str, limit: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<u128, ProbeError>>,
{
    match timeout(limit, check).await {
        Ok(Ok(response_time)) => {
            info!("{} health check: OK ({}ms)", name, response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, ProbeError> {
    let start = Instant::now();
    crate::database::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(cache: &RedisCache) -> Result<u128, ProbeError> {
    let start = Instant::now();
    crate::cache::health_check(cache.pool()).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
    }

    #[tokio::test]
    async fn in_memory_checker_is_healthy() {
        let status = HealthChecker::new().check_health().await;
        assert!(status.is_healthy());
        assert!(status.checks.contains_key("store"));
    }

    #[tokio::test]
    async fn probe_times_out() {
        let component = probe("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert_eq!(component.status, ComponentState::Down);
    }
}
