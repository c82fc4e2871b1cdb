//! Exchange Rate Service
//!
//! Keeps the currency→USD snapshot used to value platform fees in a reporting
//! currency. Reads go cache → store; only `refresh` writes, and only the rate
//! refresh job calls it. Money movement never writes rates.

#[cfg(feature = "cache")]
use crate::cache::cache::{Cache, RedisCache};
#[cfg(feature = "cache")]
use crate::cache::keys::exchange_rate::SnapshotKey;
use crate::config::{env_or, ConfigError};
use crate::database::error::DatabaseError;
use crate::database::models::RateSnapshot;
use crate::database::repository::ExchangeRateRepository;
use crate::error::{AppError, AppErrorKind, ExternalError};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "cache")]
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exchange rate service error
#[derive(Debug, thiserror::Error)]
pub enum ExchangeRateError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rate not found for {currency}")]
    RateNotFound { currency: String },

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Rate provider error: {0}")]
    ProviderError(String),

    #[error("No rate provider produced a usable table")]
    NoProviderAvailable,
}

pub type ExchangeRateResult<T> = Result<T, ExchangeRateError>;

impl From<ExchangeRateError> for AppError {
    fn from(err: ExchangeRateError) -> Self {
        match err {
            ExchangeRateError::Database(db) => db.into(),
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "rates".to_string(),
                message: other.to_string(),
                is_retryable: true,
            })),
        }
    }
}

/// Rate provider trait for fetching exchange rates
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetch the full table quoted against `base`: units of each currency per one `base`
    async fn fetch_rates(&self, base: &str) -> ExchangeRateResult<HashMap<String, BigDecimal>>;

    /// Check if provider is healthy
    async fn is_healthy(&self) -> bool;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Exchange rate service configuration
#[derive(Debug, Clone)]
pub struct ExchangeRateServiceConfig {
    pub base_currency: String,
    pub cache_ttl_seconds: u64,
}

impl Default for ExchangeRateServiceConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            cache_ttl_seconds: 3600,
        }
    }
}

impl ExchangeRateServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            base_currency: env_or("RATES_BASE_CURRENCY", defaults.base_currency)?.to_uppercase(),
            cache_ttl_seconds: env_or("RATES_CACHE_TTL_SECS", defaults.cache_ttl_seconds)?,
        })
    }
}

/// Main exchange rate service
pub struct ExchangeRateService {
    repository: Arc<dyn ExchangeRateRepository>,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
    providers: Vec<Arc<dyn RateProvider>>,
    config: ExchangeRateServiceConfig,
}

impl ExchangeRateService {
    pub fn new(
        repository: Arc<dyn ExchangeRateRepository>,
        config: ExchangeRateServiceConfig,
    ) -> Self {
        Self {
            repository,
            #[cfg(feature = "cache")]
            cache: None,
            providers: Vec::new(),
            config,
        }
    }

    /// Enable caching
    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Add rate provider. Providers are tried in insertion order.
    pub fn add_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn base_currency(&self) -> &str {
        &self.config.base_currency
    }

    /// Pull a fresh table from the first provider that answers and store it as
    /// the current snapshot.
    pub async fn refresh(&self) -> ExchangeRateResult<RateSnapshot> {
        let base = self.config.base_currency.clone();
        for provider in &self.providers {
            let table = match provider.fetch_rates(&base).await {
                Ok(table) => table,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "rate provider failed");
                    continue;
                }
            };

            let mut rates: HashMap<String, BigDecimal> = table
                .into_iter()
                .filter(|(currency, rate)| {
                    let usable = rate > &BigDecimal::zero();
                    if !usable {
                        warn!(currency = %currency, rate = %rate, "dropping non-positive rate");
                    }
                    usable
                })
                .map(|(currency, rate)| (currency.to_uppercase(), rate))
                .collect();
            if rates.is_empty() {
                warn!(provider = provider.name(), "rate provider returned an empty table");
                continue;
            }
            rates.insert(base.clone(), BigDecimal::from(1));

            let snapshot = RateSnapshot {
                base: base.clone(),
                rates,
                refreshed_at: Utc::now(),
            };
            self.repository.replace_rates(&snapshot).await?;
            self.write_cache(&snapshot).await;

            info!(
                provider = provider.name(),
                currencies = snapshot.rates.len(),
                "exchange rate snapshot refreshed"
            );
            return Ok(snapshot);
        }

        Err(ExchangeRateError::NoProviderAvailable)
    }

    /// Latest snapshot, if one has ever been stored
    pub async fn current_snapshot(&self) -> ExchangeRateResult<Option<RateSnapshot>> {
        if let Some(snapshot) = self.read_cache().await {
            debug!("Cache hit for rate snapshot");
            return Ok(Some(snapshot));
        }

        let snapshot = self.repository.current_rates().await?;
        if let Some(snapshot) = &snapshot {
            self.write_cache(snapshot).await;
        }
        Ok(snapshot)
    }

    /// Units of `currency` per one USD. Falls back to 1 when the snapshot is
    /// missing, lacks the currency, or cannot be read.
    pub async fn rate_to_usd(&self, currency: &str) -> BigDecimal {
        match self.current_snapshot().await {
            Ok(Some(snapshot)) => match snapshot.rate_for(currency) {
                Some(rate) if rate > &BigDecimal::zero() => rate.clone(),
                _ => {
                    debug!(currency = %currency, "no cached rate, using 1");
                    BigDecimal::from(1)
                }
            },
            Ok(None) => BigDecimal::from(1),
            Err(e) => {
                warn!(currency = %currency, error = %e, "rate lookup failed, using 1");
                BigDecimal::from(1)
            }
        }
    }

    pub async fn is_healthy(&self) -> bool {
        for provider in &self.providers {
            if provider.is_healthy().await {
                return true;
            }
        }
        false
    }

    #[cfg(feature = "cache")]
    async fn read_cache(&self) -> Option<RateSnapshot> {
        let cache = self.cache.as_ref()?;
        let key = SnapshotKey::new(&self.config.base_currency).to_string();
        match <RedisCache as Cache<RateSnapshot>>::get(cache, &key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "rate cache read failed");
                None
            }
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn read_cache(&self) -> Option<RateSnapshot> {
        None
    }

    #[cfg(feature = "cache")]
    async fn write_cache(&self, snapshot: &RateSnapshot) {
        if let Some(cache) = &self.cache {
            let key = SnapshotKey::new(&snapshot.base).to_string();
            let ttl = Duration::from_secs(self.config.cache_ttl_seconds);
            if let Err(e) = cache.set(&key, snapshot, Some(ttl)).await {
                warn!(error = %e, "rate cache write failed");
            }
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn write_cache(&self, _snapshot: &RateSnapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::services::rate_providers::FixedRateProvider;
    use std::str::FromStr;

    struct FailingProvider;

    #[async_trait]
    impl RateProvider for FailingProvider {
        async fn fetch_rates(&self, _base: &str) -> ExchangeRateResult<HashMap<String, BigDecimal>> {
            Err(ExchangeRateError::ProviderError("offline".to_string()))
        }

        async fn is_healthy(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn service_with(providers: Vec<Arc<dyn RateProvider>>) -> ExchangeRateService {
        let store = Arc::new(InMemoryStore::new());
        providers.into_iter().fold(
            ExchangeRateService::new(store, ExchangeRateServiceConfig::default()),
            |service, provider| service.add_provider(provider),
        )
    }

    #[tokio::test]
    async fn missing_snapshot_defaults_to_one() {
        let service = service_with(vec![]);
        assert_eq!(service.rate_to_usd("NGN").await, BigDecimal::from(1));
    }

    #[tokio::test]
    async fn refresh_falls_through_to_next_provider() {
        let fixed = FixedRateProvider::new(HashMap::from([
            ("NGN".to_string(), BigDecimal::from(1550)),
            ("GHS".to_string(), BigDecimal::from(0)),
        ]));
        let service = service_with(vec![Arc::new(FailingProvider), Arc::new(fixed)]);

        let snapshot = service.refresh().await.unwrap();
        assert_eq!(snapshot.rate_for("ngn"), Some(&BigDecimal::from(1550)));
        assert!(snapshot.rate_for("GHS").is_none());
        assert_eq!(snapshot.rate_for("USD"), Some(&BigDecimal::from(1)));

        assert_eq!(service.rate_to_usd("NGN").await, BigDecimal::from(1550));
        assert_eq!(service.rate_to_usd("KES").await, BigDecimal::from(1));
    }

    #[tokio::test]
    async fn refresh_without_working_provider_keeps_old_snapshot() {
        let fixed = FixedRateProvider::new(HashMap::from([(
            "NGN".to_string(),
            BigDecimal::from_str("1500.5").unwrap(),
        )]));
        let store = Arc::new(InMemoryStore::new());
        let first = ExchangeRateService::new(store.clone(), ExchangeRateServiceConfig::default())
            .add_provider(Arc::new(fixed));
        first.refresh().await.unwrap();

        let second = ExchangeRateService::new(store, ExchangeRateServiceConfig::default())
            .add_provider(Arc::new(FailingProvider));
        assert!(matches!(
            second.refresh().await,
            Err(ExchangeRateError::NoProviderAvailable)
        ));
        assert_eq!(
            second.rate_to_usd("NGN").await,
            BigDecimal::from_str("1500.5").unwrap()
        );
    }
}
