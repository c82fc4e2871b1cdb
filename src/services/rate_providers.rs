//! Rate providers for the fee-valuation snapshot
//!
//! - FixedRateProvider: a configured table, used for local runs and as a last resort
//! - ExternalApiProvider: pulls `{ "rates": { "NGN": 1550.2, ... } }` from a rates API
//! - AggregatedRateProvider: combines several providers per currency

use super::exchange_rate::{ExchangeRateError, ExchangeRateResult, RateProvider};
use crate::config::{env_opt, env_or, ConfigError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Configured table of units per base currency
pub struct FixedRateProvider {
    rates: HashMap<String, BigDecimal>,
}

impl FixedRateProvider {
    pub fn new(rates: HashMap<String, BigDecimal>) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(currency, rate)| (currency.to_uppercase(), rate))
                .collect(),
        }
    }

    /// Reads `FIXED_RATES` as `NGN=1550,GHS=15.4`
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw: String = env_or("FIXED_RATES", "NGN=1550".to_string())?;
        Self::parse(&raw).map(Self::new)
    }

    fn parse(raw: &str) -> Result<HashMap<String, BigDecimal>, ConfigError> {
        let mut rates = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (currency, rate) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue(format!("FIXED_RATES entry {}", entry)))?;
            let rate = BigDecimal::from_str(rate.trim())
                .map_err(|_| ConfigError::InvalidValue(format!("FIXED_RATES rate {}", rate)))?;
            rates.insert(currency.trim().to_uppercase(), rate);
        }
        Ok(rates)
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn fetch_rates(&self, _base: &str) -> ExchangeRateResult<HashMap<String, BigDecimal>> {
        Ok(self.rates.clone())
    }

    async fn is_healthy(&self) -> bool {
        true // Always healthy since it's a fixed table
    }

    fn name(&self) -> &str {
        "FixedRateProvider"
    }
}

/// Settings for the HTTP rates source
#[derive(Debug, Clone)]
pub struct ExternalApiConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl ExternalApiConfig {
    /// `None` when `RATES_API_URL` is not set
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let api_url: Option<String> = env_opt("RATES_API_URL")?;
        match api_url {
            Some(api_url) => Ok(Some(Self {
                api_url,
                api_key: env_opt("RATES_API_KEY")?,
                timeout_seconds: env_or("RATES_API_TIMEOUT_SECS", 10)?,
            })),
            None => Ok(None),
        }
    }
}

/// External API provider for fetching rates from an open rates endpoint
pub struct ExternalApiProvider {
    client: reqwest::Client,
    config: ExternalApiConfig,
}

impl ExternalApiProvider {
    pub fn new(config: ExternalApiConfig) -> ExchangeRateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url_for(&self, base: &str) -> String {
        let url = self.config.api_url.trim_end_matches('/');
        if url.contains("{base}") {
            url.replace("{base}", base)
        } else {
            format!("{}/{}", url, base)
        }
    }
}

/// Pulls the `rates` object out of a response body. Numbers and numeric
/// strings are accepted; anything else is skipped.
pub(crate) fn parse_rates_body(body: &Value) -> ExchangeRateResult<HashMap<String, BigDecimal>> {
    let table = body
        .get("rates")
        .or_else(|| body.get("conversion_rates"))
        .and_then(Value::as_object)
        .ok_or_else(|| ExchangeRateError::InvalidRate("response has no rates object".to_string()))?;

    let mut rates = HashMap::new();
    for (currency, value) in table {
        let parsed = match value {
            Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
            Value::String(s) => BigDecimal::from_str(s).ok(),
            _ => None,
        };
        match parsed {
            Some(rate) => {
                rates.insert(currency.to_uppercase(), rate);
            }
            None => debug!(currency = %currency, "skipping unparseable rate"),
        }
    }
    Ok(rates)
}

#[async_trait]
impl RateProvider for ExternalApiProvider {
    async fn fetch_rates(&self, base: &str) -> ExchangeRateResult<HashMap<String, BigDecimal>> {
        let mut request = self.client.get(self.url_for(base));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExchangeRateError::ProviderError(format!(
                "rates API returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;

        parse_rates_body(&body)
    }

    async fn is_healthy(&self) -> bool {
        match self.client.head(&self.config.api_url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                warn!(error = %e, "rates API unreachable");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "ExternalApiProvider"
    }
}

/// Multi-source rate provider that aggregates rates from multiple sources
pub struct AggregatedRateProvider {
    providers: Vec<Box<dyn RateProvider>>,
    aggregation_strategy: AggregationStrategy,
}

#[derive(Debug, Clone, Copy)]
pub enum AggregationStrategy {
    Average,
    Median,
    First,
}

impl AggregatedRateProvider {
    pub fn new(strategy: AggregationStrategy) -> Self {
        Self {
            providers: Vec::new(),
            aggregation_strategy: strategy,
        }
    }

    pub fn add_provider(mut self, provider: Box<dyn RateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    fn aggregate(&self, mut quotes: Vec<BigDecimal>) -> Option<BigDecimal> {
        if quotes.is_empty() {
            return None;
        }
        Some(match self.aggregation_strategy {
            AggregationStrategy::First => quotes.swap_remove(0),
            AggregationStrategy::Average => {
                let count = BigDecimal::from(quotes.len() as u64);
                let sum: BigDecimal = quotes.into_iter().sum();
                sum / count
            }
            AggregationStrategy::Median => {
                quotes.sort();
                let mid = quotes.len() / 2;
                if quotes.len() % 2 == 0 {
                    (&quotes[mid - 1] + &quotes[mid]) / BigDecimal::from(2)
                } else {
                    quotes.swap_remove(mid)
                }
            }
        })
    }
}

#[async_trait]
impl RateProvider for AggregatedRateProvider {
    async fn fetch_rates(&self, base: &str) -> ExchangeRateResult<HashMap<String, BigDecimal>> {
        if self.providers.is_empty() {
            return Err(ExchangeRateError::ProviderError(
                "No providers configured".to_string(),
            ));
        }

        let mut quotes: HashMap<String, Vec<BigDecimal>> = HashMap::new();
        let mut last_error = None;

        for provider in &self.providers {
            match provider.fetch_rates(base).await {
                Ok(table) => {
                    for (currency, rate) in table {
                        quotes.entry(currency).or_default().push(rate);
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        if quotes.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                ExchangeRateError::ProviderError("All providers failed".to_string())
            }));
        }

        Ok(quotes
            .into_iter()
            .filter_map(|(currency, rates)| self.aggregate(rates).map(|rate| (currency, rate)))
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        // At least one provider must be healthy
        for provider in &self.providers {
            if provider.is_healthy().await {
                return true;
            }
        }
        false
    }

    fn name(&self) -> &str {
        "AggregatedRateProvider"
    }
}
