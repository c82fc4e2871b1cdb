use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{env_flag, env_or, ConfigError};
use crate::services::exchange_rate::ExchangeRateService;

#[derive(Debug, Clone)]
pub struct RateRefreshConfig {
    pub interval: Duration,
    /// Refresh once before the first interval elapses
    pub run_on_start: bool,
}

impl Default for RateRefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(86_400),
            run_on_start: true,
        }
    }
}

impl RateRefreshConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let interval_secs: u64 = env_or("RATE_REFRESH_INTERVAL_SECS", defaults.interval.as_secs())?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_REFRESH_INTERVAL_SECS".to_string(),
            ));
        }
        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            run_on_start: env_flag("RATE_REFRESH_ON_START", defaults.run_on_start)?,
        })
    }
}

/// The only writer of the rate snapshot
pub struct RateRefreshWorker {
    rates: Arc<ExchangeRateService>,
    config: RateRefreshConfig,
}

impl RateRefreshWorker {
    pub fn new(rates: Arc<ExchangeRateService>, config: RateRefreshConfig) -> Self {
        Self { rates, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "rate refresh worker started"
        );
        if self.config.run_on_start {
            self.refresh().await;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("rate refresh worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => self.refresh().await,
            }
        }
    }

    async fn refresh(&self) {
        match self.rates.refresh().await {
            Ok(snapshot) => info!(
                base = %snapshot.base,
                currencies = snapshot.rates.len(),
                "exchange rates refreshed"
            ),
            // The previous snapshot stays in place
            Err(e) => error!(error = %e, "exchange rate refresh failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::services::exchange_rate::ExchangeRateServiceConfig;
    use crate::services::rate_providers::FixedRateProvider;
    use bigdecimal::BigDecimal;
    use std::collections::HashMap;

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_start_and_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let mut table = HashMap::new();
        table.insert("NGN".to_string(), BigDecimal::from(1550));
        let rates = Arc::new(
            ExchangeRateService::new(store, ExchangeRateServiceConfig::default())
                .add_provider(Arc::new(FixedRateProvider::new(table))),
        );

        let (tx, rx) = watch::channel(false);
        let worker = RateRefreshWorker::new(rates.clone(), RateRefreshConfig::default());
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = rates.current_snapshot().await.unwrap().expect("snapshot written");
        assert_eq!(snapshot.rate_for("ngn"), Some(&BigDecimal::from(1550)));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
