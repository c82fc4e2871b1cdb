use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{env_flag, env_or, ConfigError};
use crate::database::repository::LedgerStore;
use crate::error::AppResult;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::reconciliation::ReconciliationOutcome;

/// Status queries in flight at once during a sweep
const STATUS_CHECK_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationSweepConfig {
    pub enabled: bool,
    /// How often the worker wakes up
    pub interval: Duration,
    /// Operations younger than this are left to the webhook
    pub stale_after: Duration,
    /// Maximum operations checked per cycle
    pub batch_size: i64,
}

impl Default for ReconciliationSweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            batch_size: 100,
        }
    }
}

impl ReconciliationSweepConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            enabled: env_flag("RECONCILIATION_ENABLED", defaults.enabled)?,
            interval: Duration::from_secs(env_or(
                "RECONCILIATION_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            stale_after: Duration::from_secs(env_or(
                "RECONCILIATION_STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )?),
            batch_size: env_or("RECONCILIATION_BATCH_SIZE", defaults.batch_size)?,
        };
        if config.interval.is_zero() || config.batch_size <= 0 {
            return Err(ConfigError::ValidationFailed(
                "RECONCILIATION_INTERVAL_SECS and RECONCILIATION_BATCH_SIZE must be positive"
                    .to_string(),
            ));
        }
        Ok(config)
    }
}

/// What one sweep cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub settled: usize,
    pub advanced: usize,
    pub unchanged: usize,
    /// Status queries that failed; those operations stay as they were
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Revisits operations the gateways never called back about. Only definitive
/// answers change anything; a failed or unknown status query never refunds.
pub struct ReconciliationSweepWorker {
    store: Arc<dyn LedgerStore>,
    orchestrator: Arc<PaymentOrchestrator>,
    config: ReconciliationSweepConfig,
}

impl ReconciliationSweepWorker {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        orchestrator: Arc<PaymentOrchestrator>,
        config: ReconciliationSweepConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            "reconciliation sweep worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation sweep worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sweep_once().await {
                        Ok(report) if report.checked > 0 => {
                            info!(
                                checked = report.checked,
                                settled = report.settled,
                                advanced = report.advanced,
                                unchanged = report.unchanged,
                                errors = report.errors,
                                "reconciliation sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation sweep cycle failed"),
                    }
                }
            }
        }

        info!("reconciliation sweep worker stopped");
    }

    pub async fn sweep_once(&self) -> AppResult<SweepReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let cutoff = Utc::now() - stale_after;
        let stale = self
            .store
            .list_stale_operations(cutoff, self.config.batch_size)
            .await?;

        let checks: Vec<_> = stale
            .iter()
            .map(|operation| async move { (operation, self.orchestrator.refresh(operation).await) })
            .collect();
        let answers: Vec<_> = stream::iter(checks)
            .buffer_unordered(STATUS_CHECK_CONCURRENCY)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (operation, answer) in answers {
            report.checked += 1;
            match answer {
                Ok(ReconciliationOutcome::Applied { operation }) => {
                    info!(
                        reference = %operation.reference,
                        status = %operation.status,
                        "sweep settled stale operation"
                    );
                    report.settled += 1;
                }
                Ok(ReconciliationOutcome::Advanced { .. }) => report.advanced += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    warn!(
                        reference = %operation.reference,
                        error = %e,
                        "status check failed, leaving operation as is"
                    );
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}
