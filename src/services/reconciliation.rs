//! Applies asynchronous gateway answers to pending external operations.
//!
//! Webhooks, status checks and the sweep all funnel through `apply`. The
//! terminal transition and its balance effect happen inside
//! `settle_operation`, so duplicate or racing deliveries settle once.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::models::{ExternalOperation, OperationStatus, Settlement, SettleOutcome};
use crate::database::repository::LedgerStore;
use crate::error::AppResult;
use crate::payments::types::{Money, PaymentState};

/// One status report from a gateway, however it arrived
#[derive(Debug, Clone)]
pub struct GatewayUpdate {
    pub reference: Option<String>,
    /// Card/bank payouts may only be identifiable by transfer code
    pub transfer_code: Option<String>,
    pub status: PaymentState,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    /// Amount and currency the gateway says moved, when it says
    pub amount: Option<Money>,
    pub metadata: Option<JsonValue>,
}

impl GatewayUpdate {
    pub fn new(reference: impl Into<String>, status: PaymentState) -> Self {
        Self {
            reference: Some(reference.into()),
            transfer_code: None,
            status,
            gateway_reference: None,
            failure_reason: None,
            amount: None,
            metadata: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Terminal transition happened now, with its balance effect
    Applied { operation: ExternalOperation },
    /// Operation was already terminal; nothing changed
    AlreadyProcessed { operation: ExternalOperation },
    /// Moved between non-terminal states
    Advanced { operation: ExternalOperation },
    /// Nothing to do: unknown reference, non-definitive status, or a stale report
    Ignored { reason: String },
}

impl ReconciliationOutcome {
    pub fn operation(&self) -> Option<&ExternalOperation> {
        match self {
            ReconciliationOutcome::Applied { operation }
            | ReconciliationOutcome::AlreadyProcessed { operation }
            | ReconciliationOutcome::Advanced { operation } => Some(operation),
            ReconciliationOutcome::Ignored { .. } => None,
        }
    }
}

pub struct ReconciliationService {
    store: Arc<dyn LedgerStore>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, update: GatewayUpdate) -> AppResult<ReconciliationOutcome> {
        let operation = match self.resolve(&update).await? {
            Some(op) => op,
            None => {
                warn!(
                    reference = ?update.reference,
                    transfer_code = ?update.transfer_code,
                    "gateway update for unknown operation"
                );
                return Ok(ReconciliationOutcome::Ignored {
                    reason: "unknown reference".to_string(),
                });
            }
        };

        if operation.status.is_terminal() {
            return Ok(ReconciliationOutcome::AlreadyProcessed { operation });
        }

        match update.status {
            PaymentState::Success => {
                if let Some(reported) = &update.amount {
                    if !reported.currency.eq_ignore_ascii_case(&operation.currency) {
                        warn!(
                            reference = %operation.reference,
                            expected = %operation.currency,
                            reported = %reported.currency,
                            "gateway reported another currency, leaving operation open"
                        );
                        return Ok(ReconciliationOutcome::Ignored {
                            reason: "currency mismatch".to_string(),
                        });
                    }
                    if reported.amount < operation.amount {
                        warn!(
                            reference = %operation.reference,
                            expected = %operation.amount,
                            reported = %reported.amount,
                            "gateway reported a short amount, leaving operation open"
                        );
                        return Ok(ReconciliationOutcome::Ignored {
                            reason: "amount mismatch".to_string(),
                        });
                    }
                }
                self.settle(operation, OperationStatus::Successful, update)
                    .await
            }
            PaymentState::Failed | PaymentState::Cancelled | PaymentState::Reversed => {
                self.settle(operation, OperationStatus::Failed, update).await
            }
            PaymentState::OtpRequired => {
                self.advance(
                    operation,
                    &[OperationStatus::Pending],
                    OperationStatus::PendingOtp,
                    update.transfer_code.as_deref(),
                )
                .await
            }
            PaymentState::Processing => {
                self.advance(
                    operation,
                    &[OperationStatus::Pending, OperationStatus::PendingOtp],
                    OperationStatus::Processing,
                    update.transfer_code.as_deref(),
                )
                .await
            }
            PaymentState::Pending | PaymentState::Unknown => Ok(ReconciliationOutcome::Ignored {
                reason: format!("non-definitive status {:?}", update.status),
            }),
        }
    }

    async fn resolve(&self, update: &GatewayUpdate) -> AppResult<Option<ExternalOperation>> {
        if let Some(reference) = &update.reference {
            if let Some(op) = self.store.find_operation(reference).await? {
                return Ok(Some(op));
            }
        }
        if let Some(code) = &update.transfer_code {
            return Ok(self.store.find_operation_by_transfer_code(code).await?);
        }
        Ok(None)
    }

    async fn settle(
        &self,
        operation: ExternalOperation,
        status: OperationStatus,
        update: GatewayUpdate,
    ) -> AppResult<ReconciliationOutcome> {
        let settlement = Settlement {
            reference: operation.reference.clone(),
            status,
            gateway_reference: update.gateway_reference,
            failure_reason: update.failure_reason,
            metadata: update.metadata,
        };
        match self.store.settle_operation(settlement).await? {
            SettleOutcome::Applied(operation) => {
                info!(
                    reference = %operation.reference,
                    user_id = %operation.user_id,
                    kind = operation.kind.as_str(),
                    amount = %operation.amount,
                    status = %operation.status,
                    refunded = operation.refunded,
                    "external operation settled"
                );
                Ok(ReconciliationOutcome::Applied { operation })
            }
            SettleOutcome::AlreadyProcessed(operation) => {
                Ok(ReconciliationOutcome::AlreadyProcessed { operation })
            }
            SettleOutcome::NotFound => Ok(ReconciliationOutcome::Ignored {
                reason: "unknown reference".to_string(),
            }),
        }
    }

    async fn advance(
        &self,
        operation: ExternalOperation,
        from: &[OperationStatus],
        to: OperationStatus,
        transfer_code: Option<&str>,
    ) -> AppResult<ReconciliationOutcome> {
        if operation.status == to {
            return Ok(ReconciliationOutcome::Ignored {
                reason: format!("already {}", to),
            });
        }
        match self
            .store
            .advance_operation(&operation.reference, from, to, transfer_code)
            .await?
        {
            Some(operation) => {
                info!(reference = %operation.reference, status = %to, "external operation advanced");
                Ok(ReconciliationOutcome::Advanced { operation })
            }
            None => Ok(ReconciliationOutcome::Ignored {
                reason: format!("cannot move {} to {}", operation.status, to),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{NewOperation, OperationKind, PaymentChannel, Wallet};
    use crate::database::repository::{ExternalOperationRepository, WalletRepository};

    async fn store_with_collection() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.seed_wallet(Wallet::new("alice", "WAAAAAAAAAA", "NGN")).await;
        store
            .create_collection(NewOperation {
                reference: "DEP-1".to_string(),
                user_id: "alice".to_string(),
                kind: OperationKind::Collection,
                channel: PaymentChannel::MobileMoney,
                amount: BigDecimal::from(250),
                currency: "NGN".to_string(),
                counterpart: Some("233240000000".to_string()),
                recipient_code: None,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn repeated_success_credits_once() {
        let store = store_with_collection().await;
        let service = ReconciliationService::new(store.clone());

        let first = service
            .apply(GatewayUpdate::new("DEP-1", PaymentState::Success))
            .await
            .unwrap();
        assert!(matches!(first, ReconciliationOutcome::Applied { .. }));

        for _ in 0..3 {
            let again = service
                .apply(GatewayUpdate::new("DEP-1", PaymentState::Success))
                .await
                .unwrap();
            assert!(matches!(again, ReconciliationOutcome::AlreadyProcessed { .. }));
        }

        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(250));
        assert_eq!(store.list_transactions("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_reports_and_unknown_references_are_ignored() {
        let store = store_with_collection().await;
        let service = ReconciliationService::new(store.clone());

        let pending = service
            .apply(GatewayUpdate::new("DEP-1", PaymentState::Pending))
            .await
            .unwrap();
        assert!(matches!(pending, ReconciliationOutcome::Ignored { .. }));

        let unknown = service
            .apply(GatewayUpdate::new("DEP-404", PaymentState::Success))
            .await
            .unwrap();
        assert!(matches!(unknown, ReconciliationOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn short_amount_does_not_credit() {
        let store = store_with_collection().await;
        let service = ReconciliationService::new(store.clone());

        let mut update = GatewayUpdate::new("DEP-1", PaymentState::Success);
        update.amount = Some(Money::new(BigDecimal::from(25), "NGN"));
        let outcome = service.apply(update).await.unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Ignored { .. }));

        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn success_in_another_currency_does_not_credit() {
        let store = store_with_collection().await;
        let service = ReconciliationService::new(store.clone());

        let mut update = GatewayUpdate::new("DEP-1", PaymentState::Success);
        update.amount = Some(Money::new(BigDecimal::from(10_000), "GHS"));
        let outcome = service.apply(update).await.unwrap();
        match outcome {
            ReconciliationOutcome::Ignored { reason } => assert_eq!(reason, "currency mismatch"),
            other => panic!("expected ignored, got {:?}", other),
        }

        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(0));

        // matching currency, any case, still settles
        let mut update = GatewayUpdate::new("DEP-1", PaymentState::Success);
        update.amount = Some(Money::new(BigDecimal::from(250), "ngn"));
        let outcome = service.apply(update).await.unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Applied { .. }));
        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(250));
    }

    #[tokio::test]
    async fn failed_collection_has_no_balance_effect() {
        let store = store_with_collection().await;
        let service = ReconciliationService::new(store.clone());

        let outcome = service
            .apply(GatewayUpdate::new("DEP-1", PaymentState::Failed).with_failure_reason("declined"))
            .await
            .unwrap();
        let op = outcome.operation().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(!op.refunded);

        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(0));
    }
}
