//! In-process ledger store.
//!
//! All state sits behind one async mutex, so every trait method is a
//! linearizable unit. Used by the test suite and by `SKIP_EXTERNALS=true`.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    DebitOutcome, ExternalOperation, FeeEvent, FeeLedgerSummary, KycStatus, NewOperation,
    OperationStatus, RateSnapshot, Settlement, SettleOutcome, TransactionRecord,
    TransactionStatus, TransferOutcome, TransferPlan, TransferReceipt, User, Wallet,
};
use crate::database::repository::{
    ExchangeRateRepository, ExternalOperationRepository, RepoResult, UserRepository,
    WalletRepository,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    /// Keyed by owning user id
    wallets: HashMap<String, Wallet>,
    /// Public wallet id to owning user id
    wallet_index: HashMap<String, String>,
    /// Per-user records in insertion order
    transactions: HashMap<String, Vec<TransactionRecord>>,
    operations: HashMap<String, ExternalOperation>,
    fee_events: HashMap<String, FeeEvent>,
    fee_total_usd: BigDecimal,
    fee_buckets: HashMap<String, BigDecimal>,
    rates: Option<RateSnapshot>,
}

impl MemoryState {
    fn has_record(&self, user_id: &str, transaction_id: &str) -> bool {
        self.transactions
            .get(user_id)
            .map(|records| records.iter().any(|r| r.transaction_id == transaction_id))
            .unwrap_or(false)
    }

    fn push_record(&mut self, record: TransactionRecord) -> RepoResult<()> {
        if self.has_record(&record.user_id, &record.transaction_id) {
            return Err(unique_violation("wallet_transactions_user_id_transaction_id_key"));
        }
        self.transactions
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn record_mut(&mut self, user_id: &str, transaction_id: &str) -> Option<&mut TransactionRecord> {
        self.transactions
            .get_mut(user_id)
            .and_then(|records| records.iter_mut().find(|r| r.transaction_id == transaction_id))
    }

    fn receipt_for_key(&self, user_id: &str, key: &str) -> Option<TransferReceipt> {
        self.transactions.get(user_id).and_then(|records| {
            records
                .iter()
                .find(|r| r.idempotency_key.as_deref() == Some(key))
                .map(|r| TransferReceipt {
                    transaction_id: r.transaction_id.clone(),
                    fee: r.fee.clone(),
                    new_balance: r.balance_after.clone().unwrap_or_default(),
                })
        })
    }

    fn wallet_by_public_id(&self, wallet_id: &str) -> Option<&Wallet> {
        self.wallet_index
            .get(wallet_id)
            .and_then(|user_id| self.wallets.get(user_id))
    }
}

fn unique_violation(constraint: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::UniqueViolation {
        constraint: constraint.to_string(),
    })
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user row as-is
    pub async fn seed_user(&self, user: User) {
        let mut state = self.state.lock().await;
        state.users.insert(user.id.clone(), user);
    }

    /// Insert or replace a wallet row as-is, balance included
    pub async fn seed_wallet(&self, wallet: Wallet) {
        let mut state = self.state.lock().await;
        state
            .wallet_index
            .insert(wallet.wallet_id.clone(), wallet.user_id.clone());
        state.wallets.insert(wallet.user_id.clone(), wallet);
    }

    /// External operations stored so far, in any status
    pub async fn operation_count(&self) -> usize {
        self.state.lock().await.operations.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_user(&self, user_id: &str) -> RepoResult<Option<User>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn create_user(&self, user: User) -> RepoResult<User> {
        let mut state = self.state.lock().await;
        let stored = state.users.entry(user.id.clone()).or_insert(user);
        Ok(stored.clone())
    }

    async fn migrate_legacy_kyc(&self, user_id: &str) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(user_id) {
            Some(user) if user.is_legacy_verified() => {
                user.kyc_status = KycStatus::Verified;
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_kyc_status(
        &self,
        user_id: &str,
        status: KycStatus,
        job_id: Option<&str>,
    ) -> RepoResult<Option<User>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(user_id).map(|user| {
            user.kyc_status = status;
            if let Some(job_id) = job_id {
                user.kyc_job_id = Some(job_id.to_string());
            }
            user.updated_at = Utc::now();
            user.clone()
        }))
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn find_wallet_by_user(&self, user_id: &str) -> RepoResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(user_id).cloned())
    }

    async fn find_wallet_by_public_id(&self, wallet_id: &str) -> RepoResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallet_by_public_id(wallet_id).cloned())
    }

    async fn create_wallet(&self, wallet: Wallet) -> RepoResult<Wallet> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.wallets.get(&wallet.user_id) {
            return Ok(existing.clone());
        }
        if state.wallet_index.contains_key(&wallet.wallet_id) {
            return Err(unique_violation("wallets_wallet_id_key"));
        }
        state
            .wallet_index
            .insert(wallet.wallet_id.clone(), wallet.user_id.clone());
        state.wallets.insert(wallet.user_id.clone(), wallet.clone());
        Ok(wallet)
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> RepoResult<Vec<TransactionRecord>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .transactions
            .get(user_id)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_transfer_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> RepoResult<Option<TransferReceipt>> {
        Ok(self.state.lock().await.receipt_for_key(user_id, key))
    }

    async fn execute_transfer(&self, plan: TransferPlan) -> RepoResult<TransferOutcome> {
        let mut state = self.state.lock().await;

        if let Some(key) = &plan.idempotency_key {
            if let Some(receipt) = state.receipt_for_key(&plan.sender_user_id, key) {
                return Ok(TransferOutcome::Duplicate(receipt));
            }
        }

        let sender = state.wallets.get(&plan.sender_user_id).cloned();
        let recipient = state.wallet_by_public_id(&plan.recipient_wallet_id).cloned();
        let effects = match plan.evaluate(sender.as_ref(), recipient.as_ref()) {
            Ok(effects) => effects,
            Err(outcome) => return Ok(outcome),
        };
        let (sender, recipient) = match (sender, recipient) {
            (Some(s), Some(r)) => (s, r),
            _ => return Err(DatabaseError::unknown("transfer evaluated without both wallets")),
        };

        // Every uniqueness check runs before the first write
        if state.fee_events.contains_key(&plan.transaction_id) {
            return Err(unique_violation("platform_fee_events_pkey"));
        }
        if state.has_record(&sender.user_id, &plan.transaction_id)
            || state.has_record(&recipient.user_id, &plan.transaction_id)
        {
            return Err(unique_violation("wallet_transactions_user_id_transaction_id_key"));
        }

        let now = Utc::now();
        let (send_record, receive_record) = plan.records(&sender, &recipient, &effects, now);

        if let Some(wallet) = state.wallets.get_mut(&sender.user_id) {
            wallet.balance = effects.sender_balance.clone();
            wallet.daily_spent = effects.daily_spent.clone();
            wallet.monthly_spent = effects.monthly_spent.clone();
            wallet.spend_date = plan.today;
            wallet.updated_at = now;
        }
        if let Some(wallet) = state.wallets.get_mut(&recipient.user_id) {
            wallet.balance = effects.recipient_balance.clone();
            wallet.updated_at = now;
        }

        state.fee_total_usd = &state.fee_total_usd + &plan.fee_usd;
        let bucket = state.fee_buckets.entry(plan.currency.clone()).or_default();
        *bucket = &*bucket + &plan.fee;
        state
            .fee_events
            .insert(plan.transaction_id.clone(), plan.fee_event(now));

        state.push_record(send_record)?;
        state.push_record(receive_record)?;

        Ok(TransferOutcome::Committed(plan.receipt(&effects)))
    }

    async fn fee_ledger_summary(&self) -> RepoResult<FeeLedgerSummary> {
        let state = self.state.lock().await;
        Ok(FeeLedgerSummary {
            total_usd: state.fee_total_usd.clone(),
            event_count: state.fee_events.len() as u64,
            buckets: state.fee_buckets.clone(),
        })
    }
}

#[async_trait]
impl ExternalOperationRepository for InMemoryStore {
    async fn debit_for_withdrawal(&self, op: NewOperation) -> RepoResult<DebitOutcome> {
        let mut state = self.state.lock().await;
        if state.operations.contains_key(&op.reference) {
            return Err(unique_violation("external_operations_pkey"));
        }

        let wallet = match state.wallets.get(&op.user_id) {
            Some(wallet) => wallet.clone(),
            None => return Ok(DebitOutcome::WalletMissing),
        };
        if !wallet.is_active() {
            return Ok(DebitOutcome::WalletInactive {
                status: wallet.status,
            });
        }
        if wallet.balance < op.amount {
            return Ok(DebitOutcome::InsufficientBalance {
                available: wallet.balance,
            });
        }
        if state.has_record(&op.user_id, &op.reference) {
            return Err(unique_violation("wallet_transactions_user_id_transaction_id_key"));
        }

        let now = Utc::now();
        let new_balance = &wallet.balance - &op.amount;
        let operation = op.into_operation(now);
        let record =
            operation.ledger_record(TransactionStatus::Pending, Some(new_balance.clone()), now);

        if let Some(wallet) = state.wallets.get_mut(&operation.user_id) {
            wallet.balance = new_balance;
            wallet.updated_at = now;
        }
        state.push_record(record)?;
        state
            .operations
            .insert(operation.reference.clone(), operation.clone());

        Ok(DebitOutcome::Debited(operation))
    }

    async fn create_collection(&self, op: NewOperation) -> RepoResult<ExternalOperation> {
        let mut state = self.state.lock().await;
        if state.operations.contains_key(&op.reference) {
            return Err(unique_violation("external_operations_pkey"));
        }
        let operation = op.into_operation(Utc::now());
        state
            .operations
            .insert(operation.reference.clone(), operation.clone());
        Ok(operation)
    }

    async fn find_operation(&self, reference: &str) -> RepoResult<Option<ExternalOperation>> {
        Ok(self.state.lock().await.operations.get(reference).cloned())
    }

    async fn find_operation_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> RepoResult<Option<ExternalOperation>> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .values()
            .find(|op| op.transfer_code.as_deref() == Some(transfer_code))
            .cloned())
    }

    async fn advance_operation(
        &self,
        reference: &str,
        from: &[OperationStatus],
        to: OperationStatus,
        transfer_code: Option<&str>,
    ) -> RepoResult<Option<ExternalOperation>> {
        if to.is_terminal() {
            return Err(DatabaseError::unknown(
                "terminal statuses are only reachable through settle_operation",
            ));
        }
        let mut state = self.state.lock().await;
        Ok(match state.operations.get_mut(reference) {
            Some(op) if from.contains(&op.status) => {
                op.status = to;
                if let Some(code) = transfer_code {
                    op.transfer_code = Some(code.to_string());
                }
                op.updated_at = Utc::now();
                Some(op.clone())
            }
            _ => None,
        })
    }

    async fn settle_operation(&self, settlement: Settlement) -> RepoResult<SettleOutcome> {
        if !settlement.status.is_terminal() {
            return Err(DatabaseError::unknown("settlement requires a terminal status"));
        }
        let mut state = self.state.lock().await;
        let op = match state.operations.get(&settlement.reference) {
            Some(op) => op.clone(),
            None => return Ok(SettleOutcome::NotFound),
        };
        if op.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyProcessed(op));
        }

        let now = Utc::now();
        let mut refunded = op.refunded;
        match (op.kind.debits_wallet(), settlement.status) {
            (false, OperationStatus::Successful) => {
                if state.has_record(&op.user_id, &op.reference) {
                    return Err(unique_violation(
                        "wallet_transactions_user_id_transaction_id_key",
                    ));
                }
                let new_balance = match state.wallets.get(&op.user_id) {
                    Some(wallet) => &wallet.balance + &op.amount,
                    None => return Err(DatabaseError::not_found("wallet", op.user_id.clone())),
                };
                if let Some(wallet) = state.wallets.get_mut(&op.user_id) {
                    wallet.balance = new_balance.clone();
                    wallet.updated_at = now;
                }
                state.push_record(op.ledger_record(
                    TransactionStatus::Completed,
                    Some(new_balance),
                    now,
                ))?;
            }
            (false, _) => {}
            (true, OperationStatus::Successful) => {
                if let Some(record) = state.record_mut(&op.user_id, &op.reference) {
                    record.status = TransactionStatus::Completed;
                    record.updated_at = now;
                }
            }
            (true, _) => {
                if !op.refunded {
                    let new_balance = match state.wallets.get(&op.user_id) {
                        Some(wallet) => &wallet.balance + &op.amount,
                        None => {
                            return Err(DatabaseError::not_found("wallet", op.user_id.clone()))
                        }
                    };
                    if let Some(wallet) = state.wallets.get_mut(&op.user_id) {
                        wallet.balance = new_balance;
                        wallet.updated_at = now;
                    }
                    refunded = true;
                }
                if let Some(record) = state.record_mut(&op.user_id, &op.reference) {
                    record.status = TransactionStatus::Failed;
                    record.refunded = refunded;
                    record.updated_at = now;
                }
            }
        }

        let stored = match state.operations.get_mut(&op.reference) {
            Some(stored) => stored,
            None => return Ok(SettleOutcome::NotFound),
        };
        stored.status = settlement.status;
        stored.refunded = refunded;
        if settlement.gateway_reference.is_some() {
            stored.gateway_reference = settlement.gateway_reference;
        }
        if settlement.failure_reason.is_some() {
            stored.failure_reason = settlement.failure_reason;
        }
        if let Some(metadata) = settlement.metadata {
            merge_metadata(&mut stored.metadata, metadata);
        }
        stored.updated_at = now;

        Ok(SettleOutcome::Applied(stored.clone()))
    }

    async fn list_stale_operations(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<ExternalOperation>> {
        let state = self.state.lock().await;
        let mut stale: Vec<ExternalOperation> = state
            .operations
            .values()
            .filter(|op| !op.status.is_terminal() && op.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|op| op.updated_at);
        stale.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(stale)
    }
}

#[async_trait]
impl ExchangeRateRepository for InMemoryStore {
    async fn current_rates(&self) -> RepoResult<Option<RateSnapshot>> {
        Ok(self.state.lock().await.rates.clone())
    }

    async fn replace_rates(&self, snapshot: &RateSnapshot) -> RepoResult<()> {
        self.state.lock().await.rates = Some(snapshot.clone());
        Ok(())
    }
}

/// Shallow-merge object keys from `extra` into `target`
pub(crate) fn merge_metadata(target: &mut serde_json::Value, extra: serde_json::Value) {
    match (target.as_object_mut(), extra) {
        (Some(existing), serde_json::Value::Object(extra)) => {
            for (k, v) in extra {
                existing.insert(k, v);
            }
        }
        (_, extra) => *target = extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{OperationKind, PaymentChannel};
    use std::str::FromStr;

    fn funded(user_id: &str, wallet_id: &str, balance: i64) -> Wallet {
        let mut wallet = Wallet::new(user_id, wallet_id, "NGN");
        wallet.balance = BigDecimal::from(balance);
        wallet
    }

    fn plan(sender: &str, recipient_wallet: &str, amount: i64, fee: i64) -> TransferPlan {
        TransferPlan {
            sender_user_id: sender.to_string(),
            recipient_wallet_id: recipient_wallet.to_string(),
            currency: "NGN".to_string(),
            amount: BigDecimal::from(amount),
            fee: BigDecimal::from(fee),
            fee_usd: BigDecimal::from_str("0.01").unwrap(),
            fee_rate: BigDecimal::from(1000),
            transaction_id: uuid::Uuid::new_v4().to_string(),
            external_reference: "P2P-TEST".to_string(),
            note: None,
            idempotency_key: None,
            today: Utc::now().date_naive(),
            daily_limit: None,
            monthly_limit: None,
        }
    }

    fn payout(reference: &str, user_id: &str, amount: i64) -> NewOperation {
        NewOperation {
            reference: reference.to_string(),
            user_id: user_id.to_string(),
            kind: OperationKind::BankTransfer,
            channel: PaymentChannel::Bank,
            amount: BigDecimal::from(amount),
            currency: "NGN".to_string(),
            counterpart: Some("****6789".to_string()),
            recipient_code: Some("RCP_1".to_string()),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn transfer_moves_balances_and_writes_both_records() {
        let store = InMemoryStore::new();
        store.seed_wallet(funded("alice", "WAAAAAAAAAA", 1000)).await;
        store.seed_wallet(funded("bob", "WBBBBBBBBBB", 0)).await;

        let outcome = store
            .execute_transfer(plan("alice", "WBBBBBBBBBB", 500, 10))
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Committed(_)));

        let alice = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        let bob = store.find_wallet_by_user("bob").await.unwrap().unwrap();
        assert_eq!(alice.balance, BigDecimal::from(490));
        assert_eq!(bob.balance, BigDecimal::from(500));
        assert_eq!(store.list_transactions("alice", 10).await.unwrap().len(), 1);
        assert_eq!(store.list_transactions("bob", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_transfer_writes_nothing() {
        let store = InMemoryStore::new();
        store.seed_wallet(funded("alice", "WAAAAAAAAAA", 100)).await;
        store.seed_wallet(funded("bob", "WBBBBBBBBBB", 0)).await;

        let outcome = store
            .execute_transfer(plan("alice", "WBBBBBBBBBB", 200, 10))
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::InsufficientBalance { .. }));

        let self_send = store
            .execute_transfer(plan("alice", "WAAAAAAAAAA", 10, 10))
            .await
            .unwrap();
        assert_eq!(self_send, TransferOutcome::SelfTransfer);

        assert!(store.list_transactions("alice", 10).await.unwrap().is_empty());
        assert_eq!(store.fee_ledger_summary().await.unwrap().event_count, 0);
    }

    #[tokio::test]
    async fn failed_payout_refunds_once() {
        let store = InMemoryStore::new();
        store.seed_wallet(funded("alice", "WAAAAAAAAAA", 1000)).await;

        let outcome = store.debit_for_withdrawal(payout("WD-1", "alice", 300)).await.unwrap();
        assert!(matches!(outcome, DebitOutcome::Debited(_)));

        for _ in 0..3 {
            store
                .settle_operation(Settlement {
                    reference: "WD-1".to_string(),
                    status: OperationStatus::Failed,
                    gateway_reference: None,
                    failure_reason: Some("declined".to_string()),
                    metadata: None,
                })
                .await
                .unwrap();
        }

        let wallet = store.find_wallet_by_user("alice").await.unwrap().unwrap();
        assert_eq!(wallet.balance, BigDecimal::from(1000));
        let op = store.find_operation("WD-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.refunded);
    }

    #[tokio::test]
    async fn advance_is_compare_and_set() {
        let store = InMemoryStore::new();
        store.seed_wallet(funded("alice", "WAAAAAAAAAA", 1000)).await;
        store.debit_for_withdrawal(payout("WD-2", "alice", 100)).await.unwrap();

        let first = store
            .advance_operation(
                "WD-2",
                &[OperationStatus::Pending],
                OperationStatus::PendingOtp,
                Some("TRF_1"),
            )
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .advance_operation(
                "WD-2",
                &[OperationStatus::Pending],
                OperationStatus::Processing,
                None,
            )
            .await
            .unwrap();
        assert!(second.is_none());

        let found = store.find_operation_by_transfer_code("TRF_1").await.unwrap();
        assert_eq!(found.map(|op| op.status), Some(OperationStatus::PendingOtp));
    }

    #[test]
    fn metadata_merge_keeps_existing_keys() {
        let mut target = serde_json::json!({"a": 1});
        merge_metadata(&mut target, serde_json::json!({"b": 2}));
        assert_eq!(target, serde_json::json!({"a": 1, "b": 2}));
    }
}
