//! Store-agnostic repository traits.
//!
//! Every method that touches money state is one atomic unit in the backing
//! store. Services never compose a read and a later write of balances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::error::DatabaseError;
use crate::database::models::{
    DebitOutcome, ExternalOperation, FeeLedgerSummary, KycStatus, NewOperation, OperationStatus,
    RateSnapshot, Settlement, SettleOutcome, TransactionRecord, TransferOutcome, TransferPlan,
    TransferReceipt, User, Wallet,
};

pub type RepoResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, user_id: &str) -> RepoResult<Option<User>>;

    /// Insert the user, or return the existing row unchanged
    async fn create_user(&self, user: User) -> RepoResult<User>;

    /// Set `kyc_status = verified` if it is still unset and both legacy flags
    /// are true. Returns whether a row changed.
    async fn migrate_legacy_kyc(&self, user_id: &str) -> RepoResult<bool>;

    async fn set_kyc_status(
        &self,
        user_id: &str,
        status: KycStatus,
        job_id: Option<&str>,
    ) -> RepoResult<Option<User>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_wallet_by_user(&self, user_id: &str) -> RepoResult<Option<Wallet>>;

    async fn find_wallet_by_public_id(&self, wallet_id: &str) -> RepoResult<Option<Wallet>>;

    /// Create the user's wallet. Returns the existing one if the user already
    /// has a wallet; a clash on `wallet_id` is a `UniqueViolation`.
    async fn create_wallet(&self, wallet: Wallet) -> RepoResult<Wallet>;

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> RepoResult<Vec<TransactionRecord>>;

    async fn find_transfer_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> RepoResult<Option<TransferReceipt>>;

    /// Apply a wallet-to-wallet transfer: both balances, both records and the
    /// fee ledger, all or nothing.
    async fn execute_transfer(&self, plan: TransferPlan) -> RepoResult<TransferOutcome>;

    async fn fee_ledger_summary(&self) -> RepoResult<FeeLedgerSummary>;
}

#[async_trait]
pub trait ExternalOperationRepository: Send + Sync {
    /// Debit the wallet, insert the PENDING operation and the pending
    /// withdrawal record in one unit.
    async fn debit_for_withdrawal(&self, op: NewOperation) -> RepoResult<DebitOutcome>;

    /// Insert a PENDING collection. No balance effect.
    async fn create_collection(&self, op: NewOperation) -> RepoResult<ExternalOperation>;

    async fn find_operation(&self, reference: &str) -> RepoResult<Option<ExternalOperation>>;

    async fn find_operation_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> RepoResult<Option<ExternalOperation>>;

    /// Compare-and-set between non-terminal statuses. Returns `None` when the
    /// stored status is not in `from`.
    async fn advance_operation(
        &self,
        reference: &str,
        from: &[OperationStatus],
        to: OperationStatus,
        transfer_code: Option<&str>,
    ) -> RepoResult<Option<ExternalOperation>>;

    /// Move an operation into a terminal status exactly once, with the
    /// balance effect that status implies.
    async fn settle_operation(&self, settlement: Settlement) -> RepoResult<SettleOutcome>;

    async fn list_stale_operations(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<ExternalOperation>>;
}

#[async_trait]
pub trait ExchangeRateRepository: Send + Sync {
    async fn current_rates(&self) -> RepoResult<Option<RateSnapshot>>;

    async fn replace_rates(&self, snapshot: &RateSnapshot) -> RepoResult<()>;
}

/// Full store used by the services
pub trait LedgerStore:
    UserRepository + WalletRepository + ExternalOperationRepository + ExchangeRateRepository
{
}

impl<T> LedgerStore for T where
    T: UserRepository + WalletRepository + ExternalOperationRepository + ExchangeRateRepository
{
}
