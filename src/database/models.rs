//! Domain records persisted by the ledger stores.
//!
//! Statuses are stored as text columns; `as_str`/`from_db_status` are the only
//! mapping between the enums and their persisted form.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Users and KYC
// ============================================================================

/// Canonical identity-verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    Unset,
    Pending,
    Verified,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Unset => "unset",
            KycStatus::Pending => "pending",
            KycStatus::Verified => "verified",
            KycStatus::Rejected => "rejected",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "unset" => Some(KycStatus::Unset),
            "pending" => Some(KycStatus::Pending),
            "verified" => Some(KycStatus::Verified),
            "rejected" => Some(KycStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub kyc_status: KycStatus,
    pub kyc_job_id: Option<String>,
    /// Legacy flag written before `kyc_status` existed
    pub identity_verified: bool,
    /// Legacy flag written before `kyc_status` existed
    pub documents_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name,
            photo_url: None,
            email: None,
            phone_number: None,
            kyc_status: KycStatus::Unset,
            kyc_job_id: None,
            identity_verified: false,
            documents_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_kyc_status(mut self, status: KycStatus) -> Self {
        self.kyc_status = status;
        self
    }

    pub fn with_legacy_flags(mut self, identity_verified: bool, documents_verified: bool) -> Self {
        self.identity_verified = identity_verified;
        self.documents_verified = documents_verified;
        self
    }

    /// Unset canonical status but both legacy flags set
    pub fn is_legacy_verified(&self) -> bool {
        self.kyc_status == KycStatus::Unset && self.identity_verified && self.documents_verified
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Suspended,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "ACTIVE",
            WalletStatus::Suspended => "SUSPENDED",
            WalletStatus::Closed => "CLOSED",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(WalletStatus::Active),
            "SUSPENDED" => Some(WalletStatus::Suspended),
            "CLOSED" => Some(WalletStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    /// Public, immutable identifier shared through QR codes
    pub wallet_id: String,
    pub currency: String,
    pub balance: BigDecimal,
    pub daily_spent: BigDecimal,
    pub monthly_spent: BigDecimal,
    /// Day the spend counters were last written
    pub spend_date: NaiveDate,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: impl Into<String>, wallet_id: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            wallet_id: wallet_id.into(),
            currency: currency.to_uppercase(),
            balance: BigDecimal::from(0),
            daily_spent: BigDecimal::from(0),
            monthly_spent: BigDecimal::from(0),
            spend_date: now.date_naive(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Spend counters as seen on `today`, after calendar rollover
    pub fn rolled_spend(&self, today: NaiveDate) -> (BigDecimal, BigDecimal) {
        let zero = BigDecimal::from(0);
        if self.spend_date == today {
            (self.daily_spent.clone(), self.monthly_spent.clone())
        } else if self.spend_date.year() == today.year() && self.spend_date.month() == today.month()
        {
            (zero, self.monthly_spent.clone())
        } else {
            (zero.clone(), zero)
        }
    }
}

// ============================================================================
// Transaction records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Send,
    Receive,
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Send => "send",
            TransactionKind::Receive => "receive",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "send" => Some(TransactionKind::Send),
            "receive" => Some(TransactionKind::Receive),
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One side of a money movement, stored under its owning user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: String,
    pub transaction_id: String,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub counterpart: Option<String>,
    pub note: Option<String>,
    pub external_reference: Option<String>,
    pub balance_after: Option<BigDecimal>,
    pub refunded: bool,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// External operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Money coming in from a card, bank or mobile-money payer
    Collection,
    /// Mobile-money payout
    Disbursement,
    /// Bank payout through the card/bank processor
    BankTransfer,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Collection => "collection",
            OperationKind::Disbursement => "disbursement",
            OperationKind::BankTransfer => "bank_transfer",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "collection" => Some(OperationKind::Collection),
            "disbursement" => Some(OperationKind::Disbursement),
            "bank_transfer" => Some(OperationKind::BankTransfer),
            _ => None,
        }
    }

    /// Payouts debit the wallet at initiation
    pub fn debits_wallet(&self) -> bool {
        matches!(self, OperationKind::Disbursement | OperationKind::BankTransfer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    Card,
    Bank,
    MobileMoney,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::Card => "card",
            PaymentChannel::Bank => "bank",
            PaymentChannel::MobileMoney => "mobile_money",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "card" => Some(PaymentChannel::Card),
            "bank" => Some(PaymentChannel::Bank),
            "mobile_money" => Some(PaymentChannel::MobileMoney),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    PendingOtp,
    Processing,
    Successful,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::PendingOtp => "PENDING_OTP",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Successful => "SUCCESSFUL",
            OperationStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OperationStatus::Pending),
            "PENDING_OTP" => Some(OperationStatus::PendingOtp),
            "PROCESSING" => Some(OperationStatus::Processing),
            "SUCCESSFUL" => Some(OperationStatus::Successful),
            "FAILED" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Successful | OperationStatus::Failed)
    }

    /// Statuses the reconciliation sweep revisits
    pub fn in_flight() -> &'static [OperationStatus] {
        &[
            OperationStatus::Pending,
            OperationStatus::PendingOtp,
            OperationStatus::Processing,
        ]
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-flight gateway action keyed by its external reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalOperation {
    pub reference: String,
    pub user_id: String,
    pub kind: OperationKind,
    pub channel: PaymentChannel,
    pub amount: BigDecimal,
    pub currency: String,
    pub counterpart: Option<String>,
    pub status: OperationStatus,
    pub refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_code: Option<String>,
    #[serde(skip_serializing)]
    pub recipient_code: Option<String>,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(skip_serializing)]
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an external operation
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub reference: String,
    pub user_id: String,
    pub kind: OperationKind,
    pub channel: PaymentChannel,
    pub amount: BigDecimal,
    pub currency: String,
    pub counterpart: Option<String>,
    pub recipient_code: Option<String>,
    pub metadata: JsonValue,
}

impl NewOperation {
    pub fn into_operation(self, now: DateTime<Utc>) -> ExternalOperation {
        ExternalOperation {
            reference: self.reference,
            user_id: self.user_id,
            kind: self.kind,
            channel: self.channel,
            amount: self.amount,
            currency: self.currency,
            counterpart: self.counterpart,
            status: OperationStatus::Pending,
            refunded: false,
            transfer_code: None,
            recipient_code: self.recipient_code,
            gateway_reference: None,
            failure_reason: None,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A definitive gateway answer for one operation
#[derive(Debug, Clone)]
pub struct Settlement {
    pub reference: String,
    pub status: OperationStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Applied(ExternalOperation),
    /// Already terminal; nothing changed
    AlreadyProcessed(ExternalOperation),
    NotFound,
}

#[derive(Debug, Clone)]
pub enum DebitOutcome {
    Debited(ExternalOperation),
    InsufficientBalance { available: BigDecimal },
    WalletMissing,
    WalletInactive { status: WalletStatus },
}

// ============================================================================
// Wallet-to-wallet transfers
// ============================================================================

/// Everything the store needs to apply one transfer atomically
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub sender_user_id: String,
    pub recipient_wallet_id: String,
    pub currency: String,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    /// Fee valued in the reporting currency
    pub fee_usd: BigDecimal,
    pub fee_rate: BigDecimal,
    pub transaction_id: String,
    pub external_reference: String,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub today: NaiveDate,
    pub daily_limit: Option<BigDecimal>,
    pub monthly_limit: Option<BigDecimal>,
}

/// New row values once a transfer has been accepted
#[derive(Debug, Clone)]
pub struct TransferEffects {
    pub sender_balance: BigDecimal,
    pub recipient_balance: BigDecimal,
    pub daily_spent: BigDecimal,
    pub monthly_spent: BigDecimal,
}

impl TransferPlan {
    pub fn required(&self) -> BigDecimal {
        &self.amount + &self.fee
    }

    /// Check the plan against the locked wallet rows. Both stores call this
    /// while holding their lock, so the answer is final for the unit.
    pub fn evaluate(
        &self,
        sender: Option<&Wallet>,
        recipient: Option<&Wallet>,
    ) -> Result<TransferEffects, TransferOutcome> {
        let sender = sender.ok_or(TransferOutcome::SenderWalletMissing)?;
        if !sender.is_active() {
            return Err(TransferOutcome::WalletInactive {
                wallet_id: sender.wallet_id.clone(),
                status: sender.status,
            });
        }

        let required = self.required();
        if sender.balance < required {
            return Err(TransferOutcome::InsufficientBalance {
                available: sender.balance.clone(),
                required,
            });
        }

        let recipient = recipient.ok_or(TransferOutcome::RecipientWalletMissing)?;
        if recipient.user_id == sender.user_id {
            return Err(TransferOutcome::SelfTransfer);
        }
        if !recipient.is_active() {
            return Err(TransferOutcome::WalletInactive {
                wallet_id: recipient.wallet_id.clone(),
                status: recipient.status,
            });
        }
        if sender.currency != self.currency || recipient.currency != sender.currency {
            return Err(TransferOutcome::CurrencyMismatch {
                sender: sender.currency.clone(),
                recipient: recipient.currency.clone(),
            });
        }

        let (daily, monthly) = sender.rolled_spend(self.today);
        let daily_spent = daily + &required;
        let monthly_spent = monthly + &required;
        if let Some(limit) = &self.daily_limit {
            if &daily_spent > limit {
                return Err(TransferOutcome::LimitExceeded {
                    period: "daily",
                    limit: limit.clone(),
                });
            }
        }
        if let Some(limit) = &self.monthly_limit {
            if &monthly_spent > limit {
                return Err(TransferOutcome::LimitExceeded {
                    period: "monthly",
                    limit: limit.clone(),
                });
            }
        }

        Ok(TransferEffects {
            sender_balance: &sender.balance - &required,
            recipient_balance: &recipient.balance + &self.amount,
            daily_spent,
            monthly_spent,
        })
    }

    /// The send and receive records, sharing one transaction id
    pub fn records(
        &self,
        sender: &Wallet,
        recipient: &Wallet,
        effects: &TransferEffects,
        now: DateTime<Utc>,
    ) -> (TransactionRecord, TransactionRecord) {
        let send = TransactionRecord {
            user_id: sender.user_id.clone(),
            transaction_id: self.transaction_id.clone(),
            kind: TransactionKind::Send,
            amount: self.amount.clone(),
            fee: self.fee.clone(),
            currency: self.currency.clone(),
            status: TransactionStatus::Completed,
            counterpart: Some(recipient.wallet_id.clone()),
            note: self.note.clone(),
            external_reference: Some(self.external_reference.clone()),
            balance_after: Some(effects.sender_balance.clone()),
            refunded: false,
            idempotency_key: self.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };
        let receive = TransactionRecord {
            user_id: recipient.user_id.clone(),
            transaction_id: self.transaction_id.clone(),
            kind: TransactionKind::Receive,
            amount: self.amount.clone(),
            fee: BigDecimal::from(0),
            currency: self.currency.clone(),
            status: TransactionStatus::Completed,
            counterpart: Some(sender.wallet_id.clone()),
            note: self.note.clone(),
            external_reference: Some(self.external_reference.clone()),
            balance_after: Some(effects.recipient_balance.clone()),
            refunded: false,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        };
        (send, receive)
    }

    pub fn fee_event(&self, now: DateTime<Utc>) -> FeeEvent {
        FeeEvent {
            transaction_id: self.transaction_id.clone(),
            currency: self.currency.clone(),
            fee: self.fee.clone(),
            fee_usd: self.fee_usd.clone(),
            rate: self.fee_rate.clone(),
            created_at: now,
        }
    }

    pub fn receipt(&self, effects: &TransferEffects) -> TransferReceipt {
        TransferReceipt {
            transaction_id: self.transaction_id.clone(),
            fee: self.fee.clone(),
            new_balance: effects.sender_balance.clone(),
        }
    }
}

impl ExternalOperation {
    /// Ledger record mirroring a payout or a credited collection
    pub fn ledger_record(
        &self,
        status: TransactionStatus,
        balance_after: Option<BigDecimal>,
        now: DateTime<Utc>,
    ) -> TransactionRecord {
        let kind = if self.kind.debits_wallet() {
            TransactionKind::Withdrawal
        } else {
            TransactionKind::Deposit
        };
        TransactionRecord {
            user_id: self.user_id.clone(),
            transaction_id: self.reference.clone(),
            kind,
            amount: self.amount.clone(),
            fee: BigDecimal::from(0),
            currency: self.currency.clone(),
            status,
            counterpart: self.counterpart.clone(),
            note: None,
            external_reference: Some(self.reference.clone()),
            balance_after,
            refunded: false,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transaction_id: String,
    pub fee: BigDecimal,
    pub new_balance: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Committed(TransferReceipt),
    /// Idempotency key already used by this sender
    Duplicate(TransferReceipt),
    InsufficientBalance {
        available: BigDecimal,
        required: BigDecimal,
    },
    SenderWalletMissing,
    RecipientWalletMissing,
    SelfTransfer,
    WalletInactive {
        wallet_id: String,
        status: WalletStatus,
    },
    CurrencyMismatch {
        sender: String,
        recipient: String,
    },
    LimitExceeded {
        period: &'static str,
        limit: BigDecimal,
    },
}

// ============================================================================
// Platform fee ledger and rates
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEvent {
    pub transaction_id: String,
    pub currency: String,
    pub fee: BigDecimal,
    pub fee_usd: BigDecimal,
    pub rate: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeLedgerSummary {
    pub total_usd: BigDecimal,
    pub event_count: u64,
    /// Native-currency fee totals
    pub buckets: HashMap<String, BigDecimal>,
}

/// Currency to USD table; each rate is units of the currency per one USD
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base: String,
    pub rates: HashMap<String, BigDecimal>,
    pub refreshed_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn rate_for(&self, currency: &str) -> Option<&BigDecimal> {
        self.rates.get(&currency.to_uppercase())
    }
}
