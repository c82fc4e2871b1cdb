//! Wallet-to-wallet transfers.
//!
//! `send_money` validates and prices the transfer, then hands one
//! `TransferPlan` to the store, which applies balances, both records and the
//! fee ledger as a single unit. Nothing here writes money state directly.

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{env_opt, env_or, ConfigError};
use crate::database::models::{
    FeeLedgerSummary, TransactionRecord, TransferOutcome, TransferPlan, TransferReceipt, Wallet,
};
use crate::database::repository::LedgerStore;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::services::exchange_rate::ExchangeRateService;
use crate::services::fee_calculation::{fee_in_usd, FeePolicy};
use crate::services::kyc::KycGate;

pub const MAX_NOTE_LENGTH: usize = 140;
const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_transfer_amount: BigDecimal,
    pub daily_limit: Option<BigDecimal>,
    pub monthly_limit: Option<BigDecimal>,
    pub history_limit: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_transfer_amount: BigDecimal::from(1_000_000),
            daily_limit: None,
            monthly_limit: None,
            history_limit: 50,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_transfer_amount: env_or("MAX_TRANSFER_AMOUNT", defaults.max_transfer_amount)?,
            daily_limit: env_opt("DAILY_SPEND_LIMIT")?,
            monthly_limit: env_opt("MONTHLY_SPEND_LIMIT")?,
            history_limit: env_or("TRANSACTION_HISTORY_LIMIT", defaults.history_limit)?,
        };
        if config.max_transfer_amount <= BigDecimal::zero() {
            return Err(ConfigError::InvalidValue("MAX_TRANSFER_AMOUNT".to_string()));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMoneyRequest {
    pub recipient_wallet_id: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    kyc: Arc<KycGate>,
    rates: Arc<ExchangeRateService>,
    fees: FeePolicy,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        kyc: Arc<KycGate>,
        rates: Arc<ExchangeRateService>,
        fees: FeePolicy,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            kyc,
            rates,
            fees,
            config,
        }
    }

    pub async fn send_money(
        &self,
        sender_id: &str,
        request: SendMoneyRequest,
    ) -> AppResult<TransferReceipt> {
        self.kyc.enforce(sender_id).await?;
        self.validate(&request)?;

        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if let Some(key) = &idempotency_key {
            if let Some(receipt) = self
                .store
                .find_transfer_by_idempotency_key(sender_id, key)
                .await?
            {
                info!(
                    user_id = %sender_id,
                    transaction_id = %receipt.transaction_id,
                    "repeat transfer request answered from the original"
                );
                return Ok(receipt);
            }
        }

        let sender = self.own_wallet(sender_id).await?;
        let amount = request.amount.with_scale(2);
        let fee = self.fees.fee_for(&amount);
        let fee_rate = self.rates.rate_to_usd(&sender.currency).await;
        let fee_usd = fee_in_usd(&fee, &fee_rate);

        let transaction_id = Uuid::new_v4().to_string();
        let plan = TransferPlan {
            sender_user_id: sender_id.to_string(),
            recipient_wallet_id: request.recipient_wallet_id.trim().to_string(),
            currency: sender.currency.clone(),
            amount: amount.clone(),
            fee,
            fee_usd,
            fee_rate,
            external_reference: format!("P2P-{}", transaction_id.to_uppercase()),
            transaction_id,
            note: request
                .note
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            idempotency_key,
            today: Utc::now().date_naive(),
            daily_limit: self.config.daily_limit.clone(),
            monthly_limit: self.config.monthly_limit.clone(),
        };
        let recipient_wallet_id = plan.recipient_wallet_id.clone();

        match self.store.execute_transfer(plan).await? {
            TransferOutcome::Committed(receipt) => {
                info!(
                    user_id = %sender_id,
                    transaction_id = %receipt.transaction_id,
                    recipient = %recipient_wallet_id,
                    amount = %amount,
                    fee = %receipt.fee,
                    status = "completed",
                    "transfer committed"
                );
                Ok(receipt)
            }
            TransferOutcome::Duplicate(receipt) => Ok(receipt),
            TransferOutcome::InsufficientBalance {
                available,
                required,
            } => Err(AppError::domain(DomainError::InsufficientBalance {
                available: available.to_string(),
                required: required.to_string(),
            })),
            TransferOutcome::SenderWalletMissing => Err(AppError::domain(DomainError::NoWallet {
                user_id: sender_id.to_string(),
            })),
            TransferOutcome::RecipientWalletMissing => {
                Err(AppError::domain(DomainError::WalletNotFound {
                    wallet_id: recipient_wallet_id,
                }))
            }
            TransferOutcome::SelfTransfer => Err(AppError::domain(DomainError::SelfTransfer)),
            TransferOutcome::WalletInactive { wallet_id, status } => {
                Err(AppError::domain(DomainError::WalletInactive {
                    wallet_id,
                    status: status.as_str().to_string(),
                }))
            }
            TransferOutcome::CurrencyMismatch { sender, recipient } => {
                Err(AppError::domain(DomainError::CurrencyMismatch { sender, recipient }))
            }
            TransferOutcome::LimitExceeded { period, limit } => {
                warn!(user_id = %sender_id, period = period, "spend limit reached");
                Err(AppError::domain(DomainError::SpendLimitExceeded {
                    period: period.to_string(),
                    limit: limit.to_string(),
                }))
            }
        }
    }

    pub async fn own_wallet(&self, user_id: &str) -> AppResult<Wallet> {
        self.store
            .find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::NoWallet {
                    user_id: user_id.to_string(),
                })
            })
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> AppResult<Vec<TransactionRecord>> {
        let limit = limit
            .unwrap_or(self.config.history_limit)
            .clamp(1, self.config.history_limit.max(1));
        Ok(self.store.list_transactions(user_id, limit).await?)
    }

    pub async fn fee_ledger_summary(&self) -> AppResult<FeeLedgerSummary> {
        Ok(self.store.fee_ledger_summary().await?)
    }

    fn validate(&self, request: &SendMoneyRequest) -> AppResult<()> {
        let amount = &request.amount;
        if amount <= &BigDecimal::zero() {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "Amount must be positive".to_string(),
            }));
        }
        if amount > &self.config.max_transfer_amount {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: None,
                max: Some(self.config.max_transfer_amount.to_string()),
            }));
        }
        if amount.with_scale(2) != *amount {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "Amount cannot have more than two decimal places".to_string(),
            }));
        }
        if !is_valid_wallet_id(request.recipient_wallet_id.trim()) {
            return Err(AppError::invalid_field(
                "recipient_wallet_id",
                "not a wallet id",
            ));
        }
        if let Some(note) = &request.note {
            if note.chars().count() > MAX_NOTE_LENGTH {
                return Err(AppError::invalid_field(
                    "note",
                    format!("must be at most {} characters", MAX_NOTE_LENGTH),
                ));
            }
        }
        if let Some(key) = &request.idempotency_key {
            if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
                return Err(AppError::invalid_field(
                    "idempotency_key",
                    format!("must be at most {} bytes", MAX_IDEMPOTENCY_KEY_LENGTH),
                ));
            }
        }
        Ok(())
    }
}

/// Public wallet ids are short opaque tokens; older wallets predate the `W` prefix.
pub fn is_valid_wallet_id(wallet_id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{4,64}$").ok())
        .as_ref()
        .map(|re| re.is_match(wallet_id))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{KycStatus, User};
    use crate::error::ErrorCode;
    use crate::services::exchange_rate::ExchangeRateServiceConfig;
    use crate::services::kyc::KycConfig;
    use std::str::FromStr;

    async fn setup(balance: i64) -> (Arc<InMemoryStore>, LedgerService) {
        let store = Arc::new(InMemoryStore::new());
        for user in ["alice", "bob"] {
            store
                .seed_user(User::new(user, None).with_kyc_status(KycStatus::Verified))
                .await;
        }
        let mut alice = Wallet::new("alice", "WAAAAAAAAAA", "NGN");
        alice.balance = BigDecimal::from(balance);
        store.seed_wallet(alice).await;
        store.seed_wallet(Wallet::new("bob", "WBBBBBBBBBB", "NGN")).await;

        let kyc = Arc::new(KycGate::new(store.clone(), KycConfig::default()));
        let rates = Arc::new(ExchangeRateService::new(
            store.clone(),
            ExchangeRateServiceConfig::default(),
        ));
        let ledger = LedgerService::new(
            store.clone(),
            kyc,
            rates,
            FeePolicy::default(),
            LedgerConfig::default(),
        );
        (store, ledger)
    }

    fn send(amount: &str) -> SendMoneyRequest {
        SendMoneyRequest {
            recipient_wallet_id: "WBBBBBBBBBB".to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            note: Some("lunch".to_string()),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn rejects_bad_amounts_before_touching_the_store() {
        let (_, ledger) = setup(1000).await;
        for amount in ["0", "-5", "1000000.01", "10.001"] {
            let err = ledger.send_money("alice", send(amount)).await.unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::InvalidArgument, "{}", amount);
        }
    }

    #[tokio::test]
    async fn long_notes_are_rejected() {
        let (_, ledger) = setup(1000).await;
        let mut request = send("100");
        request.note = Some("x".repeat(MAX_NOTE_LENGTH + 1));
        assert!(ledger.send_money("alice", request).await.is_err());
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found() {
        let (_, ledger) = setup(1000).await;
        let mut request = send("100");
        request.recipient_wallet_id = "WFFFFFFFFFF".to_string();
        let err = ledger.send_money("alice", request).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn user_without_wallet_gets_not_found() {
        let (store, ledger) = setup(1000).await;
        store
            .seed_user(User::new("carol", None).with_kyc_status(KycStatus::Verified))
            .await;
        let err = ledger.send_money("carol", send("100")).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn daily_limit_counts_the_fee() {
        let (store, _) = setup(10_000).await;
        let kyc = Arc::new(KycGate::new(store.clone(), KycConfig::default()));
        let rates = Arc::new(ExchangeRateService::new(
            store.clone(),
            ExchangeRateServiceConfig::default(),
        ));
        let ledger = LedgerService::new(
            store.clone(),
            kyc,
            rates,
            FeePolicy::default(),
            LedgerConfig {
                daily_limit: Some(BigDecimal::from(1005)),
                ..LedgerConfig::default()
            },
        );

        // 1000 + fee 10 is over 1005
        let err = ledger.send_money("alice", send("1000")).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
        ledger.send_money("alice", send("500")).await.unwrap();
    }

    #[test]
    fn wallet_id_shape() {
        assert!(is_valid_wallet_id("W0123456789"));
        assert!(!is_valid_wallet_id(""));
        assert!(!is_valid_wallet_id("W 1"));
        assert!(!is_valid_wallet_id("../etc"));
    }
}
