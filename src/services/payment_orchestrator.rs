//! Payment Orchestrator Service
//!
//! Sequences deposits and withdrawals across the card/bank processor and the
//! mobile-money network. A withdrawal walks
//! `INITIATED → RECIPIENT_CREATED → DEBITED → TRANSFER_SUBMITTED` and ends in
//! PENDING_OTP, PROCESSING, or a refunded FAILED. A deposit never credits up
//! front; the credit lands when reconciliation sees a definitive success.
//!
//! Gateway timeouts are unknown outcomes. They leave the operation pending for
//! the webhook or the reconciliation sweep and never trigger a refund.

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{env_opt, env_or, ConfigError};
use crate::database::models::{
    DebitOutcome, ExternalOperation, NewOperation, OperationKind, OperationStatus, PaymentChannel,
    Wallet,
};
use crate::database::repository::LedgerStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ExternalError, ValidationError};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::PaymentGateways;
use crate::payments::types::{
    InitializeTransactionRequest, MobileMoneyFlow, MobileMoneyRequest, Money, PaymentState,
    StatusResponse, TransferRecipientRequest, TransferRequest,
};
use crate::payments::utils::mask_account;
use crate::services::kyc::KycGate;
use crate::services::reconciliation::{GatewayUpdate, ReconciliationOutcome, ReconciliationService};

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub min_withdrawal_amount: BigDecimal,
    /// Upper bound on any single gateway call
    pub gateway_timeout_secs: u64,
    /// Where the hosted checkout sends the payer afterwards
    pub deposit_callback_url: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_withdrawal_amount: BigDecimal::from(100),
            gateway_timeout_secs: 30,
            deposit_callback_url: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            min_withdrawal_amount: env_or("MIN_WITHDRAWAL_AMOUNT", defaults.min_withdrawal_amount)?,
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs)?,
            deposit_callback_url: env_opt("DEPOSIT_CALLBACK_URL")?,
        };
        if config.gateway_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }
        Ok(config)
    }
}

// ============================================================================
// Request and response types
// ============================================================================

/// Where a withdrawal pays out to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WithdrawalDestination {
    Bank(BankDestination),
    MobileMoney(MobileMoneyDestination),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankDestination {
    pub account_number: String,
    pub bank_code: String,
    /// Resolved through the gateway when absent
    #[serde(default)]
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileMoneyDestination {
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: BigDecimal,
    pub destination: WithdrawalDestination,
    #[serde(default)]
    pub reason: Option<String>,
}

/// How a deposit is collected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DepositMethod {
    Card { email: String },
    BankTransfer { email: String },
    MobileMoney { phone_number: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: BigDecimal,
    pub method: DepositMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub operation: ExternalOperation,
    /// Hosted checkout for card and bank-transfer deposits
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    store: Arc<dyn LedgerStore>,
    gateways: PaymentGateways,
    kyc: Arc<KycGate>,
    reconciler: Arc<ReconciliationService>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateways: PaymentGateways,
        kyc: Arc<KycGate>,
        reconciler: Arc<ReconciliationService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            kyc,
            reconciler,
            config,
        }
    }

    // ------------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------------

    pub async fn initiate_withdrawal(
        &self,
        user_id: &str,
        request: WithdrawalRequest,
    ) -> AppResult<ExternalOperation> {
        self.kyc.enforce(user_id).await?;
        validate_amount(&request.amount)?;
        if request.amount < self.config.min_withdrawal_amount {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: Some(self.config.min_withdrawal_amount.to_string()),
                max: None,
            }));
        }

        let wallet = self.own_wallet(user_id).await?;
        if wallet.balance < request.amount {
            return Err(AppError::domain(DomainError::InsufficientBalance {
                available: wallet.balance.to_string(),
                required: request.amount.to_string(),
            }));
        }

        let reference = format!("WD-{}", Uuid::new_v4());
        match request.destination {
            WithdrawalDestination::Bank(destination) => {
                self.withdraw_to_bank(&wallet, request.amount, destination, request.reason, reference)
                    .await
            }
            WithdrawalDestination::MobileMoney(destination) => {
                self.withdraw_to_mobile_money(&wallet, request.amount, destination, request.reason, reference)
                    .await
            }
        }
    }

    async fn withdraw_to_bank(
        &self,
        wallet: &Wallet,
        amount: BigDecimal,
        destination: BankDestination,
        reason: Option<String>,
        reference: String,
    ) -> AppResult<ExternalOperation> {
        let account_number = require_digits("account_number", &destination.account_number)?;
        let bank_code = require_non_empty("bank_code", &destination.bank_code)?;
        let gateway = self.gateways.card()?.clone();
        let service = gateway.name().to_string();

        // INITIATED → RECIPIENT_CREATED. No money has moved yet, so any
        // failure here is returned as-is.
        let account_name = match destination.account_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .gateway_call(
                    &service,
                    &reference,
                    gateway.resolve_bank_account(&account_number, &bank_code),
                )
                .await
                .map_err(|e| e.into_app(&service, &reference))?,
        };
        let recipient_code = self
            .gateway_call(
                &service,
                &reference,
                gateway.create_transfer_recipient(TransferRecipientRequest {
                    account_name: account_name.clone(),
                    account_number: account_number.clone(),
                    bank_code: bank_code.clone(),
                    currency: wallet.currency.clone(),
                }),
            )
            .await
            .map_err(|e| e.into_app(&service, &reference))?;

        // RECIPIENT_CREATED → DEBITED
        let operation = self
            .debit(NewOperation {
                reference: reference.clone(),
                user_id: wallet.user_id.clone(),
                kind: OperationKind::BankTransfer,
                channel: PaymentChannel::Bank,
                amount: amount.clone(),
                currency: wallet.currency.clone(),
                counterpart: Some(account_number.clone()),
                recipient_code: Some(recipient_code.clone()),
                metadata: json!({
                    "bank_code": bank_code,
                    "account_name": account_name,
                }),
            })
            .await?;
        info!(
            user_id = %wallet.user_id,
            reference = %reference,
            amount = %amount,
            account = %mask_account(&account_number),
            "wallet debited for bank withdrawal"
        );

        // DEBITED → TRANSFER_SUBMITTED
        let submitted = self
            .gateway_call(
                &service,
                &reference,
                gateway.initiate_transfer(TransferRequest {
                    recipient_code,
                    amount: Money::new(amount, wallet.currency.clone()),
                    reference: reference.clone(),
                    reason,
                }),
            )
            .await;

        match submitted {
            Ok(response) => {
                self.after_submission(
                    operation,
                    response.status,
                    response.transfer_code,
                    response.failure_reason,
                )
                .await
            }
            Err(failure) => self.after_failed_submission(operation, &service, failure).await,
        }
    }

    async fn withdraw_to_mobile_money(
        &self,
        wallet: &Wallet,
        amount: BigDecimal,
        destination: MobileMoneyDestination,
        reason: Option<String>,
        reference: String,
    ) -> AppResult<ExternalOperation> {
        let phone_number = require_digits("phone_number", &destination.phone_number)?;
        let gateway = self.gateways.mobile_money()?.clone();
        let service = gateway.name().to_string();

        let operation = self
            .debit(NewOperation {
                reference: reference.clone(),
                user_id: wallet.user_id.clone(),
                kind: OperationKind::Disbursement,
                channel: PaymentChannel::MobileMoney,
                amount: amount.clone(),
                currency: wallet.currency.clone(),
                counterpart: Some(phone_number.clone()),
                recipient_code: None,
                metadata: json!({}),
            })
            .await?;
        info!(
            user_id = %wallet.user_id,
            reference = %reference,
            amount = %amount,
            payee = %mask_account(&phone_number),
            "wallet debited for mobile-money disbursement"
        );

        let submitted = self
            .gateway_call(
                &service,
                &reference,
                gateway.transfer(MobileMoneyRequest {
                    amount: Money::new(amount, wallet.currency.clone()),
                    phone_number,
                    external_id: reference.clone(),
                    note: reason,
                }),
            )
            .await;

        match submitted {
            Ok(state) => self.after_submission(operation, state, None, None).await,
            Err(failure) => self.after_failed_submission(operation, &service, failure).await,
        }
    }

    async fn debit(&self, op: NewOperation) -> AppResult<ExternalOperation> {
        let user_id = op.user_id.clone();
        let required = op.amount.to_string();
        match self.store.debit_for_withdrawal(op).await? {
            DebitOutcome::Debited(operation) => Ok(operation),
            DebitOutcome::InsufficientBalance { available } => {
                Err(AppError::domain(DomainError::InsufficientBalance {
                    available: available.to_string(),
                    required,
                }))
            }
            DebitOutcome::WalletMissing => Err(AppError::domain(DomainError::NoWallet { user_id })),
            DebitOutcome::WalletInactive { status } => {
                Err(AppError::domain(DomainError::WalletInactive {
                    wallet_id: user_id,
                    status: status.as_str().to_string(),
                }))
            }
        }
    }

    /// The gateway answered the submission
    async fn after_submission(
        &self,
        operation: ExternalOperation,
        state: PaymentState,
        transfer_code: Option<String>,
        failure_reason: Option<String>,
    ) -> AppResult<ExternalOperation> {
        let reference = operation.reference.clone();
        match state {
            PaymentState::Failed | PaymentState::Cancelled | PaymentState::Reversed => {
                let reason = failure_reason.unwrap_or_else(|| "declined by gateway".to_string());
                self.refund_rejected(&reference, &reason).await?;
                Err(AppError::domain(DomainError::TransferRejected { reference, reason }))
            }
            PaymentState::OtpRequired => {
                self.advance(&operation, OperationStatus::PendingOtp, transfer_code)
                    .await
            }
            PaymentState::Success | PaymentState::Processing | PaymentState::Pending => {
                // Completion is reported by the webhook
                self.advance(&operation, OperationStatus::Processing, transfer_code)
                    .await
            }
            PaymentState::Unknown => {
                warn!(reference = %reference, "gateway accepted with an unreadable status");
                Ok(operation)
            }
        }
    }

    /// The submission failed or timed out
    async fn after_failed_submission(
        &self,
        operation: ExternalOperation,
        service: &str,
        failure: GatewayFailure,
    ) -> AppResult<ExternalOperation> {
        let reference = operation.reference.clone();
        match failure {
            GatewayFailure::Rejected(err) if err.is_definitive_rejection() => {
                let reason = err.user_message();
                warn!(reference = %reference, error = %err, "gateway refused payout, refunding");
                self.refund_rejected(&reference, &reason).await?;
                Err(AppError::domain(DomainError::TransferRejected { reference, reason }))
            }
            other => {
                // Outcome unknown: the transfer may have landed. Leave it pending.
                error!(
                    reference = %reference,
                    "payout outcome unknown, leaving operation pending"
                );
                Err(other.into_app(service, &reference))
            }
        }
    }

    async fn refund_rejected(&self, reference: &str, reason: &str) -> AppResult<()> {
        let outcome = self
            .reconciler
            .apply(GatewayUpdate::new(reference, PaymentState::Failed).with_failure_reason(reason))
            .await?;
        if let ReconciliationOutcome::Ignored { reason } = outcome {
            return Err(AppError::internal(format!(
                "refund for {} was not applied: {}",
                reference, reason
            )));
        }
        Ok(())
    }

    async fn advance(
        &self,
        operation: &ExternalOperation,
        to: OperationStatus,
        transfer_code: Option<String>,
    ) -> AppResult<ExternalOperation> {
        let advanced = self
            .store
            .advance_operation(
                &operation.reference,
                &[OperationStatus::Pending, OperationStatus::PendingOtp],
                to,
                transfer_code.as_deref(),
            )
            .await?;
        match advanced {
            Some(op) => {
                info!(reference = %op.reference, status = %op.status, "payout submitted");
                Ok(op)
            }
            // A webhook got there first; report what is stored
            None => self.find_owned(&operation.user_id, &operation.reference).await,
        }
    }

    /// Submits the OTP for a payout held at PENDING_OTP. A refused OTP leaves
    /// the payout waiting for another attempt.
    pub async fn finalize_transfer(
        &self,
        user_id: &str,
        transfer_code: &str,
        otp: &str,
    ) -> AppResult<ExternalOperation> {
        self.kyc.enforce(user_id).await?;
        let transfer_code = require_non_empty("transfer_code", transfer_code)?;
        let otp = otp.trim();
        if otp.len() < 4 || otp.len() > 8 || !otp.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::invalid_field("otp", "must be 4 to 8 digits"));
        }

        let operation = match self
            .store
            .find_operation_by_transfer_code(&transfer_code)
            .await?
        {
            Some(op) if op.user_id == user_id => op,
            _ => {
                return Err(AppError::domain(DomainError::OperationNotFound {
                    reference: transfer_code,
                }))
            }
        };
        if operation.status != OperationStatus::PendingOtp {
            return Err(AppError::domain(DomainError::InvalidOperationState {
                reference: operation.reference.clone(),
                current: operation.status.to_string(),
            }));
        }

        let gateway = self.gateways.card()?.clone();
        let service = gateway.name().to_string();
        let response = self
            .gateway_call(
                &service,
                &operation.reference,
                gateway.finalize_transfer_otp(&transfer_code, otp),
            )
            .await
            .map_err(|e| e.into_app(&service, &operation.reference))?;

        match response.status {
            PaymentState::Failed | PaymentState::Cancelled | PaymentState::Reversed => {
                let reference = operation.reference.clone();
                let reason = response
                    .failure_reason
                    .unwrap_or_else(|| "declined by gateway".to_string());
                self.refund_rejected(&reference, &reason).await?;
                Err(AppError::domain(DomainError::TransferRejected { reference, reason }))
            }
            PaymentState::OtpRequired => Ok(operation),
            _ => {
                let advanced = self
                    .store
                    .advance_operation(
                        &operation.reference,
                        &[OperationStatus::PendingOtp],
                        OperationStatus::Processing,
                        None,
                    )
                    .await?;
                match advanced {
                    Some(op) => {
                        info!(reference = %op.reference, "OTP accepted, payout processing");
                        Ok(op)
                    }
                    None => self.find_owned(user_id, &operation.reference).await,
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Deposits
    // ------------------------------------------------------------------------

    pub async fn initiate_deposit(
        &self,
        user_id: &str,
        request: DepositRequest,
    ) -> AppResult<DepositReceipt> {
        self.kyc.enforce(user_id).await?;
        validate_amount(&request.amount)?;
        let wallet = self.own_wallet(user_id).await?;
        if !wallet.is_active() {
            return Err(AppError::domain(DomainError::WalletInactive {
                wallet_id: wallet.wallet_id.clone(),
                status: wallet.status.as_str().to_string(),
            }));
        }

        let reference = format!("DEP-{}", Uuid::new_v4());
        let (channel, counterpart) = match &request.method {
            DepositMethod::Card { email } => {
                (PaymentChannel::Card, Some(require_email(email)?))
            }
            DepositMethod::BankTransfer { email } => {
                (PaymentChannel::Bank, Some(require_email(email)?))
            }
            DepositMethod::MobileMoney { phone_number } => (
                PaymentChannel::MobileMoney,
                Some(require_digits("phone_number", phone_number)?),
            ),
        };

        // Stored before the gateway call so an early webhook finds it
        let operation = self
            .store
            .create_collection(NewOperation {
                reference: reference.clone(),
                user_id: user_id.to_string(),
                kind: OperationKind::Collection,
                channel,
                amount: request.amount.clone(),
                currency: wallet.currency.clone(),
                counterpart: counterpart.clone(),
                recipient_code: None,
                metadata: json!({}),
            })
            .await?;
        info!(
            user_id = %user_id,
            reference = %reference,
            amount = %request.amount,
            channel = channel.as_str(),
            "deposit created"
        );

        let money = Money::new(request.amount, wallet.currency.clone());
        match request.method {
            DepositMethod::Card { .. } | DepositMethod::BankTransfer { .. } => {
                let gateway = self.gateways.card()?.clone();
                let service = gateway.name().to_string();
                let channels = match channel {
                    PaymentChannel::Card => vec!["card".to_string()],
                    _ => vec!["bank_transfer".to_string()],
                };
                let initialized = self
                    .gateway_call(
                        &service,
                        &reference,
                        gateway.initialize_transaction(InitializeTransactionRequest {
                            email: counterpart.unwrap_or_default(),
                            amount: money,
                            reference: reference.clone(),
                            callback_url: self.config.deposit_callback_url.clone(),
                            channels: Some(channels),
                            metadata: Some(json!({ "user_id": user_id })),
                        }),
                    )
                    .await;
                match initialized {
                    Ok(response) => Ok(DepositReceipt {
                        operation,
                        authorization_url: Some(response.authorization_url),
                        access_code: response.access_code,
                    }),
                    Err(failure) => Err(self.deposit_failed(&reference, &service, failure).await),
                }
            }
            DepositMethod::MobileMoney { phone_number } => {
                let gateway = self.gateways.mobile_money()?.clone();
                let service = gateway.name().to_string();
                let requested = self
                    .gateway_call(
                        &service,
                        &reference,
                        gateway.request_to_pay(MobileMoneyRequest {
                            amount: money,
                            phone_number: phone_number.trim().to_string(),
                            external_id: reference.clone(),
                            note: Some("Wallet top-up".to_string()),
                        }),
                    )
                    .await;
                match requested {
                    Ok(PaymentState::Failed) | Ok(PaymentState::Cancelled) => {
                        let reason = "collection refused by gateway".to_string();
                        self.reconciler
                            .apply(
                                GatewayUpdate::new(reference.as_str(), PaymentState::Failed)
                                    .with_failure_reason(reason.as_str()),
                            )
                            .await?;
                        Err(AppError::domain(DomainError::TransferRejected { reference, reason }))
                    }
                    Ok(_) => Ok(DepositReceipt {
                        operation,
                        authorization_url: None,
                        access_code: None,
                    }),
                    Err(failure) => Err(self.deposit_failed(&reference, &service, failure).await),
                }
            }
        }
    }

    /// Nothing was credited, so a refused collection is simply closed
    async fn deposit_failed(&self, reference: &str, service: &str, failure: GatewayFailure) -> AppError {
        if let GatewayFailure::Rejected(err) = &failure {
            if err.is_definitive_rejection() {
                let update = GatewayUpdate::new(reference, PaymentState::Failed)
                    .with_failure_reason(err.user_message());
                if let Err(e) = self.reconciler.apply(update).await {
                    return e;
                }
            }
        }
        failure.into_app(service, reference)
    }

    // ------------------------------------------------------------------------
    // Status checks
    // ------------------------------------------------------------------------

    /// Asks the gateway about an operation the caller owns and applies any
    /// definitive answer.
    pub async fn check_external_status(
        &self,
        user_id: &str,
        reference: &str,
    ) -> AppResult<ExternalOperation> {
        let operation = self.find_owned(user_id, reference).await?;
        if operation.status.is_terminal() {
            return Ok(operation);
        }
        let outcome = self.refresh(&operation).await?;
        match outcome.operation() {
            Some(op) => Ok(op.clone()),
            None => self.find_owned(user_id, reference).await,
        }
    }

    /// Queries the gateway for one open operation and reconciles the answer.
    /// A failed query changes nothing.
    pub async fn refresh(&self, operation: &ExternalOperation) -> AppResult<ReconciliationOutcome> {
        let reference = operation.reference.as_str();
        let status = match (operation.kind, operation.channel) {
            (OperationKind::BankTransfer, _) => {
                let gateway = self.gateways.card()?.clone();
                let service = gateway.name().to_string();
                self.gateway_call(&service, reference, gateway.verify_transfer(reference))
                    .await
                    .map_err(|e| e.into_app(&service, reference))?
            }
            (OperationKind::Collection, PaymentChannel::Card | PaymentChannel::Bank) => {
                let gateway = self.gateways.card()?.clone();
                let service = gateway.name().to_string();
                self.gateway_call(&service, reference, gateway.verify_transaction(reference))
                    .await
                    .map_err(|e| e.into_app(&service, reference))?
            }
            (kind, _) => {
                let flow = if kind == OperationKind::Disbursement {
                    MobileMoneyFlow::Disbursement
                } else {
                    MobileMoneyFlow::Collection
                };
                let gateway = self.gateways.mobile_money()?.clone();
                let service = gateway.name().to_string();
                self.gateway_call(&service, reference, gateway.check_status(reference, flow))
                    .await
                    .map_err(|e| e.into_app(&service, reference))?
            }
        };

        self.reconciler
            .apply(status_update(reference, status))
            .await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn own_wallet(&self, user_id: &str) -> AppResult<Wallet> {
        self.store
            .find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::NoWallet {
                    user_id: user_id.to_string(),
                })
            })
    }

    async fn find_owned(&self, user_id: &str, reference: &str) -> AppResult<ExternalOperation> {
        match self.store.find_operation(reference).await? {
            Some(op) if op.user_id == user_id => Ok(op),
            _ => Err(AppError::domain(DomainError::OperationNotFound {
                reference: reference.to_string(),
            })),
        }
    }

    async fn gateway_call<T, F>(
        &self,
        service: &str,
        reference: &str,
        call: F,
    ) -> Result<T, GatewayFailure>
    where
        F: Future<Output = PaymentResult<T>>,
    {
        let limit = Duration::from_secs(self.config.gateway_timeout_secs);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(GatewayFailure::Rejected(err)),
            Err(_) => {
                warn!(service = %service, reference = %reference, "gateway call timed out");
                Err(GatewayFailure::TimedOut {
                    timeout_secs: self.config.gateway_timeout_secs,
                })
            }
        }
    }
}

/// Why a gateway call produced no usable answer
#[derive(Debug)]
enum GatewayFailure {
    Rejected(PaymentError),
    TimedOut { timeout_secs: u64 },
}

impl GatewayFailure {
    fn into_app(self, service: &str, reference: &str) -> AppError {
        match self {
            GatewayFailure::Rejected(err) => AppError::from(err).with_context(reference),
            GatewayFailure::TimedOut { timeout_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: service.to_string(),
                    timeout_secs,
                }))
                .with_context(reference)
            }
        }
    }
}

fn status_update(reference: &str, status: StatusResponse) -> GatewayUpdate {
    GatewayUpdate {
        reference: Some(reference.to_string()),
        transfer_code: None,
        status: status.status,
        gateway_reference: status.provider_reference,
        failure_reason: status.failure_reason,
        amount: status.amount,
        metadata: None,
    }
}

fn validate_amount(amount: &BigDecimal) -> AppResult<()> {
    if amount <= &BigDecimal::zero() {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "Amount must be positive".to_string(),
        }));
    }
    if amount.with_scale(2) != *amount {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "Amount cannot have more than two decimal places".to_string(),
        }));
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: field.to_string(),
        }));
    }
    Ok(value.to_string())
}

/// Account and phone numbers: digits with an optional leading `+`
fn require_digits(field: &str, value: &str) -> AppResult<String> {
    let value = require_non_empty(field, value)?;
    let digits = value.strip_prefix('+').unwrap_or(&value);
    if digits.len() < 6 || digits.len() > 20 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::invalid_field(field, "must be 6 to 20 digits"));
    }
    Ok(digits.to_string())
}

fn require_email(value: &str) -> AppResult<String> {
    let value = require_non_empty("email", value)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(value),
        _ => Err(AppError::invalid_field("email", "not an email address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn destinations_are_tagged_by_type() {
        let request: WithdrawalRequest = serde_json::from_value(json!({
            "amount": "300",
            "destination": {"type": "bank", "account_number": "0123456789", "bank_code": "058"}
        }))
        .unwrap();
        assert!(matches!(
            request.destination,
            WithdrawalDestination::Bank(BankDestination { account_name: None, .. })
        ));

        let deposit: DepositRequest = serde_json::from_value(json!({
            "amount": "50.25",
            "method": {"type": "mobile_money", "phone_number": "233240000000"}
        }))
        .unwrap();
        assert_eq!(deposit.amount, BigDecimal::from_str("50.25").unwrap());
        assert!(matches!(deposit.method, DepositMethod::MobileMoney { .. }));
    }

    #[test]
    fn field_validation() {
        assert!(validate_amount(&BigDecimal::from_str("10.5").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("10.555").unwrap()).is_err());
        assert!(validate_amount(&BigDecimal::from(0)).is_err());

        assert_eq!(require_digits("phone", "+233240000000").unwrap(), "233240000000");
        assert!(require_digits("phone", "12ab56").is_err());
        assert!(require_email("a@b.co").is_ok());
        assert!(require_email("nobody").is_err());
    }

    #[test]
    fn timeout_maps_to_gateway_unavailable_with_reference() {
        let err = GatewayFailure::TimedOut { timeout_secs: 30 }.into_app("paystack", "WD-1");
        assert_eq!(err.error_code(), crate::error::ErrorCode::GatewayUnavailable);
        assert_eq!(err.context.as_deref(), Some("WD-1"));
    }
}
