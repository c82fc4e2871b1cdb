//! Shared fixtures: an in-memory store with two verified users, scripted
//! gateways and every service wired the way `main` wires them.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wallet_backend::api::{self, AppState};
use wallet_backend::database::memory::InMemoryStore;
use wallet_backend::database::models::{KycStatus, User, Wallet};
use wallet_backend::database::repository::{ExternalOperationRepository, WalletRepository};
use wallet_backend::health::HealthChecker;
use wallet_backend::middleware::auth::TokenVerifier;
use wallet_backend::payments::error::{PaymentError, PaymentResult};
use wallet_backend::payments::types::{
    InitializeTransactionRequest, InitializeTransactionResponse, MobileMoneyFlow,
    MobileMoneyRequest, Money, PaymentState, ProviderName, StatusResponse,
    TransferRecipientRequest, TransferRequest, TransferResponse, WebhookEvent,
    WebhookVerificationResult,
};
use wallet_backend::payments::{CardGateway, MobileMoneyGateway, PaymentGateways};
use wallet_backend::services::exchange_rate::{ExchangeRateService, ExchangeRateServiceConfig};
use wallet_backend::services::fee_calculation::FeePolicy;
use wallet_backend::services::kyc::{KycConfig, KycGate};
use wallet_backend::services::ledger::{LedgerConfig, LedgerService};
use wallet_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use wallet_backend::services::qr_signer::{QrConfig, QrService};
use wallet_backend::services::rate_limiter::{InMemoryRateLimiter, RateLimitConfig};
use wallet_backend::services::reconciliation::ReconciliationService;
use wallet_backend::services::wallet_lookup::WalletLookupService;
use wallet_backend::services::webhook_processor::WebhookProcessor;

pub const ALICE_WALLET: &str = "WAAAAAAAAAA";
pub const BOB_WALLET: &str = "WBBBBBBBBBB";
pub const GOOD_SIGNATURE: &str = "signed-by-gateway";
pub const TOKEN_SECRET: &str = "integration-token-secret";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

// ----------------------------------------------------------------------------
// Scripted gateways
// ----------------------------------------------------------------------------

/// What the next payout submission does
#[derive(Debug, Clone)]
pub enum Submission {
    Answer(PaymentState),
    Decline,
    NetworkDown,
    Hang,
}

#[derive(Debug, Clone)]
pub enum OtpAnswer {
    Answer(PaymentState),
    Error,
}

pub struct ScriptedCard {
    pub submission: Mutex<Submission>,
    pub otp: Mutex<OtpAnswer>,
    pub status: Mutex<PaymentState>,
    pub initialize_fails: Mutex<bool>,
    pub transfers: AtomicUsize,
    pub recipients: AtomicUsize,
}

impl Default for ScriptedCard {
    fn default() -> Self {
        Self {
            submission: Mutex::new(Submission::Answer(PaymentState::Processing)),
            otp: Mutex::new(OtpAnswer::Answer(PaymentState::Success)),
            status: Mutex::new(PaymentState::Pending),
            initialize_fails: Mutex::new(false),
            transfers: AtomicUsize::new(0),
            recipients: AtomicUsize::new(0),
        }
    }
}

impl ScriptedCard {
    pub fn submit(&self, submission: Submission) {
        *self.submission.lock().unwrap() = submission;
    }

    pub fn report(&self, status: PaymentState) {
        *self.status.lock().unwrap() = status;
    }

    fn status_for(&self, reference: &str) -> StatusResponse {
        StatusResponse {
            status: *self.status.lock().unwrap(),
            transaction_reference: Some(reference.to_string()),
            provider_reference: Some(format!("gw-{}", reference)),
            amount: None,
            failure_reason: None,
        }
    }
}

fn declined() -> PaymentError {
    PaymentError::PaymentDeclinedError {
        message: "insufficient float".to_string(),
        provider_code: Some("400".to_string()),
    }
}

fn network_down() -> PaymentError {
    PaymentError::NetworkError {
        message: "connection reset".to_string(),
    }
}

#[async_trait]
impl CardGateway for ScriptedCard {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    async fn initialize_transaction(
        &self,
        request: InitializeTransactionRequest,
    ) -> PaymentResult<InitializeTransactionResponse> {
        if *self.initialize_fails.lock().unwrap() {
            return Err(declined());
        }
        Ok(InitializeTransactionResponse {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: Some("ac_123".to_string()),
            reference: request.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> PaymentResult<StatusResponse> {
        Ok(self.status_for(reference))
    }

    async fn create_transfer_recipient(
        &self,
        _request: TransferRecipientRequest,
    ) -> PaymentResult<String> {
        self.recipients.fetch_add(1, Ordering::SeqCst);
        Ok("RCP_test".to_string())
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferResponse> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        let script = self.submission.lock().unwrap().clone();
        match script {
            Submission::Answer(status) => Ok(TransferResponse {
                status,
                transfer_code: Some(format!("TRF_{}", request.reference)),
                provider_reference: None,
                failure_reason: None,
            }),
            Submission::Decline => Err(declined()),
            Submission::NetworkDown => Err(network_down()),
            Submission::Hang => futures::future::pending().await,
        }
    }

    async fn finalize_transfer_otp(
        &self,
        transfer_code: &str,
        _otp: &str,
    ) -> PaymentResult<TransferResponse> {
        let answer = self.otp.lock().unwrap().clone();
        match answer {
            OtpAnswer::Answer(status) => Ok(TransferResponse {
                status,
                transfer_code: Some(transfer_code.to_string()),
                provider_reference: None,
                failure_reason: Some("otp refused".to_string()),
            }),
            OtpAnswer::Error => Err(PaymentError::ValidationError {
                message: "invalid otp".to_string(),
                field: Some("otp".to_string()),
            }),
        }
    }

    async fn verify_transfer(&self, reference: &str) -> PaymentResult<StatusResponse> {
        Ok(self.status_for(reference))
    }

    async fn resolve_bank_account(
        &self,
        _account_number: &str,
        _bank_code: &str,
    ) -> PaymentResult<String> {
        Ok("ADA OBI".to_string())
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(verification(signature))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        parse_event(ProviderName::Paystack, payload)
    }
}

pub struct ScriptedMomo {
    pub submission: Mutex<Submission>,
    pub status: Mutex<PaymentState>,
}

impl Default for ScriptedMomo {
    fn default() -> Self {
        Self {
            submission: Mutex::new(Submission::Answer(PaymentState::Pending)),
            status: Mutex::new(PaymentState::Pending),
        }
    }
}

impl ScriptedMomo {
    pub fn submit(&self, submission: Submission) {
        *self.submission.lock().unwrap() = submission;
    }

    pub fn report(&self, status: PaymentState) {
        *self.status.lock().unwrap() = status;
    }

    async fn answer(&self) -> PaymentResult<PaymentState> {
        let script = self.submission.lock().unwrap().clone();
        match script {
            Submission::Answer(state) => Ok(state),
            Submission::Decline => Err(declined()),
            Submission::NetworkDown => Err(network_down()),
            Submission::Hang => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl MobileMoneyGateway for ScriptedMomo {
    fn name(&self) -> ProviderName {
        ProviderName::Momo
    }

    async fn request_to_pay(&self, _request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
        self.answer().await
    }

    async fn transfer(&self, _request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
        self.answer().await
    }

    async fn check_status(
        &self,
        external_id: &str,
        _flow: MobileMoneyFlow,
    ) -> PaymentResult<StatusResponse> {
        Ok(StatusResponse {
            status: *self.status.lock().unwrap(),
            transaction_reference: Some(external_id.to_string()),
            provider_reference: None,
            amount: None,
            failure_reason: None,
        })
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(verification(signature))
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        parse_event(ProviderName::Momo, payload)
    }
}

fn verification(signature: &str) -> WebhookVerificationResult {
    if signature == GOOD_SIGNATURE {
        WebhookVerificationResult {
            valid: true,
            reason: None,
        }
    } else {
        WebhookVerificationResult {
            valid: false,
            reason: Some("signature mismatch".to_string()),
        }
    }
}

/// Test wire format: `{"event", "reference", "transfer_code", "status", "amount"}`
fn parse_event(provider: ProviderName, payload: &[u8]) -> PaymentResult<WebhookEvent> {
    let body: Value = serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
        message: e.to_string(),
        field: None,
    })?;
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    Ok(WebhookEvent {
        provider,
        event_type: text("event").unwrap_or_else(|| "unknown".to_string()),
        transaction_reference: text("reference"),
        provider_reference: text("provider_reference"),
        transfer_code: text("transfer_code"),
        status: body
            .get("status")
            .and_then(|s| serde_json::from_value::<PaymentState>(s.clone()).ok()),
        amount: text("amount").map(|a| Money::new(dec(&a), "NGN")),
        failure_reason: text("reason"),
        payload: body.clone(),
        received_at: chrono::Utc::now().to_rfc3339(),
    })
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub card: Arc<ScriptedCard>,
    pub momo: Arc<ScriptedMomo>,
    pub reconciler: Arc<ReconciliationService>,
    pub ledger: Arc<LedgerService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub qr: Arc<QrService>,
    pub lookup: Arc<WalletLookupService>,
    pub kyc: Arc<KycGate>,
    pub rates: Arc<ExchangeRateService>,
    pub verifier: Arc<TokenVerifier>,
}

impl Harness {
    /// alice holds `alice_balance` NGN, bob holds nothing; both are verified
    pub async fn new(alice_balance: i64) -> Self {
        Self::with_limits(alice_balance, RateLimitConfig::default()).await
    }

    pub async fn with_limits(alice_balance: i64, limits: RateLimitConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_user(
                User::new("alice", Some("Alice Ade".to_string())).with_kyc_status(KycStatus::Verified),
            )
            .await;
        store
            .seed_user(
                User::new("bob", Some("Bob Bello".to_string())).with_kyc_status(KycStatus::Verified),
            )
            .await;
        let mut alice = Wallet::new("alice", ALICE_WALLET, "NGN");
        alice.balance = BigDecimal::from(alice_balance);
        store.seed_wallet(alice).await;
        store.seed_wallet(Wallet::new("bob", BOB_WALLET, "NGN")).await;

        let card = Arc::new(ScriptedCard::default());
        let momo = Arc::new(ScriptedMomo::default());
        let gateways = PaymentGateways::default()
            .with_card(card.clone())
            .with_mobile_money(momo.clone());

        let kyc = Arc::new(KycGate::new(store.clone(), KycConfig::default()));
        let rates = Arc::new(ExchangeRateService::new(
            store.clone(),
            ExchangeRateServiceConfig::default(),
        ));
        let reconciler = Arc::new(ReconciliationService::new(store.clone()));
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            kyc.clone(),
            rates.clone(),
            FeePolicy::default(),
            LedgerConfig::default(),
        ));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            gateways.clone(),
            kyc.clone(),
            reconciler.clone(),
            OrchestratorConfig {
                gateway_timeout_secs: 5,
                ..OrchestratorConfig::default()
            },
        ));
        let webhooks = Arc::new(WebhookProcessor::new(gateways, reconciler.clone()));
        let qr = Arc::new(QrService::new(
            store.clone(),
            QrConfig::new("integration-qr-signing-secret"),
        ));
        let lookup = Arc::new(WalletLookupService::new(
            store.clone(),
            Arc::new(InMemoryRateLimiter::new()),
            limits,
        ));

        Self {
            store,
            card,
            momo,
            reconciler,
            ledger,
            orchestrator,
            webhooks,
            qr,
            lookup,
            kyc,
            rates,
            verifier: Arc::new(TokenVerifier::new(TOKEN_SECRET, 3600)),
        }
    }

    pub fn router(&self) -> Router {
        api::router(AppState {
            ledger: self.ledger.clone(),
            orchestrator: self.orchestrator.clone(),
            webhooks: self.webhooks.clone(),
            qr: self.qr.clone(),
            lookup: self.lookup.clone(),
            kyc: self.kyc.clone(),
            rates: self.rates.clone(),
            verifier: self.verifier.clone(),
            health: HealthChecker::new().with_rates(self.rates.clone()),
        })
    }

    pub fn bearer(&self, user_id: &str) -> String {
        format!("Bearer {}", self.verifier.issue(user_id).unwrap())
    }

    pub async fn balance(&self, user_id: &str) -> BigDecimal {
        self.store
            .find_wallet_by_user(user_id)
            .await
            .unwrap()
            .expect("wallet exists")
            .balance
    }

    pub async fn operation(
        &self,
        reference: &str,
    ) -> wallet_backend::database::models::ExternalOperation {
        self.store
            .find_operation(reference)
            .await
            .unwrap()
            .expect("operation exists")
    }

    pub async fn store_operation_by_code(
        &self,
        transfer_code: &str,
    ) -> wallet_backend::database::models::ExternalOperation {
        self.store
            .find_operation_by_transfer_code(transfer_code)
            .await
            .unwrap()
            .expect("operation exists")
    }
}
