//! Identity-verification gate and status ingestion.
//!
//! `KycGate::enforce` runs first in every balance-mutating operation. It never
//! touches money state; its only write is the one-time legacy flag migration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{env_list, env_opt, env_or, ConfigError};
use crate::database::error::DatabaseErrorKind;
use crate::database::models::{KycStatus, User, Wallet};
use crate::database::repository::LedgerStore;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::{attribute_to, PaymentHttpClient};

const PROVIDER: &str = "identity";

/// Attempts at drawing an unused public wallet id
const WALLET_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct KycConfig {
    /// Provider result codes that mean the user is verified
    pub approved_codes: Vec<String>,
    /// Provider result codes that mean review is still running
    pub pending_codes: Vec<String>,
    pub default_currency: String,
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            approved_codes: vec!["0810".to_string(), "1012".to_string(), "1020".to_string()],
            pending_codes: vec!["0812".to_string(), "0814".to_string(), "1013".to_string()],
            default_currency: "NGN".to_string(),
        }
    }
}

impl KycConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            approved_codes: env_list("KYC_APPROVED_CODES", &defaults.approved_codes.join(",")),
            pending_codes: env_list("KYC_PENDING_CODES", &defaults.pending_codes.join(",")),
            default_currency: env_or("DEFAULT_WALLET_CURRENCY", defaults.default_currency)?
                .to_uppercase(),
        })
    }

    /// Anything not explicitly approved or pending is a rejection
    pub fn status_for_code(&self, code: &str) -> KycStatus {
        let code = code.trim();
        if self.approved_codes.iter().any(|c| c == code) {
            KycStatus::Verified
        } else if self.pending_codes.iter().any(|c| c == code) {
            KycStatus::Pending
        } else {
            KycStatus::Rejected
        }
    }
}

// ----------------------------------------------------------------------------
// Identity provider
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneVerification {
    pub verified: bool,
    #[serde(default)]
    pub match_quality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub job_id: String,
    pub result_code: String,
    #[serde(default)]
    pub result_text: Option<String>,
}

#[async_trait]
pub trait KycProvider: Send + Sync {
    async fn verify_phone_number(
        &self,
        phone_number: &str,
        country: &str,
        match_fields: &serde_json::Value,
    ) -> PaymentResult<PhoneVerification>;

    async fn job_result(&self, user_id: &str, job_id: &str) -> PaymentResult<VerificationJob>;
}

#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub partner_id: Option<String>,
    pub timeout_secs: u64,
}

impl IdentityProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key: Option<String> = env_opt("KYC_PROVIDER_API_KEY")?;
        Ok(Self {
            base_url: env_or(
                "KYC_PROVIDER_BASE_URL",
                "https://api.identity.example".to_string(),
            )?,
            api_key: api_key
                .ok_or_else(|| ConfigError::MissingVariable("KYC_PROVIDER_API_KEY".to_string()))?,
            partner_id: env_opt("KYC_PROVIDER_PARTNER_ID")?,
            timeout_secs: env_or("KYC_PROVIDER_TIMEOUT_SECS", 30)?,
        })
    }
}

/// HTTP identity provider
pub struct IdentityProvider {
    config: IdentityProviderConfig,
    http: PaymentHttpClient,
}

impl IdentityProvider {
    pub fn new(config: IdentityProviderConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), 2)?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        match &self.config.partner_id {
            Some(partner) => vec![("X-Partner-Id", partner.as_str())],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl KycProvider for IdentityProvider {
    async fn verify_phone_number(
        &self,
        phone_number: &str,
        country: &str,
        match_fields: &serde_json::Value,
    ) -> PaymentResult<PhoneVerification> {
        let body = json!({
            "phone_number": phone_number,
            "country": country,
            "match_fields": match_fields,
        });
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.url("/v1/phone/verify"),
                Some(&self.config.api_key),
                Some(&body),
                &self.headers(),
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))
    }

    async fn job_result(&self, user_id: &str, job_id: &str) -> PaymentResult<VerificationJob> {
        let job: VerificationJob = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.url(&format!("/v1/jobs/{}?user_id={}", job_id, user_id)),
                Some(&self.config.api_key),
                None,
                &self.headers(),
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;
        if job.job_id != job_id {
            return Err(PaymentError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("asked for job {} but got {}", job_id, job.job_id),
                provider_code: None,
                retryable: false,
            });
        }
        Ok(job)
    }
}

// ----------------------------------------------------------------------------
// Gate
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct KycUpdate {
    pub status: KycStatus,
    pub wallet: Option<Wallet>,
}

pub struct KycGate {
    store: Arc<dyn LedgerStore>,
    provider: Option<Arc<dyn KycProvider>>,
    config: KycConfig,
}

impl KycGate {
    pub fn new(store: Arc<dyn LedgerStore>, config: KycConfig) -> Self {
        Self {
            store,
            provider: None,
            config,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn KycProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Fails closed with `KycRequired` unless the user is verified, migrating
    /// legacy flag pairs to the canonical status on the way.
    pub async fn enforce(&self, user_id: &str) -> AppResult<()> {
        let user = self.store.find_user(user_id).await?;
        match user {
            Some(user) if user.kyc_status == KycStatus::Verified => Ok(()),
            Some(user) if user.is_legacy_verified() => {
                if self.store.migrate_legacy_kyc(user_id).await? {
                    info!(user_id = %user_id, "migrated legacy verification flags");
                }
                Ok(())
            }
            _ => Err(AppError::domain(DomainError::KycRequired {
                user_id: user_id.to_string(),
            })),
        }
    }

    /// Pulls the verification job result and records the mapped status.
    /// A verified user gets a wallet if they have none.
    pub async fn update_kyc_status(&self, user_id: &str, job_id: &str) -> AppResult<KycUpdate> {
        if job_id.trim().is_empty() {
            return Err(AppError::invalid_field("job_id", "must not be empty"));
        }
        let provider = self.provider()?;
        let job = provider.job_result(user_id, job_id).await?;
        let status = self.config.status_for_code(&job.result_code);
        info!(
            user_id = %user_id,
            job_id = %job_id,
            result_code = %job.result_code,
            status = %status,
            "verification job result"
        );

        self.store.create_user(User::new(user_id, None)).await?;
        self.store
            .set_kyc_status(user_id, status, Some(job_id))
            .await?;

        let wallet = if status == KycStatus::Verified {
            Some(self.ensure_wallet(user_id).await?)
        } else {
            None
        };
        Ok(KycUpdate { status, wallet })
    }

    pub async fn verify_phone_number(
        &self,
        phone_number: &str,
        country: &str,
        match_fields: &serde_json::Value,
    ) -> AppResult<PhoneVerification> {
        if phone_number.trim().is_empty() {
            return Err(AppError::invalid_field("phone_number", "must not be empty"));
        }
        if country.trim().len() != 2 {
            return Err(AppError::invalid_field("country", "must be an ISO 3166 alpha-2 code"));
        }
        let provider = self.provider()?;
        Ok(provider
            .verify_phone_number(phone_number.trim(), &country.trim().to_uppercase(), match_fields)
            .await?)
    }

    /// Returns the user's wallet, creating one with a fresh public id if needed
    pub async fn ensure_wallet(&self, user_id: &str) -> AppResult<Wallet> {
        if let Some(wallet) = self.store.find_wallet_by_user(user_id).await? {
            return Ok(wallet);
        }
        for _ in 0..WALLET_ID_ATTEMPTS {
            let wallet = Wallet::new(user_id, new_wallet_id(), &self.config.default_currency);
            match self.store.create_wallet(wallet).await {
                Ok(wallet) => {
                    info!(user_id = %user_id, wallet_id = %wallet.wallet_id, "wallet created");
                    return Ok(wallet);
                }
                Err(e) if matches!(e.kind, DatabaseErrorKind::UniqueViolation { .. }) => {
                    warn!(user_id = %user_id, "wallet id collision, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::internal("could not allocate a unique wallet id"))
    }

    fn provider(&self) -> AppResult<&Arc<dyn KycProvider>> {
        self.provider.as_ref().ok_or_else(|| {
            AppError::from(PaymentError::ValidationError {
                message: "identity provider is not configured".to_string(),
                field: Some("provider".to_string()),
            })
        })
    }
}

/// `W` followed by 10 uppercase hex characters
pub fn new_wallet_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("W{}", &raw[..10])
}
