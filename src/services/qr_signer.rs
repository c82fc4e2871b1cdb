//! Signed, time-boxed payment-request payloads exchanged through QR codes.
//!
//! The signature is a hex HMAC-SHA256 over the JSON serialization of
//! [`QrPayload`]. Field order is fixed by the struct, so the verifier
//! re-serializes the decoded payload and gets the same bytes.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{env_or, ConfigError};
use crate::database::repository::LedgerStore;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::payments::utils::{hmac_sha256_hex, secure_eq};
use crate::services::ledger::{is_valid_wallet_id, MAX_NOTE_LENGTH};

#[derive(Debug, Clone)]
pub struct QrConfig {
    pub signing_secret: String,
    /// How long a payload stays valid after issuance
    pub validity_secs: i64,
    /// Clock drift tolerated for payloads stamped in the future
    pub max_future_skew_secs: i64,
}

impl QrConfig {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            validity_secs: 900,
            max_future_skew_secs: 60,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("QR_SIGNING_SECRET")
            .map_err(|_| ConfigError::MissingVariable("QR_SIGNING_SECRET".to_string()))?;
        let config = Self {
            validity_secs: env_or("QR_VALIDITY_SECS", 900)?,
            max_future_skew_secs: env_or("QR_MAX_FUTURE_SKEW_SECS", 60)?,
            ..Self::new(secret)
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "QR_SIGNING_SECRET must be at least 16 bytes".to_string(),
            ));
        }
        if self.validity_secs <= 0 {
            return Err(ConfigError::InvalidValue("QR_VALIDITY_SECS".to_string()));
        }
        Ok(())
    }
}

/// What the payee's device renders into the QR code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub wallet_id: String,
    pub amount: Option<BigDecimal>,
    pub note: Option<String>,
    /// Unix seconds at issuance
    pub timestamp: i64,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedQrPayload {
    pub payload: QrPayload,
    pub signature: String,
}

/// Display identity of the payee. Never carries the balance.
#[derive(Debug, Clone, Serialize)]
pub struct QrRecipient {
    pub wallet_id: String,
    pub currency: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub amount: Option<BigDecimal>,
    pub note: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct QrService {
    store: Arc<dyn LedgerStore>,
    config: QrConfig,
}

impl QrService {
    pub fn new(store: Arc<dyn LedgerStore>, config: QrConfig) -> Self {
        Self { store, config }
    }

    pub async fn sign(
        &self,
        user_id: &str,
        wallet_id: &str,
        amount: Option<BigDecimal>,
        note: Option<String>,
    ) -> AppResult<SignedQrPayload> {
        self.sign_at(user_id, wallet_id, amount, note, Utc::now())
            .await
    }

    pub async fn sign_at(
        &self,
        user_id: &str,
        wallet_id: &str,
        amount: Option<BigDecimal>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<SignedQrPayload> {
        if !is_valid_wallet_id(wallet_id) {
            return Err(AppError::invalid_field("wallet_id", "malformed wallet id"));
        }
        if let Some(amount) = &amount {
            if amount <= &BigDecimal::zero() || amount.with_scale(2) != *amount {
                return Err(AppError::validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "Amount must be positive with at most two decimal places".to_string(),
                }));
            }
        }
        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_LENGTH) {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "note".to_string(),
                min: None,
                max: Some(MAX_NOTE_LENGTH.to_string()),
            }));
        }

        let wallet = self
            .store
            .find_wallet_by_public_id(wallet_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::WalletNotFound {
                    wallet_id: wallet_id.to_string(),
                })
            })?;
        if wallet.user_id != user_id {
            warn!(user_id = %user_id, wallet_id = %wallet_id, "QR signing refused for foreign wallet");
            return Err(AppError::domain(DomainError::NotWalletOwner {
                wallet_id: wallet_id.to_string(),
            }));
        }

        let payload = QrPayload {
            wallet_id: wallet.wallet_id,
            amount,
            note,
            timestamp: now.timestamp(),
            user_id: user_id.to_string(),
        };
        let signature = self.signature_for(&payload)?;
        info!(user_id = %user_id, wallet_id = %payload.wallet_id, "QR payload signed");
        Ok(SignedQrPayload { payload, signature })
    }

    pub async fn verify(&self, payload: &QrPayload, signature: &str) -> AppResult<QrRecipient> {
        self.verify_at(payload, signature, Utc::now()).await
    }

    /// Checks the signature and the validity window, then resolves the payee
    pub async fn verify_at(
        &self,
        payload: &QrPayload,
        signature: &str,
        now: DateTime<Utc>,
    ) -> AppResult<QrRecipient> {
        let expected = self.signature_for(payload)?;
        let provided = signature.trim().to_ascii_lowercase();
        if !secure_eq(expected.as_bytes(), provided.as_bytes()) {
            warn!(wallet_id = %payload.wallet_id, "QR payload signature mismatch");
            return Err(AppError::validation(ValidationError::InvalidSignature {
                subject: "qr payload".to_string(),
            }));
        }

        let age_secs = now.timestamp() - payload.timestamp;
        if age_secs < -self.config.max_future_skew_secs {
            return Err(AppError::invalid_field("timestamp", "issued in the future"));
        }
        if age_secs > self.config.validity_secs {
            return Err(AppError::domain(DomainError::QrPayloadExpired { age_secs }));
        }

        let wallet = self
            .store
            .find_wallet_by_public_id(&payload.wallet_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::WalletNotFound {
                    wallet_id: payload.wallet_id.clone(),
                })
            })?;
        let user = self.store.find_user(&wallet.user_id).await?;

        let issued = DateTime::<Utc>::from_timestamp(payload.timestamp, 0).unwrap_or(now);
        Ok(QrRecipient {
            wallet_id: wallet.wallet_id,
            currency: wallet.currency,
            display_name: user.as_ref().and_then(|u| u.display_name.clone()),
            photo_url: user.and_then(|u| u.photo_url),
            amount: payload.amount.clone(),
            note: payload.note.clone(),
            expires_at: issued + Duration::seconds(self.config.validity_secs),
        })
    }

    fn signature_for(&self, payload: &QrPayload) -> AppResult<String> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| AppError::internal(format!("QR payload serialization failed: {}", e)))?;
        Ok(hmac_sha256_hex(self.config.signing_secret.as_bytes(), &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{User, Wallet};
    use crate::error::ErrorCode;
    use std::str::FromStr;

    async fn service() -> QrService {
        let store = Arc::new(InMemoryStore::new());
        let mut user = User::new("payee", Some("Ada Payee".to_string()));
        user.photo_url = Some("https://cdn.example/ada.png".to_string());
        store.seed_user(user).await;
        store.seed_wallet(Wallet::new("payee", "WPAYEE00001", "NGN")).await;
        QrService::new(store, QrConfig::new("0123456789abcdef0123456789abcdef"))
    }

    #[tokio::test]
    async fn signed_payload_verifies_without_balance() {
        let qr = service().await;
        let now = Utc::now();
        let signed = qr
            .sign_at(
                "payee",
                "WPAYEE00001",
                Some(BigDecimal::from_str("1500.00").unwrap()),
                Some("lunch".to_string()),
                now,
            )
            .await
            .unwrap();

        let recipient = qr
            .verify_at(&signed.payload, &signed.signature, now)
            .await
            .unwrap();
        assert_eq!(recipient.display_name.as_deref(), Some("Ada Payee"));
        assert_eq!(recipient.note.as_deref(), Some("lunch"));

        let body = serde_json::to_value(&recipient).unwrap();
        assert!(body.get("balance").is_none());
    }

    #[tokio::test]
    async fn payload_expires_after_window() {
        let qr = service().await;
        let issued = Utc::now();
        let signed = qr
            .sign_at("payee", "WPAYEE00001", None, None, issued)
            .await
            .unwrap();

        let err = qr
            .verify_at(&signed.payload, &signed.signature, issued + Duration::minutes(16))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::AppErrorKind::Domain(DomainError::QrPayloadExpired { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected() {
        let qr = service().await;
        let now = Utc::now();
        let signed = qr
            .sign_at("payee", "WPAYEE00001", Some(BigDecimal::from(10)), None, now)
            .await
            .unwrap();

        let mut tampered = signed.payload.clone();
        tampered.amount = Some(BigDecimal::from(10_000));
        let err = qr
            .verify_at(&tampered, &signed.signature, now)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn cannot_sign_for_someone_elses_wallet() {
        let qr = service().await;
        let err = qr
            .sign("intruder", "WPAYEE00001", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn future_timestamps_are_rejected() {
        let qr = service().await;
        let now = Utc::now();
        let signed = qr
            .sign_at("payee", "WPAYEE00001", None, None, now + Duration::minutes(10))
            .await
            .unwrap();
        assert!(qr
            .verify_at(&signed.payload, &signed.signature, now)
            .await
            .is_err());
    }
}
