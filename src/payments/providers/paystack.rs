use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::CardGateway;
use crate::payments::types::{
    InitializeTransactionRequest, InitializeTransactionResponse, Money, PaymentState,
    ProviderName, StatusResponse, TransferRecipientRequest, TransferRequest, TransferResponse,
    WebhookEvent, WebhookVerificationResult,
};
use crate::payments::utils::{attribute_to, verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "paystack";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub public_key: Option<String>,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            callback_url: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            public_key: std::env::var("PAYSTACK_PUBLIC_KEY").ok(),
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            callback_url: std::env::var("PAYSTACK_CALLBACK_URL").ok(),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            secret_key,
        })
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn unwrap_envelope<T>(envelope: PaystackEnvelope<T>) -> PaymentResult<T> {
        if !envelope.status {
            return Err(PaymentError::ProviderError {
                provider: PROVIDER.to_string(),
                message: envelope.message,
                provider_code: None,
                retryable: false,
            });
        }
        envelope.data.ok_or_else(|| PaymentError::ProviderError {
            provider: PROVIDER.to_string(),
            message: "response carried no data".to_string(),
            provider_code: None,
            retryable: true,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> PaymentResult<T> {
        let raw: PaystackEnvelope<T> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(path),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;
        Self::unwrap_envelope(raw)
    }

    async fn post_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &JsonValue,
    ) -> PaymentResult<T> {
        let raw: PaystackEnvelope<T> = self
            .http
            .request_json_once(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&self.config.secret_key),
                Some(payload),
                &[("Content-Type", "application/json")],
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;
        Self::unwrap_envelope(raw)
    }
}

fn transaction_state(status: &str) -> PaymentState {
    match status {
        "success" => PaymentState::Success,
        "pending" | "ongoing" | "queued" => PaymentState::Pending,
        "processing" => PaymentState::Processing,
        "failed" => PaymentState::Failed,
        "abandoned" => PaymentState::Cancelled,
        "reversed" => PaymentState::Reversed,
        _ => PaymentState::Unknown,
    }
}

fn transfer_state(status: &str) -> PaymentState {
    match status {
        "success" => PaymentState::Success,
        "otp" => PaymentState::OtpRequired,
        "pending" | "received" | "queued" | "processing" => PaymentState::Processing,
        "failed" | "rejected" | "blocked" | "abandoned" => PaymentState::Failed,
        "reversed" => PaymentState::Reversed,
        _ => PaymentState::Unknown,
    }
}

fn event_state(event_type: &str) -> Option<PaymentState> {
    match event_type {
        "charge.success" | "transfer.success" => Some(PaymentState::Success),
        "charge.failed" | "transfer.failed" => Some(PaymentState::Failed),
        "transfer.reversed" => Some(PaymentState::Reversed),
        _ => None,
    }
}

#[async_trait]
impl CardGateway for PaystackProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    async fn initialize_transaction(
        &self,
        request: InitializeTransactionRequest,
    ) -> PaymentResult<InitializeTransactionResponse> {
        request.amount.validate_positive("amount")?;
        if request.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "email is required for paystack initialization".to_string(),
                field: Some("email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "email": request.email,
            "amount": request.amount.to_minor_units()?,
            "currency": request.amount.currency,
            "reference": request.reference,
            "callback_url": request.callback_url.or_else(|| self.config.callback_url.clone()),
            "channels": request.channels,
            "metadata": request.metadata,
        });

        let data: PaystackInitializeData =
            self.post_once("/transaction/initialize", &payload).await?;
        info!(reference = %data.reference, "paystack transaction initialized");

        Ok(InitializeTransactionResponse {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> PaymentResult<StatusResponse> {
        let data: PaystackVerifyData = self
            .get(&format!("/transaction/verify/{}", reference))
            .await?;

        Ok(StatusResponse {
            status: transaction_state(&data.status),
            transaction_reference: Some(reference.to_string()),
            provider_reference: data.id.map(|id| id.to_string()),
            amount: Some(Money::from_minor_units(data.amount, data.currency)),
            failure_reason: data.gateway_response,
        })
    }

    async fn create_transfer_recipient(
        &self,
        request: TransferRecipientRequest,
    ) -> PaymentResult<String> {
        if request.account_number.trim().is_empty() || request.bank_code.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "account_number and bank_code are required".to_string(),
                field: Some("destination".to_string()),
            });
        }

        let payload = serde_json::json!({
            "type": "nuban",
            "name": request.account_name,
            "account_number": request.account_number,
            "bank_code": request.bank_code,
            "currency": request.currency,
        });

        // Paystack deduplicates recipients by account, so a retried create is harmless
        let raw: PaystackEnvelope<PaystackRecipientData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transferrecipient"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;
        Ok(Self::unwrap_envelope(raw)?.recipient_code)
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferResponse> {
        request.amount.validate_positive("amount")?;

        let payload = serde_json::json!({
            "source": "balance",
            "amount": request.amount.to_minor_units()?,
            "currency": request.amount.currency,
            "recipient": request.recipient_code,
            "reference": request.reference,
            "reason": request.reason,
        });

        let data: PaystackTransferData = self.post_once("/transfer", &payload).await?;
        info!(
            reference = %request.reference,
            status = %data.status,
            "paystack transfer submitted"
        );

        Ok(TransferResponse {
            status: transfer_state(&data.status),
            transfer_code: Some(data.transfer_code),
            provider_reference: data.reference,
            failure_reason: data.failure_reason,
        })
    }

    async fn finalize_transfer_otp(
        &self,
        transfer_code: &str,
        otp: &str,
    ) -> PaymentResult<TransferResponse> {
        let payload = serde_json::json!({
            "transfer_code": transfer_code,
            "otp": otp,
        });

        let data: PaystackTransferData = self
            .post_once("/transfer/finalize_transfer", &payload)
            .await?;

        Ok(TransferResponse {
            status: transfer_state(&data.status),
            transfer_code: Some(data.transfer_code),
            provider_reference: data.reference,
            failure_reason: data.failure_reason,
        })
    }

    async fn verify_transfer(&self, reference: &str) -> PaymentResult<StatusResponse> {
        let data: PaystackTransferData = self
            .get(&format!("/transfer/verify/{}", reference))
            .await?;

        Ok(StatusResponse {
            status: transfer_state(&data.status),
            transaction_reference: Some(reference.to_string()),
            provider_reference: Some(data.transfer_code),
            amount: data
                .amount
                .zip(data.currency)
                .map(|(amount, currency)| Money::from_minor_units(amount, currency)),
            failure_reason: data.failure_reason,
        })
    }

    async fn resolve_bank_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> PaymentResult<String> {
        let data: PaystackResolveData = self
            .get(&format!(
                "/bank/resolve?account_number={}&bank_code={}",
                account_number, bank_code
            ))
            .await?;
        Ok(data.account_name)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        let valid = !secret.is_empty() && verify_hmac_sha512_hex(payload, secret, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid paystack signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data");
        let field = |name: &str| {
            data.and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        };
        let amount = data
            .and_then(|d| d.get("amount"))
            .and_then(|v| v.as_i64())
            .zip(field("currency"))
            .map(|(minor, currency)| Money::from_minor_units(minor, currency));
        let provider_reference = data
            .and_then(|d| d.get("id"))
            .map(|id| match id {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            });

        Ok(WebhookEvent {
            provider: ProviderName::Paystack,
            status: event_state(&event_type),
            event_type,
            transaction_reference: field("reference"),
            provider_reference,
            transfer_code: field("transfer_code"),
            amount,
            failure_reason: field("gateway_response").or_else(|| field("reason")),
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    #[serde(default)]
    id: Option<i64>,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackRecipientData {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct PaystackTransferData {
    transfer_code: String,
    #[serde(default)]
    reference: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackResolveData {
    account_name: String,
}
