use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::MobileMoneyGateway;
use crate::payments::types::{
    MobileMoneyFlow, MobileMoneyRequest, Money, PaymentState, ProviderName, StatusResponse,
    WebhookEvent, WebhookVerificationResult,
};
use crate::payments::utils::{attribute_to, verify_hmac_sha256_hex, PaymentHttpClient};
use async_trait::async_trait;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const PROVIDER: &str = "momo";

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub base_url: String,
    pub api_user: String,
    pub api_key: String,
    pub collection_subscription_key: String,
    pub disbursement_subscription_key: String,
    pub target_environment: String,
    pub callback_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            api_user: String::new(),
            api_key: String::new(),
            collection_subscription_key: String::new(),
            disbursement_subscription_key: String::new(),
            target_environment: "sandbox".to_string(),
            callback_url: None,
            webhook_secret: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl MomoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PaymentError::ValidationError {
                    message: format!("{} environment variable is required", name),
                    field: Some(name.to_string()),
                })
        };

        Ok(Self {
            base_url: std::env::var("MOMO_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.momodeveloper.mtn.com".to_string()),
            api_user: required("MOMO_API_USER")?,
            api_key: required("MOMO_API_KEY")?,
            collection_subscription_key: required("MOMO_COLLECTION_SUBSCRIPTION_KEY")?,
            disbursement_subscription_key: required("MOMO_DISBURSEMENT_SUBSCRIPTION_KEY")?,
            target_environment: std::env::var("MOMO_TARGET_ENVIRONMENT")
                .unwrap_or_else(|_| "sandbox".to_string()),
            callback_url: std::env::var("MOMO_CALLBACK_URL").ok(),
            webhook_secret: std::env::var("MOMO_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("MOMO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MOMO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MomoProvider {
    config: MomoConfig,
    http: PaymentHttpClient,
    collection_token: RwLock<Option<CachedToken>>,
    disbursement_token: RwLock<Option<CachedToken>>,
}

impl MomoProvider {
    pub fn new(config: MomoConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            collection_token: RwLock::new(None),
            disbursement_token: RwLock::new(None),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MomoConfig::from_env()?)
    }

    fn product(flow: MobileMoneyFlow) -> &'static str {
        match flow {
            MobileMoneyFlow::Collection => "collection",
            MobileMoneyFlow::Disbursement => "disbursement",
        }
    }

    fn subscription_key(&self, flow: MobileMoneyFlow) -> &str {
        match flow {
            MobileMoneyFlow::Collection => &self.config.collection_subscription_key,
            MobileMoneyFlow::Disbursement => &self.config.disbursement_subscription_key,
        }
    }

    fn token_slot(&self, flow: MobileMoneyFlow) -> &RwLock<Option<CachedToken>> {
        match flow {
            MobileMoneyFlow::Collection => &self.collection_token,
            MobileMoneyFlow::Disbursement => &self.disbursement_token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self, flow: MobileMoneyFlow) -> PaymentResult<String> {
        let slot = self.token_slot(flow);
        if let Some(token) = slot.read().await.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let mut guard = slot.write().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.config.api_user, self.config.api_key));
        let basic = format!("Basic {}", credentials);
        let token: MomoTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/{}/token/", Self::product(flow))),
                None,
                None,
                &[
                    ("Authorization", basic.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.subscription_key(flow)),
                ],
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;

        debug!(product = Self::product(flow), "momo access token refreshed");
        // Refresh a minute early so in-flight calls never carry an expired token
        let lifetime = token.expires_in.saturating_sub(60) as i64;
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        });
        Ok(token.access_token)
    }

    async fn submit(
        &self,
        flow: MobileMoneyFlow,
        path: &str,
        party_field: &str,
        request: &MobileMoneyRequest,
    ) -> PaymentResult<PaymentState> {
        request.amount.validate_positive("amount")?;
        let reference_id = reference_id(&request.external_id)?;
        let token = self.access_token(flow).await?;

        let mut payload = serde_json::json!({
            "amount": request.amount.amount.with_scale(2).to_string(),
            "currency": request.amount.currency,
            "externalId": request.external_id,
            "payerMessage": request.note.clone().unwrap_or_default(),
            "payeeNote": request.note.clone().unwrap_or_default(),
        });
        payload[party_field] = serde_json::json!({
            "partyIdType": "MSISDN",
            "partyId": request.phone_number,
        });

        let reference_header = reference_id.to_string();
        let mut headers = vec![
            ("X-Reference-Id", reference_header.as_str()),
            ("X-Target-Environment", self.config.target_environment.as_str()),
            ("Ocp-Apim-Subscription-Key", self.subscription_key(flow)),
            ("Content-Type", "application/json"),
        ];
        if let Some(callback) = self.config.callback_url.as_deref() {
            headers.push(("X-Callback-Url", callback));
        }

        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&token),
                Some(&payload),
                &headers,
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;

        info!(
            external_id = %request.external_id,
            product = Self::product(flow),
            "momo request accepted"
        );
        Ok(PaymentState::Pending)
    }
}

/// The network keys requests by a UUID. Our references are `PREFIX-{uuid}`.
fn reference_id(external_id: &str) -> PaymentResult<Uuid> {
    if let Ok(id) = Uuid::parse_str(external_id) {
        return Ok(id);
    }
    external_id
        .split_once('-')
        .and_then(|(_, rest)| Uuid::parse_str(rest).ok())
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("external id '{}' does not embed a UUID", external_id),
            field: Some("external_id".to_string()),
        })
}

fn momo_state(status: &str) -> PaymentState {
    match status.to_uppercase().as_str() {
        "SUCCESSFUL" => PaymentState::Success,
        "FAILED" => PaymentState::Failed,
        "REJECTED" | "TIMEOUT" => PaymentState::Cancelled,
        "PENDING" | "ONGOING" => PaymentState::Pending,
        _ => PaymentState::Unknown,
    }
}

fn reason_text(reason: &Option<JsonValue>) -> Option<String> {
    match reason {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Object(map)) => map
            .get("message")
            .or_else(|| map.get("code"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()),
        _ => None,
    }
}

fn parse_amount(amount: &Option<String>, currency: &Option<String>) -> Option<Money> {
    let amount = BigDecimal::from_str(amount.as_deref()?).ok()?;
    Some(Money::new(amount, currency.clone()?))
}

#[async_trait]
impl MobileMoneyGateway for MomoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Momo
    }

    async fn request_to_pay(&self, request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
        self.submit(
            MobileMoneyFlow::Collection,
            "/collection/v1_0/requesttopay",
            "payer",
            &request,
        )
        .await
    }

    async fn transfer(&self, request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
        self.submit(
            MobileMoneyFlow::Disbursement,
            "/disbursement/v1_0/transfer",
            "payee",
            &request,
        )
        .await
    }

    async fn check_status(
        &self,
        external_id: &str,
        flow: MobileMoneyFlow,
    ) -> PaymentResult<StatusResponse> {
        let reference_id = reference_id(external_id)?;
        let token = self.access_token(flow).await?;
        let path = match flow {
            MobileMoneyFlow::Collection => format!("/collection/v1_0/requesttopay/{}", reference_id),
            MobileMoneyFlow::Disbursement => format!("/disbursement/v1_0/transfer/{}", reference_id),
        };

        let data: MomoStatusData = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&path),
                Some(&token),
                None,
                &[
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.subscription_key(flow)),
                ],
            )
            .await
            .map_err(|e| attribute_to(e, PROVIDER))?;

        Ok(StatusResponse {
            status: momo_state(&data.status),
            transaction_reference: Some(external_id.to_string()),
            provider_reference: data.financial_transaction_id,
            amount: parse_amount(&data.amount, &data.currency),
            failure_reason: reason_text(&data.reason),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Ok(WebhookVerificationResult {
                valid: false,
                reason: Some("momo webhook secret not configured".to_string()),
            });
        };
        let valid = verify_hmac_sha256_hex(payload, secret, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid momo signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;
        let data: MomoCallback = serde_json::from_value(parsed.clone()).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("unexpected momo callback shape: {}", e),
            }
        })?;

        Ok(WebhookEvent {
            provider: ProviderName::Momo,
            event_type: format!("momo.{}", data.status.to_lowercase()),
            status: Some(momo_state(&data.status)),
            transaction_reference: Some(data.external_id),
            provider_reference: data.network_reference.or(data.financial_transaction_id),
            transfer_code: None,
            amount: parse_amount(&data.amount, &data.currency),
            failure_reason: reason_text(&data.reason),
            payload: parsed,
            received_at: Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MomoTokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoStatusData {
    status: String,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    financial_transaction_id: Option<String>,
    #[serde(default)]
    reason: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCallback {
    external_id: String,
    status: String,
    #[serde(default)]
    network_reference: Option<String>,
    #[serde(default)]
    financial_transaction_id: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    reason: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::hmac_sha256_hex;

    fn provider(secret: Option<&str>) -> MomoProvider {
        MomoProvider::new(MomoConfig {
            api_user: "user".to_string(),
            api_key: "key".to_string(),
            collection_subscription_key: "col".to_string(),
            disbursement_subscription_key: "dis".to_string(),
            webhook_secret: secret.map(|s| s.to_string()),
            ..MomoConfig::default()
        })
        .expect("provider init should succeed")
    }

    #[test]
    fn reference_id_is_taken_from_prefixed_reference() {
        let id = Uuid::new_v4();
        assert_eq!(reference_id(&format!("DEP-{}", id)).unwrap(), id);
        assert_eq!(reference_id(&id.to_string()).unwrap(), id);
        assert!(reference_id("DEP-not-a-uuid").is_err());
        assert!(reference_id("plain").is_err());
    }

    #[test]
    fn callback_is_parsed_into_event() {
        let payload = br#"{
            "externalId": "DEP-6a2f41a3-c54c-4b6a-8a3a-6d1a5a5bfe11",
            "status": "SUCCESSFUL",
            "networkReference": "NET-42",
            "amount": "500",
            "currency": "GHS"
        }"#;
        let event = provider(None).parse_webhook_event(payload).unwrap();
        assert_eq!(event.status, Some(PaymentState::Success));
        assert_eq!(event.provider_reference.as_deref(), Some("NET-42"));
        assert_eq!(
            event.transaction_reference.as_deref(),
            Some("DEP-6a2f41a3-c54c-4b6a-8a3a-6d1a5a5bfe11")
        );
        assert_eq!(event.amount.unwrap().amount, BigDecimal::from(500));
    }

    #[test]
    fn failed_callback_reason_object_is_flattened() {
        let payload = br#"{"externalId":"WD-x","status":"FAILED","reason":{"code":"PAYEE_NOT_FOUND","message":"Payee not found"}}"#;
        let event = provider(None).parse_webhook_event(payload).unwrap();
        assert_eq!(event.status, Some(PaymentState::Failed));
        assert_eq!(event.failure_reason.as_deref(), Some("Payee not found"));
    }

    #[test]
    fn webhook_requires_configured_secret() {
        let payload = br#"{"externalId":"x","status":"SUCCESSFUL"}"#;
        let unsigned = provider(None).verify_webhook(payload, "anything").unwrap();
        assert!(!unsigned.valid);

        let signed = provider(Some("momo-secret"));
        let signature = hmac_sha256_hex(b"momo-secret", payload);
        assert!(signed.verify_webhook(payload, &signature).unwrap().valid);
        assert!(!signed.verify_webhook(payload, "deadbeef").unwrap().valid);
    }

    #[test]
    fn network_statuses_map_to_gateway_states() {
        assert_eq!(momo_state("SUCCESSFUL"), PaymentState::Success);
        assert_eq!(momo_state("pending"), PaymentState::Pending);
        assert_eq!(momo_state("REJECTED"), PaymentState::Cancelled);
        assert_eq!(momo_state("???"), PaymentState::Unknown);
    }
}
