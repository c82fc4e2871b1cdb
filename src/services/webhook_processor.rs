use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, AuthError};
use crate::payments::factory::PaymentGateways;
use crate::payments::types::{PaymentState, ProviderName, WebhookEvent};
use crate::services::reconciliation::{GatewayUpdate, ReconciliationOutcome, ReconciliationService};

/// Header carrying the card processor's HMAC-SHA512 of the raw body
pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";
/// Header carrying the mobile-money HMAC-SHA256 of the raw body
pub const MOMO_SIGNATURE_HEADER: &str = "x-momo-signature";

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature => {
                AppError::new(AppErrorKind::Authentication(AuthError::InvalidToken {
                    reason: "webhook signature mismatch".to_string(),
                }))
            }
            WebhookProcessorError::UnknownProvider(provider) => {
                AppError::invalid_field("provider", format!("unsupported provider {}", provider))
            }
            WebhookProcessorError::MalformedPayload(reason) => {
                AppError::invalid_field("payload", reason)
            }
            WebhookProcessorError::ProcessingError(message) => AppError::internal(message),
        }
    }
}

/// Result of one delivery, always acknowledged to the gateway
#[derive(Debug, Clone)]
pub struct WebhookAck {
    pub provider: ProviderName,
    pub event_type: String,
    pub outcome: ReconciliationOutcome,
}

pub struct WebhookProcessor {
    gateways: PaymentGateways,
    reconciler: Arc<ReconciliationService>,
}

impl WebhookProcessor {
    pub fn new(gateways: PaymentGateways, reconciler: Arc<ReconciliationService>) -> Self {
        Self {
            gateways,
            reconciler,
        }
    }

    /// Signature header expected for a provider path segment
    pub fn signature_header(provider: ProviderName) -> &'static str {
        match provider {
            ProviderName::Paystack => PAYSTACK_SIGNATURE_HEADER,
            ProviderName::Momo => MOMO_SIGNATURE_HEADER,
        }
    }

    /// Verifies the signature over the raw body, parses the event and applies
    /// it. Storage failures come back as `Err(AppError)` so the gateway retries.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookAck, AppError> {
        let provider: ProviderName = provider_name
            .parse()
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WebhookProcessorError::InvalidSignature)?;

        let event = self.verify_and_parse(provider, signature, payload)?;
        info!(
            provider = %provider,
            event_type = %event.event_type,
            reference = ?event.transaction_reference,
            "webhook received"
        );

        let outcome = match event_update(&event) {
            Some(update) => self.reconciler.apply(update).await.map_err(|e| {
                error!(provider = %provider, error = %e, "webhook could not be applied");
                e
            })?,
            None => ReconciliationOutcome::Ignored {
                reason: format!("event {} carries no status", event.event_type),
            },
        };

        if let ReconciliationOutcome::Ignored { reason } = &outcome {
            info!(provider = %provider, reason = %reason, "webhook ignored");
        }
        Ok(WebhookAck {
            provider,
            event_type: event.event_type,
            outcome,
        })
    }

    fn verify_and_parse(
        &self,
        provider: ProviderName,
        signature: &str,
        payload: &[u8],
    ) -> Result<WebhookEvent, WebhookProcessorError> {
        let (verification, parsed) = match provider {
            ProviderName::Paystack => {
                let gateway = self.gateways.card().map_err(|_| disabled(provider))?;
                (
                    gateway.verify_webhook(payload, signature),
                    gateway.parse_webhook_event(payload),
                )
            }
            ProviderName::Momo => {
                let gateway = self.gateways.mobile_money().map_err(|_| disabled(provider))?;
                (
                    gateway.verify_webhook(payload, signature),
                    gateway.parse_webhook_event(payload),
                )
            }
        };

        let verification = verification.map_err(|e| {
            warn!(provider = %provider, error = %e, "webhook verification unavailable");
            WebhookProcessorError::InvalidSignature
        })?;
        if !verification.valid {
            warn!(
                provider = %provider,
                reason = ?verification.reason,
                "rejected webhook with bad signature"
            );
            return Err(WebhookProcessorError::InvalidSignature);
        }

        parsed.map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))
    }
}

/// A provider that is not configured is treated like an unknown one
fn disabled(provider: ProviderName) -> WebhookProcessorError {
    WebhookProcessorError::UnknownProvider(provider.to_string())
}

fn event_update(event: &WebhookEvent) -> Option<GatewayUpdate> {
    let status = event.status?;
    if event.transaction_reference.is_none() && event.transfer_code.is_none() {
        return None;
    }
    Some(GatewayUpdate {
        reference: event.transaction_reference.clone(),
        transfer_code: event.transfer_code.clone(),
        status,
        gateway_reference: event.provider_reference.clone(),
        failure_reason: event.failure_reason.clone(),
        amount: match status {
            PaymentState::Success => event.amount.clone(),
            _ => None,
        },
        metadata: Some(event.payload.clone()),
    })
}

/// True when the error should make the gateway redeliver
pub fn should_retry(err: &AppError) -> bool {
    matches!(err.kind, AppErrorKind::Infrastructure(_)) || err.status_code() >= 500
}
