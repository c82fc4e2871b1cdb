use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use super::AppState;
use crate::payments::types::ProviderName;
use crate::services::webhook_processor::{should_retry, WebhookProcessor};

/// POST /webhooks/{provider}
///
/// Answers 200 for processed, already-processed and unknown-reference
/// deliveries, 401 for bad signatures and 500 when storage fails so the
/// gateway redelivers.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = provider
        .parse::<ProviderName>()
        .ok()
        .and_then(|p| headers.get(WebhookProcessor::signature_header(p)))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match state
        .webhooks
        .process_webhook(&provider, signature.as_deref(), &body)
        .await
    {
        Ok(ack) => {
            info!(
                provider = %ack.provider,
                event_type = %ack.event_type,
                "webhook acknowledged"
            );
            (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
        }
        Err(e) if should_retry(&e) => {
            error!(provider = %provider, error = %e, "webhook processing failed, asking for redelivery");
            e.into_response()
        }
        Err(e) => {
            warn!(provider = %provider, error = %e, "webhook rejected");
            e.into_response()
        }
    }
}
