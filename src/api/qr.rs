use axum::{extract::State, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::error::success_response;
use crate::services::qr_signer::SignedQrPayload;

#[derive(Debug, Deserialize)]
pub struct SignQrRequest {
    pub wallet_id: String,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /api/qr/sign
pub async fn sign_payload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<SignQrRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed = state
        .qr
        .sign(&user.user_id, &request.wallet_id, request.amount, request.note)
        .await?;
    Ok(success_response(signed))
}

/// POST /api/qr/verify
pub async fn verify_payload(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(request): Json<SignedQrPayload>,
) -> Result<impl IntoResponse, AppError> {
    let recipient = state.qr.verify(&request.payload, &request.signature).await?;
    Ok(success_response(recipient))
}
