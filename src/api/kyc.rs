use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::error::success_response;

#[derive(Debug, Deserialize)]
pub struct KycStatusRequest {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PhoneVerificationRequest {
    pub phone_number: String,
    pub country: String,
    #[serde(default)]
    pub match_fields: Option<Value>,
}

/// POST /api/kyc/verification
pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<KycStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = state.kyc.update_kyc_status(&user.user_id, &request.job_id).await?;
    Ok(success_response(update))
}

/// POST /api/kyc/phone
pub async fn verify_phone(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(request): Json<PhoneVerificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let match_fields = request.match_fields.unwrap_or(Value::Object(Default::default()));
    let verification = state
        .kyc
        .verify_phone_number(&request.phone_number, &request.country, &match_fields)
        .await?;
    Ok(success_response(verification))
}
