use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::wallet::attach;
use super::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::error::{get_request_id_from_headers, success_response};
use crate::services::payment_orchestrator::{DepositRequest, WithdrawalRequest};

#[derive(Debug, Deserialize)]
pub struct FinalizeTransferRequest {
    pub transfer_code: String,
    pub otp: String,
}

/// POST /api/payments/withdrawals
pub async fn initiate_withdrawal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<WithdrawalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let operation = state
        .orchestrator
        .initiate_withdrawal(&user.user_id, request)
        .await
        .map_err(|e| attach(e, get_request_id_from_headers(&headers)))?;
    Ok((StatusCode::ACCEPTED, success_response(operation)))
}

/// POST /api/payments/withdrawals/finalize
pub async fn finalize_transfer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<FinalizeTransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let operation = state
        .orchestrator
        .finalize_transfer(&user.user_id, &request.transfer_code, &request.otp)
        .await
        .map_err(|e| attach(e, get_request_id_from_headers(&headers)))?;
    Ok(success_response(operation))
}

/// POST /api/payments/deposits
pub async fn initiate_deposit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<DepositRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .orchestrator
        .initiate_deposit(&user.user_id, request)
        .await
        .map_err(|e| attach(e, get_request_id_from_headers(&headers)))?;
    Ok((StatusCode::CREATED, success_response(receipt)))
}

/// GET /api/payments/{reference}/status
pub async fn check_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let operation = state
        .orchestrator
        .check_external_status(&user.user_id, &reference)
        .await?;
    Ok(success_response(operation))
}
