use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::error::{get_request_id_from_headers, success_response};
use crate::services::ledger::SendMoneyRequest;
use crate::services::wallet_lookup::client_ip;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// POST /api/wallet/send
pub async fn send_money(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(mut request): Json<SendMoneyRequest>,
) -> Result<impl IntoResponse, AppError> {
    // The body field wins over the header when both are present
    if request.idempotency_key.is_none() {
        request.idempotency_key = headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    let request_id = get_request_id_from_headers(&headers);

    let receipt = state
        .ledger
        .send_money(&user.user_id, request)
        .await
        .map_err(|e| attach(e, request_id))?;
    info!(user_id = %user.user_id, transaction_id = %receipt.transaction_id, "send money request served");
    Ok(success_response(receipt))
}

/// GET /api/wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.ledger.own_wallet(&user.user_id).await?;
    Ok(success_response(wallet))
}

/// GET /api/wallet/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let records = state.ledger.transactions(&user.user_id, query.limit).await?;
    Ok(success_response(records))
}

/// GET /api/wallet/lookup/{wallet_id}
pub async fn lookup_wallet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(wallet_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let identity = state
        .lookup
        .lookup(&user.user_id, &client_ip(&headers), &wallet_id)
        .await
        .map_err(|e| attach(e, get_request_id_from_headers(&headers)))?;
    Ok(success_response(identity))
}

pub(crate) fn attach(error: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}
