use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::exchange_rate::ExchangeRateError;

/// GET /api/rates
///
/// Serves the last refreshed table. Clients may cache it briefly since the
/// table only moves when the refresh worker runs.
pub async fn get_rates(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .rates
        .current_snapshot()
        .await?
        .ok_or(ExchangeRateError::NoProviderAvailable)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=60"),
    );
    if let Ok(value) = HeaderValue::from_str(
        &snapshot
            .refreshed_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    ) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    Ok((headers, success_response(snapshot)))
}
