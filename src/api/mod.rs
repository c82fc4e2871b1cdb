//! HTTP surface. Wallet, payment, QR and KYC routes take a bearer token;
//! webhooks are authenticated by their body signature instead. Rates and
//! health probes are public.

pub mod kyc;
pub mod payments;
pub mod qr;
pub mod rates;
pub mod wallet;
pub mod webhooks;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::health::{HealthChecker, HealthState};
use crate::middleware::auth::TokenVerifier;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{
    ExchangeRateService, KycGate, LedgerService, PaymentOrchestrator, QrService,
    WalletLookupService, WebhookProcessor,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub qr: Arc<QrService>,
    pub lookup: Arc<WalletLookupService>,
    pub kyc: Arc<KycGate>,
    pub rates: Arc<ExchangeRateService>,
    pub verifier: Arc<TokenVerifier>,
    pub health: HealthChecker,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/send", post(wallet::send_money))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/lookup/{wallet_id}", get(wallet::lookup_wallet))
        .route("/payments/withdrawals", post(payments::initiate_withdrawal))
        .route(
            "/payments/withdrawals/finalize",
            post(payments::finalize_transfer),
        )
        .route("/payments/deposits", post(payments::initiate_deposit))
        .route("/payments/{reference}/status", get(payments::check_status))
        .route("/qr/sign", post(qr::sign_payload))
        .route("/qr/verify", post(qr::verify_payload))
        .route("/kyc/verification", post(kyc::update_status))
        .route("/kyc/phone", post(kyc::verify_phone))
        .route("/rates", get(rates::get_rates));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(status))
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    if status.status == HealthState::Unhealthy {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "checks": status.checks })),
        )
    } else {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    }
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
