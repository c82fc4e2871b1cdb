//! HTTP surface tests. Requests go through the full router with
//! `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;

use common::{dec, Harness, ALICE_WALLET, BOB_WALLET, GOOD_SIGNATURE};
use wallet_backend::database::models::RateSnapshot;
use wallet_backend::database::repository::ExchangeRateRepository;
use wallet_backend::services::payment_orchestrator::{DepositMethod, DepositRequest};
use wallet_backend::services::rate_limiter::RateLimitConfig;

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Response) {
    let response = app.clone().oneshot(request).await.unwrap();
    (response.status(), response)
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn webhook(provider: &str, signature: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", provider))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-paystack-signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ----------------------------------------------------------------------------
// Authentication and envelopes
// ----------------------------------------------------------------------------

#[tokio::test]
async fn api_routes_require_a_valid_token() {
    let h = Harness::new(1000).await;
    let app = h.router();

    let (status, response) = call(&app, get("/api/wallet", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "UNAUTHENTICATED");
    assert_eq!(body["retryable"], false);

    let (status, _) = call(&app, get("/api/wallet", Some("Bearer not.a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wallet_is_returned_in_the_success_envelope() {
    let h = Harness::new(1000).await;
    let app = h.router();
    let auth = h.bearer("alice");

    let (status, response) = call(&app, get("/api/wallet", Some(&auth))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert!(body["timestamp"].is_string());
    assert_eq!(body["data"]["wallet_id"], ALICE_WALLET);
}

#[tokio::test]
async fn health_probes_answer_without_a_token() {
    let h = Harness::new(0).await;
    let app = h.router();

    let (status, _) = call(&app, get("/health/live", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, response) = call(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["checks"].get("store").is_some());
}

// ----------------------------------------------------------------------------
// Send money
// ----------------------------------------------------------------------------

#[tokio::test]
async fn send_money_honours_the_idempotency_header() {
    let h = Harness::new(1000).await;
    let app = h.router();
    let auth = h.bearer("alice");
    let payload = json!({"recipient_wallet_id": BOB_WALLET, "amount": "100", "note": "books"});

    let request = || {
        let mut req = post("/api/wallet/send", Some(&auth), payload.clone());
        req.headers_mut()
            .insert("idempotency-key", "books-1".parse().unwrap());
        req
    };

    let (status, first) = call(&app, request()).await;
    assert_eq!(status, StatusCode::OK);
    let first = json_body(first).await;
    let (_, second) = call(&app, request()).await;
    let second = json_body(second).await;

    assert_eq!(
        first["data"]["transaction_id"],
        second["data"]["transaction_id"]
    );
    assert_eq!(h.balance("alice").await, dec("890"));
    assert_eq!(h.balance("bob").await, dec("100"));
}

#[tokio::test]
async fn send_money_errors_carry_codes_and_statuses() {
    let h = Harness::new(50).await;
    let app = h.router();
    let auth = h.bearer("alice");

    let (status, response) = call(
        &app,
        post(
            "/api/wallet/send",
            Some(&auth),
            json!({"recipient_wallet_id": BOB_WALLET, "amount": "100"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"], "FAILED_PRECONDITION");

    let (status, response) = call(
        &app,
        post(
            "/api/wallet/send",
            Some(&auth),
            json!({"recipient_wallet_id": BOB_WALLET, "amount": "1.005"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "INVALID_ARGUMENT");
}

// ----------------------------------------------------------------------------
// Lookup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn lookup_returns_identity_without_balance() {
    let h = Harness::new(1000).await;
    let app = h.router();
    let auth = h.bearer("bob");

    let (status, response) = call(
        &app,
        get(&format!("/api/wallet/lookup/{}", ALICE_WALLET), Some(&auth)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["display_name"], "Alice Ade");
    assert!(body["data"].get("balance").is_none());
}

#[tokio::test]
async fn lookup_is_rate_limited_per_user() {
    let h = Harness::with_limits(
        1000,
        RateLimitConfig {
            user_limit: 2,
            ..RateLimitConfig::default()
        },
    )
    .await;
    let app = h.router();
    let auth = h.bearer("bob");
    let uri = format!("/api/wallet/lookup/{}", ALICE_WALLET);

    for _ in 0..2 {
        let (status, _) = call(&app, get(&uri, Some(&auth))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, response) = call(&app, get(&uri, Some(&auth))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(json_body(response).await["error"], "RATE_LIMITED");

    // Another user still gets through
    let (status, _) = call(&app, get(&uri, Some(&h.bearer("alice")))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn repeated_misses_lock_out_enumeration() {
    let h = Harness::with_limits(
        1000,
        RateLimitConfig {
            not_found_limit: 3,
            ..RateLimitConfig::default()
        },
    )
    .await;
    let app = h.router();
    let auth = h.bearer("bob");

    for i in 0..3 {
        let (status, _) = call(
            &app,
            get(&format!("/api/wallet/lookup/WMISSING{:03}", i), Some(&auth)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    // Even a real wallet is refused once the miss budget is spent
    let (status, _) = call(
        &app,
        get(&format!("/api/wallet/lookup/{}", ALICE_WALLET), Some(&auth)),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

// ----------------------------------------------------------------------------
// Webhooks
// ----------------------------------------------------------------------------

async fn open_card_deposit(h: &Harness, amount: &str) -> String {
    h.orchestrator
        .initiate_deposit(
            "alice",
            DepositRequest {
                amount: dec(amount),
                method: DepositMethod::Card {
                    email: "alice@example.com".to_string(),
                },
            },
        )
        .await
        .unwrap()
        .operation
        .reference
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let h = Harness::new(0).await;
    let app = h.router();
    let reference = open_card_deposit(&h, "500").await;
    let event = json!({"event": "charge.success", "reference": reference, "status": "success"});

    let (status, _) = call(&app, webhook("paystack", Some("forged"), event.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, webhook("paystack", None, event)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.balance("alice").await, dec("0"));
}

#[tokio::test]
async fn duplicate_webhooks_credit_once() {
    let h = Harness::new(0).await;
    let app = h.router();
    let reference = open_card_deposit(&h, "500").await;
    let event = json!({
        "event": "charge.success",
        "reference": reference,
        "status": "success",
        "amount": "500"
    });

    for _ in 0..3 {
        let (status, response) =
            call(&app, webhook("paystack", Some(GOOD_SIGNATURE), event.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }
    assert_eq!(h.balance("alice").await, dec("500"));
    let history = h.ledger.transactions("alice", None).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn short_paid_webhook_does_not_credit() {
    let h = Harness::new(0).await;
    let app = h.router();
    let reference = open_card_deposit(&h, "500").await;

    let (status, _) = call(
        &app,
        webhook(
            "paystack",
            Some(GOOD_SIGNATURE),
            json!({"event": "charge.success", "reference": reference, "status": "success", "amount": "50"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.balance("alice").await, dec("0"));
}

#[tokio::test]
async fn unknown_references_and_providers() {
    let h = Harness::new(0).await;
    let app = h.router();

    let (status, _) = call(
        &app,
        webhook(
            "paystack",
            Some(GOOD_SIGNATURE),
            json!({"event": "charge.success", "reference": "DEP-nope", "status": "success"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        webhook("stripe", Some(GOOD_SIGNATURE), json!({"event": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_transfer_webhook_refunds_the_payout() {
    let h = Harness::new(1000).await;
    let app = h.router();
    let auth = h.bearer("alice");

    let (status, response) = call(
        &app,
        post(
            "/api/payments/withdrawals",
            Some(&auth),
            json!({
                "amount": "400",
                "destination": {"type": "bank", "account_number": "0123456789", "bank_code": "058"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let reference = json_body(response).await["data"]["reference"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(h.balance("alice").await, dec("600"));

    let event = json!({
        "event": "transfer.failed",
        "reference": reference,
        "status": "failed",
        "reason": "account closed"
    });
    for _ in 0..2 {
        let (status, _) = call(&app, webhook("paystack", Some(GOOD_SIGNATURE), event.clone())).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(h.balance("alice").await, dec("1000"));

    let (status, response) = call(
        &app,
        get(&format!("/api/payments/{}/status", reference), Some(&auth)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "FAILED");
    assert_eq!(body["data"]["refunded"], true);
}

// ----------------------------------------------------------------------------
// QR, KYC and rates
// ----------------------------------------------------------------------------

#[tokio::test]
async fn qr_round_trip_over_http() {
    let h = Harness::new(1000).await;
    let app = h.router();

    let (status, response) = call(
        &app,
        post(
            "/api/qr/sign",
            Some(&h.bearer("bob")),
            json!({"wallet_id": BOB_WALLET, "amount": "20.00", "note": "suya"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let signed = json_body(response).await["data"].clone();

    let (status, response) = call(&app, post("/api/qr/verify", Some(&h.bearer("alice")), signed.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["wallet_id"], BOB_WALLET);
    assert!(body["data"].get("balance").is_none());

    let mut tampered = signed;
    tampered["payload"]["amount"] = json!("2000.00");
    let (status, _) = call(&app, post("/api/qr/verify", Some(&h.bearer("alice")), tampered)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn kyc_update_without_provider_is_reported() {
    let h = Harness::new(0).await;
    let app = h.router();

    let (status, _) = call(
        &app,
        post("/api/kyc/verification", Some(&h.bearer("alice")), json!({"job_id": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rates_are_served_from_the_stored_snapshot() {
    let h = Harness::new(0).await;
    let app = h.router();

    let (status, _) = call(&app, get("/api/rates", Some(&h.bearer("alice")))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let mut rates = HashMap::new();
    rates.insert("NGN".to_string(), dec("1550"));
    h.store
        .replace_rates(&RateSnapshot {
            base: "USD".to_string(),
            rates,
            refreshed_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let (status, response) = call(&app, get("/api/rates", Some(&h.bearer("alice")))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.headers().contains_key(header::CACHE_CONTROL));
    let body = json_body(response).await;
    assert_eq!(body["data"]["base"], "USD");
}
