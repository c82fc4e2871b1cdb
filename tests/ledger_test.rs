//! Wallet-to-wallet transfers against the in-memory store

mod common;

use bigdecimal::BigDecimal;
use futures::future::join_all;

use common::{dec, Harness, ALICE_WALLET, BOB_WALLET};
use wallet_backend::database::models::{KycStatus, TransactionKind, User};
use wallet_backend::error::ErrorCode;
use wallet_backend::services::ledger::SendMoneyRequest;

fn send(amount: &str, key: Option<&str>) -> SendMoneyRequest {
    SendMoneyRequest {
        recipient_wallet_id: BOB_WALLET.to_string(),
        amount: dec(amount),
        note: Some("rent".to_string()),
        idempotency_key: key.map(str::to_string),
    }
}

#[tokio::test]
async fn transfer_moves_amount_and_charges_fee_once() {
    let h = Harness::new(1000).await;

    let receipt = h.ledger.send_money("alice", send("100", None)).await.unwrap();

    assert_eq!(receipt.fee, dec("10.00"));
    assert_eq!(receipt.new_balance, dec("890"));
    assert_eq!(h.balance("alice").await, dec("890"));
    assert_eq!(h.balance("bob").await, dec("100"));

    let summary = h.ledger.fee_ledger_summary().await.unwrap();
    assert_eq!(summary.event_count, 1);
    assert_eq!(summary.buckets.get("NGN"), Some(&dec("10")));
    // No rate snapshot yet, so the fee is valued at 1:1
    assert_eq!(summary.total_usd, dec("10"));
}

#[tokio::test]
async fn both_sides_get_a_record_with_the_same_id() {
    let h = Harness::new(1000).await;
    let receipt = h.ledger.send_money("alice", send("250", None)).await.unwrap();

    let sent = h.ledger.transactions("alice", None).await.unwrap();
    let received = h.ledger.transactions("bob", None).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(received.len(), 1);
    assert_eq!(sent[0].kind, TransactionKind::Send);
    assert_eq!(received[0].kind, TransactionKind::Receive);
    assert_eq!(sent[0].transaction_id, receipt.transaction_id);
    assert_eq!(received[0].transaction_id, receipt.transaction_id);
    assert_eq!(received[0].fee, BigDecimal::from(0));
}

#[tokio::test]
async fn insufficient_balance_changes_nothing() {
    let h = Harness::new(105).await;

    // 100 + fee 10 is over 105
    let err = h.ledger.send_money("alice", send("100", None)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
    assert_eq!(err.status_code(), 422);

    assert_eq!(h.balance("alice").await, dec("105"));
    assert_eq!(h.balance("bob").await, dec("0"));
    assert!(h.ledger.transactions("alice", None).await.unwrap().is_empty());
    assert_eq!(h.ledger.fee_ledger_summary().await.unwrap().event_count, 0);
}

#[tokio::test]
async fn sending_to_your_own_wallet_is_refused() {
    let h = Harness::new(1000).await;
    let mut request = send("100", None);
    request.recipient_wallet_id = ALICE_WALLET.to_string();

    let err = h.ledger.send_money("alice", request).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
    assert_eq!(h.balance("alice").await, dec("1000"));
}

#[tokio::test]
async fn unverified_sender_is_blocked() {
    let h = Harness::new(1000).await;
    h.store
        .seed_user(User::new("alice", None).with_kyc_status(KycStatus::Pending))
        .await;

    let err = h.ledger.send_money("alice", send("100", None)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::KycRequired);
    assert_eq!(err.status_code(), 403);
    assert_eq!(h.balance("alice").await, dec("1000"));
}

#[tokio::test]
async fn repeated_idempotency_key_returns_the_first_receipt() {
    let h = Harness::new(1000).await;

    let first = h
        .ledger
        .send_money("alice", send("100", Some("order-77")))
        .await
        .unwrap();
    let second = h
        .ledger
        .send_money("alice", send("100", Some("order-77")))
        .await
        .unwrap();

    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(h.balance("alice").await, dec("890"));
    assert_eq!(h.balance("bob").await, dec("100"));
    assert_eq!(h.ledger.fee_ledger_summary().await.unwrap().event_count, 1);
}

#[tokio::test]
async fn idempotency_keys_are_scoped_per_sender() {
    let h = Harness::new(1000).await;
    h.ledger
        .send_money("alice", send("300", Some("shared")))
        .await
        .unwrap();

    let mut back = send("100", Some("shared"));
    back.recipient_wallet_id = ALICE_WALLET.to_string();
    h.ledger.send_money("bob", back).await.unwrap();

    assert_eq!(h.balance("bob").await, dec("190"));
}

#[tokio::test]
async fn concurrent_sends_never_overdraw() {
    let h = Harness::new(1000).await;

    // Each send costs 110; only nine fit
    let attempts = (0..10).map(|_| h.ledger.send_money("alice", send("100", None)));
    let results = join_all(attempts).await;

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 9);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.status_code(), 422);
    }

    let alice = h.balance("alice").await;
    let bob = h.balance("bob").await;
    let fees = h.ledger.fee_ledger_summary().await.unwrap();
    assert!(alice >= BigDecimal::from(0));
    assert_eq!(alice, dec("10"));
    // Money is conserved: balances plus fees equal the starting total
    assert_eq!(
        &alice + &bob + fees.buckets.get("NGN").cloned().unwrap_or_default(),
        dec("1000")
    );
}

#[tokio::test]
async fn concurrent_retries_with_one_key_commit_once() {
    let h = Harness::new(1000).await;

    let attempts = (0..5).map(|_| h.ledger.send_money("alice", send("200", Some("double-tap"))));
    let results = join_all(attempts).await;

    let ids: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().transaction_id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.balance("alice").await, dec("790"));
    assert_eq!(h.balance("bob").await, dec("200"));
}
