use crate::payments::error::PaymentResult;
use crate::payments::types::{
    InitializeTransactionRequest, InitializeTransactionResponse, MobileMoneyFlow,
    MobileMoneyRequest, PaymentState, ProviderName, StatusResponse, TransferRecipientRequest,
    TransferRequest, TransferResponse, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;

/// Card and bank processor: hosted checkout for collections, recipient-based
/// transfers for payouts.
#[async_trait]
pub trait CardGateway: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn initialize_transaction(
        &self,
        request: InitializeTransactionRequest,
    ) -> PaymentResult<InitializeTransactionResponse>;

    async fn verify_transaction(&self, reference: &str) -> PaymentResult<StatusResponse>;

    /// Registers the payout destination. No funds move.
    async fn create_transfer_recipient(
        &self,
        request: TransferRecipientRequest,
    ) -> PaymentResult<String>;

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferResponse>;

    async fn finalize_transfer_otp(
        &self,
        transfer_code: &str,
        otp: &str,
    ) -> PaymentResult<TransferResponse>;

    async fn verify_transfer(&self, reference: &str) -> PaymentResult<StatusResponse>;

    /// Account holder name for an account number at a bank.
    async fn resolve_bank_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> PaymentResult<String>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

/// Mobile-money network: request-to-pay collections and disbursements, both
/// acknowledged asynchronously.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn request_to_pay(&self, request: MobileMoneyRequest) -> PaymentResult<PaymentState>;

    async fn transfer(&self, request: MobileMoneyRequest) -> PaymentResult<PaymentState>;

    async fn check_status(
        &self,
        external_id: &str,
        flow: MobileMoneyFlow,
    ) -> PaymentResult<StatusResponse>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::Money;
    use bigdecimal::BigDecimal;

    struct AcceptingMobileMoney;

    #[async_trait]
    impl MobileMoneyGateway for AcceptingMobileMoney {
        fn name(&self) -> ProviderName {
            ProviderName::Momo
        }

        async fn request_to_pay(&self, _request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
            Ok(PaymentState::Pending)
        }

        async fn transfer(&self, _request: MobileMoneyRequest) -> PaymentResult<PaymentState> {
            Ok(PaymentState::Processing)
        }

        async fn check_status(
            &self,
            external_id: &str,
            _flow: MobileMoneyFlow,
        ) -> PaymentResult<StatusResponse> {
            Ok(StatusResponse {
                status: PaymentState::Success,
                transaction_reference: Some(external_id.to_string()),
                provider_reference: Some("net-1".to_string()),
                amount: None,
                failure_reason: None,
            })
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Ok(WebhookEvent {
                provider: ProviderName::Momo,
                event_type: "mock".to_string(),
                transaction_reference: None,
                provider_reference: None,
                transfer_code: None,
                status: Some(PaymentState::Success),
                amount: None,
                failure_reason: None,
                payload: serde_json::json!({}),
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }
    }

    #[tokio::test]
    async fn trait_objects_dispatch_to_mock_gateway() {
        let gateway: Box<dyn MobileMoneyGateway> = Box::new(AcceptingMobileMoney);
        let state = gateway
            .request_to_pay(MobileMoneyRequest {
                amount: Money::new(BigDecimal::from(500), "GHS"),
                phone_number: "233240000000".to_string(),
                external_id: "DEP-1".to_string(),
                note: None,
            })
            .await
            .expect("request to pay should be accepted");
        assert_eq!(state, PaymentState::Pending);

        let status = gateway
            .check_status("DEP-1", MobileMoneyFlow::Collection)
            .await
            .expect("status query should succeed");
        assert!(status.status.is_definitive());
    }
}
