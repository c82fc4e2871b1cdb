use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Paystack,
    Momo,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Paystack => "paystack",
            ProviderName::Momo => "momo",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paystack" => Ok(ProviderName::Paystack),
            "momo" | "mtn-momo" | "mobile_money" => Ok(ProviderName::Momo),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount in the currency's minor unit (kobo, pesewas, cents)
    pub fn to_minor_units(&self) -> Result<i64, PaymentError> {
        let minor = (&self.amount * BigDecimal::from(100)).with_scale(0);
        if minor != &self.amount * BigDecimal::from(100) {
            return Err(PaymentError::ValidationError {
                message: format!("amount {} has more than two decimal places", self.amount),
                field: Some("amount".to_string()),
            });
        }
        minor.to_i64().ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount {} is out of range", self.amount),
            field: Some("amount".to_string()),
        })
    }

    pub fn from_minor_units(minor: i64, currency: impl Into<String>) -> Self {
        Self::new(BigDecimal::from(minor) / BigDecimal::from(100), currency)
    }
}

/// Gateway-side view of a payment or transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Processing,
    OtpRequired,
    Success,
    Failed,
    Cancelled,
    Reversed,
    Unknown,
}

impl PaymentState {
    /// A state the ledger may settle on. Anything else keeps the operation open.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            PaymentState::Success
                | PaymentState::Failed
                | PaymentState::Cancelled
                | PaymentState::Reversed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PaymentState::Success)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeTransactionRequest {
    pub email: String,
    pub amount: Money,
    pub reference: String,
    pub callback_url: Option<String>,
    pub channels: Option<Vec<String>>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeTransactionResponse {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecipientRequest {
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient_code: String,
    pub amount: Money,
    pub reference: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub status: PaymentState,
    pub transfer_code: Option<String>,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MobileMoneyFlow {
    Collection,
    Disbursement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileMoneyRequest {
    pub amount: Money,
    pub phone_number: String,
    pub external_id: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: PaymentState,
    pub transaction_reference: Option<String>,
    pub provider_reference: Option<String>,
    pub amount: Option<Money>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_type: String,
    pub transaction_reference: Option<String>,
    pub provider_reference: Option<String>,
    pub transfer_code: Option<String>,
    pub status: Option<PaymentState>,
    pub amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub payload: JsonValue,
    pub received_at: String,
}
