//! Error handling for the wallet backend
//!
//! This module provides a unified error system with HTTP status mapping,
//! user-facing messages, and stable error codes the mobile client switches on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "KYC_REQUIRED")]
    KycRequired,
    #[serde(rename = "INVALID_ARGUMENT")]
    InvalidArgument,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "FAILED_PRECONDITION")]
    FailedPrecondition,
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::KycRequired => "KYC_REQUIRED",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::GatewayUnavailable => "GATEWAY_UNAVAILABLE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Business rule violations raised by the ledger, orchestrator and gates
#[derive(Debug, Clone)]
pub enum DomainError {
    /// User has not completed identity verification
    KycRequired { user_id: String },
    /// Wallet balance cannot cover amount plus fee
    InsufficientBalance { available: String, required: String },
    /// No wallet with the given public id
    WalletNotFound { wallet_id: String },
    /// The caller has no wallet yet
    NoWallet { user_id: String },
    /// Wallet exists but is suspended or closed
    WalletInactive { wallet_id: String, status: String },
    /// Sender and recipient are the same wallet
    SelfTransfer,
    /// Wallets hold different currencies
    CurrencyMismatch { sender: String, recipient: String },
    /// Rolling spend counter would exceed the configured limit
    SpendLimitExceeded { period: String, limit: String },
    /// Pending external operation missing
    OperationNotFound { reference: String },
    /// Operation is not in a state that allows the request
    InvalidOperationState { reference: String, current: String },
    /// Gateway definitively refused the transfer or charge
    TransferRejected { reference: String, reason: String },
    /// Caller asked to sign for a wallet they do not own
    NotWalletOwner { wallet_id: String },
    /// QR payload older than its validity window
    QrPayloadExpired { age_secs: i64 },
    /// Lookup throttled by the sliding-window limiter
    TooManyRequests { scope: String, retry_after_secs: u64 },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
    /// An invariant that should hold by construction did not
    Invariant { message: String },
}

/// External service errors (payment gateways, identity provider)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// No definitive answer from the gateway; outcome unknown
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    InvalidSignature { subject: String },
}

/// Authentication failures on the request channel
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingCredentials,
    InvalidToken { reason: String },
    Expired,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Authentication(AuthError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Invariant {
            message: message.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::KycRequired { .. } => 403,
                DomainError::InsufficientBalance { .. } => 422,
                DomainError::WalletNotFound { .. } => 404,
                DomainError::NoWallet { .. } => 404,
                DomainError::WalletInactive { .. } => 409,
                DomainError::SelfTransfer => 422,
                DomainError::CurrencyMismatch { .. } => 422,
                DomainError::SpendLimitExceeded { .. } => 422,
                DomainError::OperationNotFound { .. } => 404,
                DomainError::InvalidOperationState { .. } => 409,
                DomainError::TransferRejected { .. } => 422,
                DomainError::NotWalletOwner { .. } => 403,
                DomainError::QrPayloadExpired { .. } => 410,
                DomainError::TooManyRequests { .. } => 429,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        422
                    }
                }
                ExternalError::RateLimit { .. } => 503,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Authentication(_) => 401,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::KycRequired { .. } => ErrorCode::KycRequired,
                DomainError::WalletNotFound { .. }
                | DomainError::NoWallet { .. }
                | DomainError::OperationNotFound { .. } => ErrorCode::NotFound,
                DomainError::TooManyRequests { .. } => ErrorCode::RateLimited,
                DomainError::InsufficientBalance { .. }
                | DomainError::WalletInactive { .. }
                | DomainError::SelfTransfer
                | DomainError::CurrencyMismatch { .. }
                | DomainError::SpendLimitExceeded { .. }
                | DomainError::InvalidOperationState { .. }
                | DomainError::TransferRejected { .. }
                | DomainError::NotWalletOwner { .. }
                | DomainError::QrPayloadExpired { .. } => ErrorCode::FailedPrecondition,
            },
            AppErrorKind::Infrastructure(_) => ErrorCode::Internal,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    is_retryable: false,
                    ..
                } => ErrorCode::FailedPrecondition,
                _ => ErrorCode::GatewayUnavailable,
            },
            AppErrorKind::Validation(_) => ErrorCode::InvalidArgument,
            AppErrorKind::Authentication(_) => ErrorCode::Unauthenticated,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::KycRequired { .. } => {
                    "Identity verification is required before moving money".to_string()
                }
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient balance. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::WalletNotFound { wallet_id } => {
                    format!("Wallet '{}' not found", wallet_id)
                }
                DomainError::NoWallet { .. } => "You do not have a wallet yet".to_string(),
                DomainError::WalletInactive { wallet_id, status } => {
                    format!("Wallet '{}' is {}", wallet_id, status.to_lowercase())
                }
                DomainError::SelfTransfer => "You cannot send money to your own wallet".to_string(),
                DomainError::CurrencyMismatch { sender, recipient } => format!(
                    "Cannot send {} to a {} wallet",
                    sender, recipient
                ),
                DomainError::SpendLimitExceeded { period, limit } => {
                    format!("This transfer exceeds your {} limit of {}", period, limit)
                }
                DomainError::OperationNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::InvalidOperationState { reference, current } => format!(
                    "Payment '{}' cannot be updated while {}",
                    reference,
                    current.to_lowercase()
                ),
                DomainError::TransferRejected { reference, reason } => {
                    format!("Payment '{}' was declined: {}", reference, reason)
                }
                DomainError::NotWalletOwner { .. } => {
                    "You can only create payment codes for your own wallet".to_string()
                }
                DomainError::QrPayloadExpired { .. } => {
                    "This payment code has expired. Ask for a new one".to_string()
                }
                DomainError::TooManyRequests {
                    retry_after_secs, ..
                } => format!(
                    "Too many lookups. Please try again in {} seconds",
                    retry_after_secs
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    message,
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        format!("Payment provider ({}) refused the request: {}", provider, message)
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "{} is busy. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("{} is busy. Please try again later", service),
                },
                ExternalError::Timeout { service, .. } => match &self.context {
                    Some(reference) => format!(
                        "{} did not confirm in time. Payment {} is pending and will be resolved automatically",
                        service, reference
                    ),
                    None => format!("{} did not respond in time. Please try again", service),
                },
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidSignature { subject } => {
                    format!("Invalid {} signature", subject)
                }
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::MissingCredentials => "Authentication required".to_string(),
                AuthError::InvalidToken { .. } => "Invalid authentication token".to_string(),
                AuthError::Expired => "Authentication token has expired".to_string(),
            },
        }
    }

    /// Check if the caller may usefully retry
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::TooManyRequests { .. }) => true,
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Invariant { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Authentication(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code().as_str(), self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
