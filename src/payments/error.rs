use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    /// The gateway answered and refused the request, so nothing happened on
    /// its side. Network failures and 5xx answers leave the outcome unknown.
    pub fn is_definitive_rejection(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. }
            | PaymentError::PaymentDeclinedError { .. }
            | PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => !*retryable,
            PaymentError::NetworkError { .. } | PaymentError::WebhookVerificationError { .. } => {
                false
            }
        }
    }

    /// Reason recorded on an operation the gateway refused. Provider text is
    /// kept for declines since it is what the customer's bank told us.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::PaymentDeclinedError { message, .. } => {
                format!("declined by gateway: {}", message)
            }
            PaymentError::NetworkError { .. } => "gateway unreachable".to_string(),
            PaymentError::RateLimitError { .. } => "gateway is throttling requests".to_string(),
            PaymentError::WebhookVerificationError { .. } => {
                "gateway callback could not be verified".to_string()
            }
            PaymentError::ProviderError {
                provider,
                provider_code,
                ..
            } => match provider_code {
                Some(code) => format!("{} refused the request ({})", provider, code),
                None => format!("{} refused the request", provider),
            },
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "Payment provider".to_string(),
                retry_after: retry_after_seconds,
            })),
            PaymentError::ProviderError {
                ref provider,
                retryable,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: provider.clone(),
                message: err.to_string(),
                is_retryable: retryable,
            })),
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "payments".to_string(),
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            })),
        }
    }
}
