//! Error response formatting
//!
//! Every handler error becomes `{error, message, request_id, timestamp,
//! details?, retryable}` with the status code from [`AppError::status_code`].

use crate::error::{AppError, AppErrorKind, DomainError, ErrorCode, ValidationError};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// RFC 3339 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: details_for(error),
            retryable: error.is_retryable(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn details_for(error: &AppError) -> Option<serde_json::Value> {
    match &error.kind {
        AppErrorKind::Validation(ValidationError::InvalidField { field, reason }) => {
            Some(serde_json::json!({ "field": field, "reason": reason }))
        }
        AppErrorKind::Validation(ValidationError::MissingField { field }) => {
            Some(serde_json::json!({ "field": field }))
        }
        AppErrorKind::Domain(DomainError::TooManyRequests {
            scope,
            retry_after_secs,
        }) => Some(serde_json::json!({
            "scope": scope,
            "retry_after_secs": retry_after_secs,
        })),
        // Pending payments carry their reference so the client can poll
        AppErrorKind::External(_) => error
            .context
            .as_ref()
            .map(|reference| serde_json::json!({ "reference": reference })),
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let retry_after = match &self.kind {
            AppErrorKind::Domain(DomainError::TooManyRequests {
                retry_after_secs, ..
            }) => HeaderValue::from_str(&retry_after_secs.to_string()).ok(),
            _ => None,
        };

        let mut response = (status_code, Json(ErrorResponse::from_app_error(&self))).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Standard success envelope
pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Request id set by the request-id layer, if any
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalError;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::domain(DomainError::InsufficientBalance {
            available: "50".to_string(),
            required: "100".to_string(),
        })
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::FailedPrecondition);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("Insufficient balance"));
        assert!(!error_response.retryable);
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        });

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limited_response_sets_retry_after() {
        let response = AppError::domain(DomainError::TooManyRequests {
            scope: "lookup_user".to_string(),
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            HeaderValue::from_static("42")
        );
    }

    #[test]
    fn timeout_details_carry_reference() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Timeout {
            service: "paystack".to_string(),
            timeout_secs: 30,
        }))
        .with_context("WD-123");
        let body = ErrorResponse::from_app_error(&error);
        assert_eq!(body.error, ErrorCode::GatewayUnavailable);
        assert_eq!(body.details.unwrap()["reference"], "WD-123");
        assert!(body.retryable);
    }
}
