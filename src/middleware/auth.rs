//! Bearer token verification.
//!
//! Tokens are `base64url(json{sub, exp}).hex(hmac_sha256(secret, first segment))`.
//! Login lives elsewhere; `issue` exists for tests and operator tooling.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{AppError, AppErrorKind, AuthError};
use crate::payments::utils::{hmac_sha256_hex, secure_eq};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Expiry as unix seconds
    pub exp: i64,
}

pub struct TokenVerifier {
    secret: String,
    ttl_secs: i64,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.token_secret.clone(), config.token_ttl_secs)
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AppError> {
        self.issue_with_expiry(user_id, Utc::now().timestamp() + self.ttl_secs)
    }

    pub fn issue_with_expiry(&self, user_id: &str, exp: i64) -> Result<String, AppError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
        };
        let json = serde_json::to_vec(&claims)
            .map_err(|e| AppError::internal(format!("token encoding failed: {}", e)))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = hmac_sha256_hex(self.secret.as_bytes(), body.as_bytes());
        Ok(format!("{}.{}", body, signature))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let (body, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| invalid("malformed token"))?;

        let expected = hmac_sha256_hex(self.secret.as_bytes(), body.as_bytes());
        if !secure_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
            return Err(invalid("bad signature"));
        }

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| invalid("malformed token body"))?;
        let claims: Claims =
            serde_json::from_slice(&json).map_err(|_| invalid("malformed token claims"))?;
        if claims.sub.trim().is_empty() {
            return Err(invalid("empty subject"));
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::InvalidToken {
        reason: reason.to_string(),
    }
}

/// Caller identity taken from `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reject = |err: AuthError| {
            let error = AppError::new(AppErrorKind::Authentication(err));
            match &request_id {
                Some(id) => error.with_request_id(id.clone()),
                None => error,
            }
        };

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| reject(AuthError::MissingCredentials))?;

        let claims = verifier.verify(token).map_err(reject)?;
        Ok(AuthenticatedUser {
            user_id: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new("a-test-secret-that-is-long-enough-32", 3600)
    }

    #[test]
    fn issued_token_verifies() {
        let v = verifier();
        let token = v.issue("user-1").unwrap();
        assert_eq!(v.verify(&token).unwrap().sub, "user-1");
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let v = verifier();
        let token = v.issue("user-1").unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_body = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin","exp":9999999999}"#);
        assert!(v.verify(&format!("{}.{}", forged_body, signature)).is_err());

        let other = TokenVerifier::new("another-secret-that-is-long-enough", 3600);
        assert!(other.verify(&token).is_err());
        assert!(v.verify("not-a-token").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let v = verifier();
        let token = v
            .issue_with_expiry("user-1", Utc::now().timestamp() - 1)
            .unwrap();
        assert!(matches!(v.verify(&token), Err(AuthError::Expired)));
    }
}
