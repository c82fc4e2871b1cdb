//! Rate-limited resolver from a public wallet id to the payee's display
//! identity.

use http::HeaderMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::keys::rate_limit::WindowKey;
use crate::database::models::WalletStatus;
use crate::database::repository::LedgerStore;
use crate::error::{AppError, AppResult, DomainError};
use crate::services::ledger::is_valid_wallet_id;
use crate::services::rate_limiter::{RateDecision, RateLimitConfig, RateLimitStore};

const SCOPE_USER: &str = "lookup_user";
const SCOPE_ADDRESS: &str = "lookup_ip";
const SCOPE_NOT_FOUND: &str = "lookup_not_found";

#[derive(Debug, Clone, Serialize)]
pub struct WalletIdentity {
    pub wallet_id: String,
    pub currency: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

pub struct WalletLookupService {
    store: Arc<dyn LedgerStore>,
    limiter: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl WalletLookupService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        limiter: Arc<dyn RateLimitStore>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            config,
        }
    }

    pub async fn lookup(
        &self,
        user_id: &str,
        client_ip: &str,
        wallet_id: &str,
    ) -> AppResult<WalletIdentity> {
        let not_found_key = WindowKey::new(SCOPE_NOT_FOUND, user_id).to_string();
        let misses = self
            .guard(self.limiter.count(&not_found_key, self.config.not_found_window()).await)
            .unwrap_or(0);
        if misses >= self.config.not_found_limit {
            return Err(too_many(SCOPE_NOT_FOUND, self.config.not_found_window()));
        }

        self.acquire(SCOPE_USER, user_id, self.config.user_limit)
            .await?;
        self.acquire(SCOPE_ADDRESS, &hash_address(client_ip), self.config.ip_limit)
            .await?;

        let wallet_id = wallet_id.trim();
        let wallet = if is_valid_wallet_id(wallet_id) {
            self.store.find_wallet_by_public_id(wallet_id).await?
        } else {
            None
        };

        match wallet {
            Some(wallet) if wallet.status != WalletStatus::Closed => {
                let user = self.store.find_user(&wallet.user_id).await?;
                Ok(WalletIdentity {
                    wallet_id: wallet.wallet_id,
                    currency: wallet.currency,
                    display_name: user.as_ref().and_then(|u| u.display_name.clone()),
                    photo_url: user.and_then(|u| u.photo_url),
                })
            }
            _ => {
                debug!(user_id = %user_id, "wallet lookup miss");
                let _ = self.guard(
                    self.limiter
                        .record(&not_found_key, self.config.not_found_window())
                        .await,
                );
                Err(AppError::domain(DomainError::WalletNotFound {
                    wallet_id: wallet_id.to_string(),
                }))
            }
        }
    }

    async fn acquire(&self, scope: &'static str, subject: &str, limit: u32) -> AppResult<()> {
        let key = WindowKey::new(scope, subject).to_string();
        let decision = self.guard(
            self.limiter
                .try_acquire(&key, limit, self.config.window())
                .await,
        );
        match decision {
            Some(RateDecision::Limited { retry_after }) => {
                warn!(scope = scope, "wallet lookup rate limited");
                Err(too_many(scope, retry_after))
            }
            _ => Ok(()),
        }
    }

    /// The limiter fails open: a broken backend must not block lookups
    fn guard<T>(&self, result: Result<T, crate::services::rate_limiter::RateLimitError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "rate limiter unavailable, allowing request");
                None
            }
        }
    }
}

fn too_many(scope: &str, retry_after: Duration) -> AppError {
    AppError::domain(DomainError::TooManyRequests {
        scope: scope.to_string(),
        retry_after_secs: retry_after.as_secs().max(1),
    })
}

/// Client addresses are only ever stored hashed
pub fn hash_address(address: &str) -> String {
    hex::encode(Sha256::digest(address.as_bytes()))
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, else `unknown`
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or(real)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{User, Wallet};
    use crate::error::ErrorCode;
    use crate::services::rate_limiter::InMemoryRateLimiter;
    use http::HeaderValue;

    async fn service(config: RateLimitConfig) -> WalletLookupService {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(User::new("bob", Some("Bob".to_string()))).await;
        store.seed_wallet(Wallet::new("bob", "WB0B0000001", "NGN")).await;
        WalletLookupService::new(store, Arc::new(InMemoryRateLimiter::new()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_display_identity() {
        let lookup = service(RateLimitConfig::default()).await;
        let identity = lookup.lookup("alice", "10.0.0.1", "WB0B0000001").await.unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Bob"));
        assert_eq!(identity.currency, "NGN");
    }

    #[tokio::test(start_paused = true)]
    async fn per_user_window_is_enforced() {
        let lookup = service(RateLimitConfig {
            user_limit: 2,
            ..RateLimitConfig::default()
        })
        .await;
        for _ in 0..2 {
            lookup.lookup("alice", "10.0.0.1", "WB0B0000001").await.unwrap();
        }
        let err = lookup
            .lookup("alice", "10.0.0.2", "WB0B0000001")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RateLimited);

        // Another user is unaffected
        assert!(lookup.lookup("carol", "10.0.0.3", "WB0B0000001").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_misses_trip_the_penalty() {
        let lookup = service(RateLimitConfig {
            not_found_limit: 3,
            ..RateLimitConfig::default()
        })
        .await;
        for i in 0..3 {
            let err = lookup
                .lookup("alice", "10.0.0.1", &format!("WNOPE{:06}", i))
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::NotFound);
        }
        let err = lookup
            .lookup("alice", "10.0.0.1", "WB0B0000001")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RateLimited);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(lookup.lookup("alice", "10.0.0.1", "WB0B0000001").await.is_ok());
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.9"));
        assert_eq!(client_ip(&headers), "192.0.2.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
        assert_ne!(hash_address("203.0.113.7"), "203.0.113.7");
    }
}
