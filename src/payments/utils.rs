use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Reads with retries. Only for calls the gateway treats as idempotent.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let text = self
            .send(
                method,
                url,
                bearer_token,
                body,
                additional_headers,
                self.max_retries,
            )
            .await?;
        parse_body(&text)
    }

    /// Single attempt. Money-moving calls must not be replayed blindly: a 5xx or
    /// dropped connection may still have landed on the gateway side.
    pub async fn request_json_once<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let text = self
            .send(method, url, bearer_token, body, additional_headers, 0)
            .await?;
        parse_body(&text)
    }

    /// Single attempt for endpoints answering 202 with an empty body.
    pub async fn request_accepted(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<()> {
        self.send(method, url, bearer_token, body, additional_headers, 0)
            .await
            .map(|_| ())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
        max_retries: u32,
    ) -> PaymentResult<String> {
        let mut last_error = None;
        for attempt in 0..=max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("provider request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(text);
                    }

                    if status.as_u16() == 429 {
                        if attempt < max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: "provider rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        provider: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: "provider request failed".to_string(),
        }))
    }
}

// A 2xx with a body we cannot read still happened on the gateway side,
// so it is reported as retryable (outcome unknown) rather than a refusal.
fn parse_body<T: DeserializeOwned>(text: &str) -> PaymentResult<T> {
    serde_json::from_str::<T>(text).map_err(|e| PaymentError::ProviderError {
        provider: "http".to_string(),
        message: format!("invalid provider JSON response: {}", e),
        provider_code: None,
        retryable: true,
    })
}

/// Replaces the generic "http" provider tag with the gateway's name.
pub fn attribute_to(err: PaymentError, name: &str) -> PaymentError {
    match err {
        PaymentError::ProviderError {
            provider,
            message,
            provider_code,
            retryable,
        } if provider == "http" => PaymentError::ProviderError {
            provider: name.to_string(),
            message,
            provider_code,
            retryable,
        },
        other => other,
    }
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let computed = hmac_sha256_hex(secret.as_bytes(), payload);
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Last four characters of an account or phone number, for logs.
pub fn mask_account(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        let valid = verify_hmac_sha512_hex(payload, "secret", "not-a-valid-signature");
        assert!(!valid);
    }

    #[test]
    fn sha512_signature_accepts_matching_digest() {
        type HmacSha512 = Hmac<Sha512>;
        let payload = br#"{"event":"transfer.success"}"#;
        let mut mac = HmacSha512::new_from_slice(b"secret").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());
        assert!(verify_hmac_sha512_hex(payload, "secret", &signature));
        assert!(verify_hmac_sha512_hex(
            payload,
            "secret",
            &signature.to_uppercase()
        ));
    }

    #[test]
    fn sha256_signature_round_trip() {
        let payload = br#"{"externalId":"abc","status":"SUCCESSFUL"}"#;
        let signature = hmac_sha256_hex(b"momo-secret", payload);
        assert_eq!(signature.len(), 64);
        assert!(verify_hmac_sha256_hex(payload, "momo-secret", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "other", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "", &signature));
    }

    #[test]
    fn account_masking_keeps_last_four() {
        assert_eq!(mask_account("0123456789"), "******6789");
        assert_eq!(mask_account("123"), "***");
    }

    #[test]
    fn unreadable_success_body_is_not_a_refusal() {
        let err = parse_body::<JsonValue>("not json").unwrap_err();
        assert!(!err.is_definitive_rejection());
    }
}
