use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::database::error::DatabaseError;
use crate::database::models::RateSnapshot;
use crate::database::repository::{ExchangeRateRepository, RepoResult};
use crate::database::PgStore;

#[async_trait]
impl ExchangeRateRepository for PgStore {
    async fn current_rates(&self) -> RepoResult<Option<RateSnapshot>> {
        let row: Option<(String, JsonValue, DateTime<Utc>)> =
            sqlx::query_as("SELECT base, rates, refreshed_at FROM exchange_rates WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|(base, rates, refreshed_at)| RateSnapshot {
            base,
            rates: decode_rates(&rates),
            refreshed_at,
        }))
    }

    async fn replace_rates(&self, snapshot: &RateSnapshot) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO exchange_rates (id, base, rates, refreshed_at)
             VALUES (1, $1, $2, $3)
             ON CONFLICT (id)
             DO UPDATE SET base = EXCLUDED.base, rates = EXCLUDED.rates,
                           refreshed_at = EXCLUDED.refreshed_at",
        )
        .bind(&snapshot.base)
        .bind(encode_rates(&snapshot.rates))
        .bind(snapshot.refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }
}

/// Rates are kept as decimal strings so JSONB never rounds them
fn encode_rates(rates: &HashMap<String, BigDecimal>) -> JsonValue {
    JsonValue::Object(
        rates
            .iter()
            .map(|(currency, rate)| (currency.clone(), JsonValue::String(rate.to_string())))
            .collect(),
    )
}

fn decode_rates(value: &JsonValue) -> HashMap<String, BigDecimal> {
    let mut rates = HashMap::new();
    if let Some(map) = value.as_object() {
        for (currency, raw) in map {
            let parsed = match raw {
                JsonValue::String(s) => BigDecimal::from_str(s).ok(),
                JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
                _ => None,
            };
            match parsed {
                Some(rate) => {
                    rates.insert(currency.clone(), rate);
                }
                None => warn!(currency = %currency, "skipping unparseable stored rate"),
            }
        }
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_rates_decode_strings_and_numbers() {
        let decoded = decode_rates(&serde_json::json!({
            "NGN": "1550.25",
            "KES": 129.5,
            "BAD": true
        }));
        assert_eq!(decoded.get("NGN"), Some(&BigDecimal::from_str("1550.25").unwrap()));
        assert_eq!(decoded.get("KES"), Some(&BigDecimal::from_str("129.5").unwrap()));
        assert!(!decoded.contains_key("BAD"));
    }

    #[test]
    fn encoded_rates_are_strings() {
        let mut rates = HashMap::new();
        rates.insert("NGN".to_string(), BigDecimal::from_str("1550.25").unwrap());
        assert_eq!(encode_rates(&rates), serde_json::json!({"NGN": "1550.25"}));
    }
}
