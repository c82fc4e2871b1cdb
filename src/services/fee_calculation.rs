//! Platform fee for wallet-to-wallet transfers: a percentage of the amount,
//! clamped between a floor and a ceiling, in the transfer currency.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};

use crate::config::{env_or, ConfigError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeBreakdown {
    #[serde(with = "bigdecimal_serde")]
    pub amount: BigDecimal,
    #[serde(with = "bigdecimal_serde")]
    pub fee: BigDecimal,
    /// What the sender is debited: amount plus fee
    #[serde(with = "bigdecimal_serde")]
    pub total: BigDecimal,
    #[serde(with = "bigdecimal_serde")]
    pub effective_rate: BigDecimal,
}

pub(crate) mod bigdecimal_serde {
    use bigdecimal::BigDecimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BigDecimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    pub percent: BigDecimal,
    pub floor: BigDecimal,
    pub ceiling: BigDecimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            percent: BigDecimal::from(1),
            floor: BigDecimal::from(10),
            ceiling: BigDecimal::from(100),
        }
    }
}

impl FeePolicy {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let policy = Self {
            percent: env_or("TRANSFER_FEE_PERCENT", defaults.percent)?,
            floor: env_or("TRANSFER_FEE_FLOOR", defaults.floor)?,
            ceiling: env_or("TRANSFER_FEE_CEILING", defaults.ceiling)?,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percent < BigDecimal::zero() || self.floor < BigDecimal::zero() {
            return Err(ConfigError::ValidationFailed(
                "transfer fee percent and floor must not be negative".to_string(),
            ));
        }
        if self.floor > self.ceiling {
            return Err(ConfigError::ValidationFailed(
                "transfer fee floor must not exceed the ceiling".to_string(),
            ));
        }
        Ok(())
    }

    /// clamp(amount × percent / 100, floor, ceiling), rounded half-up to cents.
    pub fn fee_for(&self, amount: &BigDecimal) -> BigDecimal {
        let raw = (amount * &self.percent / BigDecimal::from(100))
            .with_scale_round(2, RoundingMode::HalfUp);
        if raw < self.floor {
            self.floor.with_scale(2)
        } else if raw > self.ceiling {
            self.ceiling.with_scale(2)
        } else {
            raw
        }
    }

    pub fn breakdown(&self, amount: &BigDecimal) -> FeeBreakdown {
        let fee = self.fee_for(amount);
        let total = amount + &fee;
        let effective_rate = if amount > &BigDecimal::zero() {
            (&fee / amount * BigDecimal::from(100)).with_scale_round(4, RoundingMode::HalfUp)
        } else {
            BigDecimal::zero()
        };
        FeeBreakdown {
            amount: amount.clone(),
            fee,
            total,
            effective_rate,
        }
    }
}

/// Values a fee in the reporting currency. `units_per_usd` is how many units
/// of the fee currency buy one dollar; an unusable rate falls back to 1.
pub fn fee_in_usd(fee: &BigDecimal, units_per_usd: &BigDecimal) -> BigDecimal {
    let rate = if units_per_usd > &BigDecimal::zero() {
        units_per_usd.clone()
    } else {
        BigDecimal::from(1)
    };
    (fee / rate).with_scale_round(6, RoundingMode::HalfUp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn fee_hits_the_floor_for_small_amounts() {
        assert_eq!(FeePolicy::default().fee_for(&dec("500")), dec("10"));
    }

    #[test]
    fn fee_hits_the_ceiling_for_large_amounts() {
        assert_eq!(FeePolicy::default().fee_for(&dec("20000")), dec("100"));
    }

    #[test]
    fn fee_is_one_percent_in_between() {
        assert_eq!(FeePolicy::default().fee_for(&dec("5000")), dec("50"));
        assert_eq!(FeePolicy::default().fee_for(&dec("1234.56")), dec("12.35"));
    }

    #[test]
    fn breakdown_reports_total_debit() {
        let breakdown = FeePolicy::default().breakdown(&dec("500"));
        assert_eq!(breakdown.total, dec("510"));
        assert_eq!(breakdown.effective_rate, dec("2"));
        let json = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(json["fee"], "10.00");
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let policy = FeePolicy {
            percent: dec("1"),
            floor: dec("200"),
            ceiling: dec("100"),
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn usd_valuation_divides_by_rate() {
        assert_eq!(fee_in_usd(&dec("1550"), &dec("1550")), dec("1"));
        assert_eq!(fee_in_usd(&dec("10"), &dec("0")), dec("10"));
        assert_eq!(fee_in_usd(&dec("10"), &dec("3")), dec("3.333333"));
    }
}
