//! Ledger configuration
//!
//! Every component receives a shared `LedgerConfig` at construction.
//! Nothing in the ledger reads settings from globals.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::Money;

use crate::error::BillingError;

/// Behavioural settings for the billing ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Service tags paid first, in order. Untagged and other services
    /// follow in creation order.
    pub registration_priority_tags: Vec<String>,
    /// Emergency-flagged artifacts are never reported as leaks
    pub emergency_exempt: bool,
    /// Maximum decimal places accepted on an incoming amount
    pub currency_decimals: u32,
    /// Close fully paid active visits during the daily refresh
    pub close_settled_visits: bool,
    /// Largest amount accepted; the schema stores NUMERIC(14,2)
    pub max_amount: Decimal,
}

/// Largest value a NUMERIC(14,2) column holds
pub const STORED_AMOUNT_LIMIT: Decimal = dec!(999_999_999_999.99);

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            registration_priority_tags: vec![
                "registration".to_string(),
                "consultation".to_string(),
            ],
            emergency_exempt: true,
            currency_decimals: 2,
            close_settled_visits: true,
            max_amount: STORED_AMOUNT_LIMIT,
        }
    }
}

impl LedgerConfig {
    /// Checks the configuration for values the ledger cannot work with
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.currency_decimals > core_kernel::MONEY_SCALE {
            return Err(BillingError::Configuration(format!(
                "currency_decimals {} exceeds stored scale {}",
                self.currency_decimals,
                core_kernel::MONEY_SCALE
            )));
        }
        if self.max_amount <= Decimal::ZERO || self.max_amount > STORED_AMOUNT_LIMIT {
            return Err(BillingError::Configuration(format!(
                "max_amount must be in (0, {}], got {}",
                STORED_AMOUNT_LIMIT, self.max_amount
            )));
        }
        if self
            .registration_priority_tags
            .iter()
            .any(|tag| tag.trim().is_empty())
        {
            return Err(BillingError::Configuration(
                "registration_priority_tags must not contain blank tags".to_string(),
            ));
        }
        Ok(())
    }

    /// Allocation rank of a service tag; lower is paid first
    pub fn priority_rank(&self, tag: Option<&str>) -> usize {
        let unranked = self.registration_priority_tags.len();
        match tag {
            Some(tag) => self
                .registration_priority_tags
                .iter()
                .position(|t| t.eq_ignore_ascii_case(tag.trim()))
                .unwrap_or(unranked),
            None => unranked,
        }
    }

    /// Validates a positive amount at the configured precision
    pub fn validate_amount(&self, amount: Decimal) -> Result<Money, BillingError> {
        let money = Money::exact(amount, self.currency_decimals)?;
        if !money.is_positive() {
            return Err(BillingError::invalid_amount(format!(
                "amount must be greater than zero, got {}",
                amount
            )));
        }
        if money.amount() > self.max_amount {
            return Err(BillingError::invalid_amount(format!(
                "amount {} exceeds the maximum of {}",
                amount, self.max_amount
            )));
        }
        Ok(money)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_ranks_registration_before_consultation() {
        let config = LedgerConfig::default();
        assert_eq!(config.priority_rank(Some("registration")), 0);
        assert_eq!(config.priority_rank(Some("Consultation")), 1);
        assert_eq!(config.priority_rank(Some("lab")), 2);
        assert_eq!(config.priority_rank(None), 2);
    }

    #[test]
    fn test_validate_amount() {
        let config = LedgerConfig::default();
        assert_eq!(config.validate_amount(dec!(7000)).unwrap(), Money::new(dec!(7000)));
        assert!(config.validate_amount(dec!(0)).is_err());
        assert!(config.validate_amount(dec!(-5)).is_err());
        assert!(config.validate_amount(dec!(1.001)).is_err());
    }

    #[test]
    fn test_validate_amount_upper_bound() {
        let config = LedgerConfig::default();
        assert!(config.validate_amount(dec!(999_999_999_999.99)).is_ok());
        assert!(matches!(
            config.validate_amount(dec!(1_000_000_000_000.00)),
            Err(BillingError::InvalidAmount(_))
        ));

        let capped = LedgerConfig {
            max_amount: dec!(50000),
            ..Default::default()
        };
        assert!(capped.validate_amount(dec!(50000)).is_ok());
        assert!(capped.validate_amount(dec!(50000.01)).is_err());
    }

    #[test]
    fn test_validate_rejects_max_amount_beyond_storage() {
        let config = LedgerConfig {
            max_amount: dec!(1_000_000_000_000),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BillingError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_excess_scale() {
        let config = LedgerConfig {
            currency_decimals: 4,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BillingError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"emergency_exempt": false}"#).unwrap();
        assert!(!config.emergency_exempt);
        assert_eq!(config.currency_decimals, 2);
        assert_eq!(config.registration_priority_tags.len(), 2);
    }
}
