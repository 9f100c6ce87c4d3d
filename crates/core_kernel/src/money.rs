//! Money types with precise decimal arithmetic
//!
//! The clinic ledger operates in a single currency, so `Money` is a thin
//! fixed-point wrapper over `rust_decimal::Decimal` held at two decimal
//! places. Floating point never touches a stored amount.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use thiserror::Error;

/// Number of decimal places carried by every stored amount
pub const MONEY_SCALE: u32 = 2;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} has more than {max_decimals} decimal places")]
    ExcessPrecision { amount: Decimal, max_decimals: u32 },

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount in the clinic's operating currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Creates a new Money value, rounding to two decimal places
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(MONEY_SCALE))
    }

    /// Creates Money only if the amount fits in `max_decimals` places
    ///
    /// Used at input boundaries where silently rounding a cashier's entry
    /// would hide a mistake.
    pub fn exact(amount: Decimal, max_decimals: u32) -> Result<Self, MoneyError> {
        if amount.normalize().scale() > max_decimals {
            return Err(MoneyError::ExcessPrecision {
                amount,
                max_decimals,
            });
        }
        Ok(Self(amount))
    }

    /// Creates Money from an integer amount in minor units (e.g. kobo, cents)
    pub fn from_minor(minor_units: i64) -> Self {
        Self(Decimal::new(minor_units, MONEY_SCALE))
    }

    /// Converts to minor units, rounding any sub-minor residue
    pub fn to_minor(&self) -> Result<i64, MoneyError> {
        (self.0.round_dp(MONEY_SCALE) * dec!(100))
            .trunc()
            .to_i64()
            .ok_or(MoneyError::Overflow)
    }

    /// Creates a zero amount
    pub const fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Returns the smaller of two amounts
    pub fn min(self, other: Money) -> Money {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Checked addition
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Decimal {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_creation_rounds_to_scale() {
        let m = Money::new(dec!(100.505));
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_money_from_minor() {
        let m = Money::from_minor(500_000);
        assert_eq!(m.amount(), dec!(5000.00));
        assert_eq!(m.to_minor().unwrap(), 500_000);
    }

    #[test]
    fn test_exact_rejects_excess_precision() {
        assert!(Money::exact(dec!(10.25), 2).is_ok());
        assert!(Money::exact(dec!(10.250), 2).is_ok());
        assert!(matches!(
            Money::exact(dec!(10.255), 2),
            Err(MoneyError::ExcessPrecision { .. })
        ));
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(100.00));
        let b = Money::new(dec!(50.00));

        assert_eq!((a + b).amount(), dec!(150.00));
        assert_eq!((a - b).amount(), dec!(50.00));
        assert_eq!(a.min(b), b);
    }

    #[test]
    fn test_sum_and_display() {
        let total: Money = [dec!(5000), dec!(2000.5)].into_iter().map(Money::new).sum();
        assert_eq!(total.to_string(), "7000.50");
    }
}
