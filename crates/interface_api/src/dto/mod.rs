//! Request and response bodies

pub mod leaks;
pub mod payments;
pub mod reconciliations;
pub mod visits;

use rust_decimal::Decimal;
use validator::ValidationError;

/// Amounts must be strictly positive; precision is checked by the ledger
pub(crate) fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("positive_amount"))
    }
}
