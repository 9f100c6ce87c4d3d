//! Line items: the ledger's atomic billable unit
//!
//! A line item is one instance of a service rendered within a visit. Its
//! paid and outstanding amounts always sum to its amount, and its
//! `bill_status` is derived from those amounts, never set directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{LineItemId, Money, ServiceId, VisitId};

use crate::artifact::ArtifactLink;
use crate::error::BillingError;
use crate::payment::PaymentMethod;

/// Payment state of a single line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl BillStatus {
    /// Derives the status from the paid and outstanding amounts
    pub fn derive(amount_paid: Money, outstanding: Money) -> Self {
        if outstanding.is_zero() {
            BillStatus::Paid
        } else if amount_paid.is_zero() {
            BillStatus::Pending
        } else {
            BillStatus::PartiallyPaid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "PENDING",
            BillStatus::PartiallyPaid => "PARTIALLY_PAID",
            BillStatus::Paid => "PAID",
        }
    }
}

/// Catalog details copied onto the line item when it is created
///
/// Later catalog edits do not change what a past visit was billed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_id: Option<ServiceId>,
    pub code: String,
    pub name: String,
    /// Allocation tag such as "registration" or "consultation"
    pub tag: Option<String>,
}

impl ServiceSnapshot {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_id: None,
            code: code.into(),
            name: name.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_service_id(mut self, service_id: ServiceId) -> Self {
        self.service_id = Some(service_id);
        self
    }
}

/// One billable unit of work within a visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub visit_id: VisitId,
    pub service: ServiceSnapshot,
    pub amount: Money,
    pub amount_paid: Money,
    pub outstanding_amount: Money,
    pub bill_status: BillStatus,
    /// Method of the most recent payment applied
    pub payment_method: Option<PaymentMethod>,
    pub artifact: Option<ArtifactLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineItem {
    /// Creates an unpaid line item
    pub fn new(
        visit_id: VisitId,
        service: ServiceSnapshot,
        amount: Money,
        artifact: Option<ArtifactLink>,
    ) -> Result<Self, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::invalid_amount(format!(
                "line item amount must be greater than zero, got {}",
                amount
            )));
        }
        if service.code.trim().is_empty() || service.name.trim().is_empty() {
            return Err(BillingError::InvariantViolation(
                "service snapshot requires a code and a name".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: LineItemId::new_v7(),
            visit_id,
            service,
            amount,
            amount_paid: Money::zero(),
            outstanding_amount: amount,
            bill_status: BillStatus::Pending,
            payment_method: None,
            artifact,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_settled(&self) -> bool {
        self.bill_status == BillStatus::Paid
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding_amount.is_positive()
    }

    pub fn tag(&self) -> Option<&str> {
        self.service.tag.as_deref()
    }

    /// Applies up to `amount` against the outstanding balance
    ///
    /// Returns the portion actually applied, which is never more than the
    /// outstanding balance.
    pub fn apply_payment(
        &mut self,
        amount: Money,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<Money, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::invalid_amount(format!(
                "applied amount must be greater than zero, got {}",
                amount
            )));
        }
        let applied = amount.min(self.outstanding_amount);
        if applied.is_zero() {
            return Ok(applied);
        }

        self.amount_paid += applied;
        self.outstanding_amount -= applied;
        self.bill_status = BillStatus::derive(self.amount_paid, self.outstanding_amount);
        self.payment_method = Some(method);
        self.updated_at = at;

        self.check_invariants()?;
        Ok(applied)
    }

    /// Verifies the amount and status invariants
    ///
    /// Called before every write of a line item, by services and by the
    /// storage adapters.
    pub fn check_invariants(&self) -> Result<(), BillingError> {
        if !self.amount.is_positive() {
            return Err(BillingError::InvariantViolation(format!(
                "line item {} has non-positive amount {}",
                self.id, self.amount
            )));
        }
        if self.amount_paid.is_negative() || self.outstanding_amount.is_negative() {
            return Err(BillingError::InvariantViolation(format!(
                "line item {} has a negative balance (paid {}, outstanding {})",
                self.id, self.amount_paid, self.outstanding_amount
            )));
        }
        if self.amount_paid + self.outstanding_amount != self.amount {
            return Err(BillingError::InvariantViolation(format!(
                "line item {}: paid {} + outstanding {} != amount {}",
                self.id, self.amount_paid, self.outstanding_amount, self.amount
            )));
        }
        let expected = BillStatus::derive(self.amount_paid, self.outstanding_amount);
        if self.bill_status != expected {
            return Err(BillingError::InvariantViolation(format!(
                "line item {} is {:?} but its amounts imply {:?}",
                self.id, self.bill_status, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(amount: rust_decimal::Decimal) -> LineItem {
        LineItem::new(
            VisitId::new(),
            ServiceSnapshot::new("CONS-GP", "GP consultation").with_tag("consultation"),
            Money::new(amount),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = item(dec!(10000));
        assert_eq!(item.bill_status, BillStatus::Pending);
        assert_eq!(item.outstanding_amount, item.amount);
        assert!(item.payment_method.is_none());
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let result = LineItem::new(
            VisitId::new(),
            ServiceSnapshot::new("REG", "Registration"),
            Money::zero(),
            None,
        );
        assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut item = item(dec!(10000));
        let applied = item
            .apply_payment(Money::new(dec!(2000)), PaymentMethod::Cash, Utc::now())
            .unwrap();
        assert_eq!(applied, Money::new(dec!(2000)));
        assert_eq!(item.bill_status, BillStatus::PartiallyPaid);
        assert_eq!(item.outstanding_amount, Money::new(dec!(8000)));

        let applied = item
            .apply_payment(Money::new(dec!(20000)), PaymentMethod::Card, Utc::now())
            .unwrap();
        assert_eq!(applied, Money::new(dec!(8000)));
        assert_eq!(item.bill_status, BillStatus::Paid);
        assert_eq!(item.payment_method, Some(PaymentMethod::Card));
    }

    #[test]
    fn test_payment_on_settled_item_applies_nothing() {
        let mut item = item(dec!(500));
        item.apply_payment(Money::new(dec!(500)), PaymentMethod::Cash, Utc::now())
            .unwrap();
        let applied = item
            .apply_payment(Money::new(dec!(1)), PaymentMethod::Cash, Utc::now())
            .unwrap();
        assert!(applied.is_zero());
        assert_eq!(item.amount_paid, Money::new(dec!(500)));
    }

    #[test]
    fn test_check_invariants_detects_tampering() {
        let mut item = item(dec!(1000));
        item.amount_paid = Money::new(dec!(100));
        assert!(item.check_invariants().is_err());

        item.outstanding_amount = Money::new(dec!(900));
        assert!(item.check_invariants().is_err(), "status still PENDING");

        item.bill_status = BillStatus::PartiallyPaid;
        item.check_invariants().unwrap();
    }

    #[test]
    fn test_bill_status_derivation() {
        assert_eq!(BillStatus::derive(Money::zero(), Money::new(dec!(5))), BillStatus::Pending);
        assert_eq!(BillStatus::derive(Money::new(dec!(1)), Money::new(dec!(4))), BillStatus::PartiallyPaid);
        assert_eq!(BillStatus::derive(Money::new(dec!(5)), Money::zero()), BillStatus::Paid);
    }
}
