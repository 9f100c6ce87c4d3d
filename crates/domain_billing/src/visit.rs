//! Visit projection and billing read model
//!
//! The ledger only needs a narrow view of a visit: who it is for, whether
//! it is still open, and its aggregate payment status. The aggregate is
//! always recomputed from the visit's line items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{Money, PatientId, VisitId};

use crate::error::BillingError;
use crate::line_item::{BillStatus, LineItem};
use crate::ports::LedgerUnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Active,
    Closed,
}

/// Aggregate payment state of a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitPaymentStatus {
    /// No line items yet
    Unbilled,
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl VisitPaymentStatus {
    pub fn from_items(items: &[LineItem]) -> Self {
        if items.is_empty() {
            return VisitPaymentStatus::Unbilled;
        }
        if items.iter().all(|i| i.bill_status == BillStatus::Paid) {
            VisitPaymentStatus::Paid
        } else if items.iter().all(|i| i.bill_status == BillStatus::Pending) {
            VisitPaymentStatus::Unpaid
        } else {
            VisitPaymentStatus::PartiallyPaid
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient_id: PatientId,
    pub status: VisitStatus,
    pub payment_status: VisitPaymentStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    pub fn open(patient_id: PatientId) -> Self {
        let now = Utc::now();
        Self {
            id: VisitId::new_v7(),
            patient_id,
            status: VisitStatus::Active,
            payment_status: VisitPaymentStatus::Unbilled,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VisitStatus::Active
    }

    /// Closes the visit; closing is one-way
    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), BillingError> {
        if !self.is_active() {
            return Err(BillingError::VisitClosed(self.id));
        }
        self.status = VisitStatus::Closed;
        self.closed_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// Read-side totals for one visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSummary {
    pub visit_id: VisitId,
    pub total_billed: Money,
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub pending_items: usize,
    pub partially_paid_items: usize,
    pub paid_items: usize,
    pub payment_status: VisitPaymentStatus,
}

/// Computes the billing summary of a visit from its line items
pub fn compute_billing_summary(visit_id: VisitId, items: &[LineItem]) -> BillingSummary {
    let count = |status: BillStatus| items.iter().filter(|i| i.bill_status == status).count();

    BillingSummary {
        visit_id,
        total_billed: items.iter().map(|i| i.amount).sum(),
        total_paid: items.iter().map(|i| i.amount_paid).sum(),
        total_outstanding: items.iter().map(|i| i.outstanding_amount).sum(),
        pending_items: count(BillStatus::Pending),
        partially_paid_items: count(BillStatus::PartiallyPaid),
        paid_items: count(BillStatus::Paid),
        payment_status: VisitPaymentStatus::from_items(items),
    }
}

/// Recomputes and stores a visit's aggregate payment status
pub async fn refresh_visit_payment_status(
    uow: &mut dyn LedgerUnitOfWork,
    visit_id: VisitId,
) -> Result<VisitPaymentStatus, BillingError> {
    let mut visit = uow
        .get_visit(visit_id)
        .await?
        .ok_or(BillingError::VisitNotFound(visit_id))?;
    let items = uow.line_items_for_visit(visit_id).await?;
    let status = VisitPaymentStatus::from_items(&items);

    if visit.payment_status != status {
        visit.payment_status = status;
        visit.updated_at = Utc::now();
        uow.update_visit(&visit).await?;
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::ServiceSnapshot;
    use crate::payment::PaymentMethod;
    use rust_decimal_macros::dec;

    fn items(visit_id: VisitId) -> Vec<LineItem> {
        vec![
            LineItem::new(
                visit_id,
                ServiceSnapshot::new("REG", "Registration").with_tag("registration"),
                Money::new(dec!(5000)),
                None,
            )
            .unwrap(),
            LineItem::new(
                visit_id,
                ServiceSnapshot::new("CONS", "Consultation").with_tag("consultation"),
                Money::new(dec!(10000)),
                None,
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_empty_visit_is_unbilled() {
        let summary = compute_billing_summary(VisitId::new(), &[]);
        assert_eq!(summary.payment_status, VisitPaymentStatus::Unbilled);
        assert!(summary.total_billed.is_zero());
    }

    #[test]
    fn test_summary_totals() {
        let visit_id = VisitId::new();
        let mut items = items(visit_id);
        items[0]
            .apply_payment(Money::new(dec!(5000)), PaymentMethod::Cash, Utc::now())
            .unwrap();
        items[1]
            .apply_payment(Money::new(dec!(2000)), PaymentMethod::Cash, Utc::now())
            .unwrap();

        let summary = compute_billing_summary(visit_id, &items);
        assert_eq!(summary.total_billed, Money::new(dec!(15000)));
        assert_eq!(summary.total_paid, Money::new(dec!(7000)));
        assert_eq!(summary.total_outstanding, Money::new(dec!(8000)));
        assert_eq!(summary.paid_items, 1);
        assert_eq!(summary.partially_paid_items, 1);
        assert_eq!(summary.payment_status, VisitPaymentStatus::PartiallyPaid);
    }

    #[test]
    fn test_close_is_one_way() {
        let mut visit = Visit::open(PatientId::new());
        visit.close(Utc::now()).unwrap();
        assert_eq!(visit.status, VisitStatus::Closed);
        assert!(matches!(visit.close(Utc::now()), Err(BillingError::VisitClosed(_))));
    }
}
