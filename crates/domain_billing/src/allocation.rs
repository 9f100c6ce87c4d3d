//! Allocation Engine
//!
//! Distributes a cleared payment across a visit's outstanding line items.
//!
//! # Ordering
//!
//! Candidates are the line items with an outstanding balance, ranked by the
//! position of their service tag in `LedgerConfig::registration_priority_tags`
//! (registration, then consultation by default). Items with any other tag
//! follow, oldest first. Ties break on creation time, then id, so the walk
//! is deterministic.
//!
//! # Overpayment
//!
//! Money left after every candidate is settled is returned to the caller as
//! `remainder`. No line item's outstanding balance ever goes below zero.
//!
//! # Concurrency
//!
//! `allocate` locks the visit and its line items inside the caller's unit
//! of work, so two payments for the same visit are applied one after the
//! other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{AllocationId, LineItemId, Money, PaymentId, VisitId};

use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::line_item::LineItem;
use crate::payment::{Payment, PaymentMethod};
use crate::ports::LedgerUnitOfWork;
use crate::visit::refresh_visit_payment_status;

/// Journal row written for every amount applied to a line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub id: AllocationId,
    pub payment_id: Option<PaymentId>,
    pub visit_id: VisitId,
    pub line_item_id: LineItemId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub allocated_at: DateTime<Utc>,
}

/// What to do when the visit has nothing outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPolicy {
    /// Zero candidates is a no-op; the whole amount is returned as remainder
    Tolerant,
    /// Zero candidates fails with `NoOutstandingBalance`
    RequireOutstanding,
}

/// One step of an allocation plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAllocation {
    pub line_item_id: LineItemId,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub steps: Vec<PlannedAllocation>,
    pub remainder: Money,
}

/// Result of applying one payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub visit_id: VisitId,
    pub requested: Money,
    pub applied: Money,
    /// Unallocated overpayment, returned to the caller
    pub remainder: Money,
    /// Line items changed by this allocation, in allocation order
    pub updated: Vec<LineItem>,
    pub entries: Vec<AllocationEntry>,
}

/// Orders the outstanding line items for allocation
pub fn prioritize<'a>(items: &'a [LineItem], config: &LedgerConfig) -> Vec<&'a LineItem> {
    let mut candidates: Vec<&LineItem> = items.iter().filter(|i| i.has_outstanding()).collect();
    candidates.sort_by(|a, b| {
        config
            .priority_rank(a.tag())
            .cmp(&config.priority_rank(b.tag()))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.as_uuid().cmp(b.id.as_uuid()))
    });
    candidates
}

/// Computes how `amount` would be spread over `items` without mutating them
pub fn plan_allocation(items: &[LineItem], amount: Money, config: &LedgerConfig) -> AllocationPlan {
    let mut remaining = amount;
    let mut steps = Vec::new();

    for item in prioritize(items, config) {
        if !remaining.is_positive() {
            break;
        }
        let portion = remaining.min(item.outstanding_amount);
        steps.push(PlannedAllocation {
            line_item_id: item.id,
            amount: portion,
        });
        remaining -= portion;
    }

    AllocationPlan {
        steps,
        remainder: remaining,
    }
}

/// Applies payments to line items
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    config: Arc<LedgerConfig>,
}

impl AllocationEngine {
    pub fn new(config: Arc<LedgerConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Allocates `amount` across the visit's outstanding line items
    ///
    /// Runs inside the caller's unit of work; nothing is visible until the
    /// caller commits. Does not touch the visit's aggregate status.
    #[instrument(skip_all, fields(visit_id = %visit_id, amount = %amount, method = %method))]
    pub async fn allocate(
        &self,
        uow: &mut dyn LedgerUnitOfWork,
        visit_id: VisitId,
        amount: Money,
        method: PaymentMethod,
        payment_id: Option<PaymentId>,
        policy: AllocationPolicy,
    ) -> Result<AllocationOutcome, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::invalid_amount(format!(
                "allocation amount must be greater than zero, got {}",
                amount
            )));
        }
        let amount = self.config.validate_amount(amount.amount())?;

        uow.lock_visit(visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit_id))?;
        let mut items = uow.lock_line_items(visit_id).await?;

        let plan = plan_allocation(&items, amount, &self.config);
        if plan.steps.is_empty() {
            if policy == AllocationPolicy::RequireOutstanding {
                return Err(BillingError::NoOutstandingBalance(visit_id));
            }
            debug!("No outstanding line items; allocation is a no-op");
            return Ok(AllocationOutcome {
                visit_id,
                requested: amount,
                applied: Money::zero(),
                remainder: amount,
                updated: Vec::new(),
                entries: Vec::new(),
            });
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(plan.steps.len());
        let mut entries = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let item = items
                .iter_mut()
                .find(|i| i.id == step.line_item_id)
                .ok_or(BillingError::LineItemNotFound(step.line_item_id))?;

            let applied = item.apply_payment(step.amount, method, now)?;
            if applied != step.amount {
                return Err(BillingError::InvariantViolation(format!(
                    "planned {} for line item {} but applied {}",
                    step.amount, item.id, applied
                )));
            }
            uow.update_line_item(item).await?;

            let entry = AllocationEntry {
                id: AllocationId::new_v7(),
                payment_id,
                visit_id,
                line_item_id: item.id,
                amount: applied,
                method,
                allocated_at: now,
            };
            uow.insert_allocation(&entry).await?;

            updated.push(item.clone());
            entries.push(entry);
        }

        let applied: Money = entries.iter().map(|e| e.amount).sum();
        info!(
            applied = %applied,
            remainder = %plan.remainder,
            items = updated.len(),
            "Payment allocated"
        );

        Ok(AllocationOutcome {
            visit_id,
            requested: amount,
            applied,
            remainder: plan.remainder,
            updated,
            entries,
        })
    }

    /// Allocates a recorded payment exactly once
    ///
    /// This is the single entry point shared by desk payments, gateway
    /// settlements, and backfill. Returns `None` when the payment was
    /// already allocated. Also refreshes the visit's aggregate status.
    pub async fn settle_payment(
        &self,
        uow: &mut dyn LedgerUnitOfWork,
        payment: &Payment,
        policy: AllocationPolicy,
    ) -> Result<Option<AllocationOutcome>, BillingError> {
        if payment.is_allocated() {
            return Ok(None);
        }

        let now = Utc::now();
        if !uow.mark_payment_allocated(payment.id, now).await? {
            debug!(payment_id = %payment.id, "Payment already allocated");
            return Ok(None);
        }

        let outcome = self
            .allocate(
                uow,
                payment.visit_id,
                payment.amount,
                payment.method,
                Some(payment.id),
                policy,
            )
            .await?;

        if outcome.remainder.is_positive() {
            uow.set_payment_remainder(payment.id, outcome.remainder).await?;
        }
        refresh_visit_payment_status(uow, payment.visit_id).await?;

        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::ServiceSnapshot;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn item_at(visit_id: VisitId, tag: Option<&str>, amount: i64, minutes: i64) -> LineItem {
        let mut snapshot = ServiceSnapshot::new(format!("SVC-{}", minutes), "Service");
        snapshot.tag = tag.map(str::to_string);
        let mut item = LineItem::new(visit_id, snapshot, Money::new(amount.into()), None).unwrap();
        item.created_at = Utc::now() + Duration::minutes(minutes);
        item
    }

    #[test]
    fn test_prioritize_orders_by_tag_then_age() {
        let visit = VisitId::new();
        let items = vec![
            item_at(visit, Some("lab"), 3000, 0),
            item_at(visit, Some("consultation"), 10000, 1),
            item_at(visit, None, 2000, 2),
            item_at(visit, Some("registration"), 5000, 3),
        ];
        let order: Vec<_> = prioritize(&items, &LedgerConfig::default())
            .into_iter()
            .map(|i| i.amount)
            .collect();
        assert_eq!(
            order,
            vec![
                Money::new(dec!(5000)),
                Money::new(dec!(10000)),
                Money::new(dec!(3000)),
                Money::new(dec!(2000)),
            ]
        );
    }

    #[test]
    fn test_plan_skips_settled_items() {
        let visit = VisitId::new();
        let mut items = vec![
            item_at(visit, Some("registration"), 5000, 0),
            item_at(visit, Some("consultation"), 10000, 1),
        ];
        items[0]
            .apply_payment(Money::new(dec!(5000)), PaymentMethod::Cash, Utc::now())
            .unwrap();

        let plan = plan_allocation(&items, Money::new(dec!(20000)), &LedgerConfig::default());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].line_item_id, items[1].id);
        assert_eq!(plan.remainder, Money::new(dec!(10000)));
    }

    #[test]
    fn test_plan_stops_when_money_runs_out() {
        let visit = VisitId::new();
        let items = vec![
            item_at(visit, Some("registration"), 5000, 0),
            item_at(visit, Some("consultation"), 10000, 1),
            item_at(visit, None, 2000, 2),
        ];
        let plan = plan_allocation(&items, Money::new(dec!(7000)), &LedgerConfig::default());
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].amount, Money::new(dec!(2000)));
        assert!(plan.remainder.is_zero());
    }

    #[test]
    fn test_plan_with_custom_priorities() {
        let visit = VisitId::new();
        let items = vec![
            item_at(visit, Some("registration"), 5000, 0),
            item_at(visit, Some("pharmacy"), 1000, 1),
        ];
        let config = LedgerConfig {
            registration_priority_tags: vec!["pharmacy".to_string()],
            ..Default::default()
        };
        let plan = plan_allocation(&items, Money::new(dec!(1000)), &config);
        assert_eq!(plan.steps[0].line_item_id, items[1].id);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::line_item::ServiceSnapshot;
    use proptest::prelude::*;

    const TAGS: [Option<&str>; 4] = [Some("registration"), Some("consultation"), Some("lab"), None];

    fn items_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
        prop::collection::vec((0usize..4, 1i64..5_000_000), 0..8)
    }

    fn build(visit: VisitId, specs: &[(usize, i64)]) -> Vec<LineItem> {
        specs
            .iter()
            .enumerate()
            .map(|(n, (tag, minor))| {
                let mut snapshot = ServiceSnapshot::new(format!("SVC-{}", n), "Service");
                snapshot.tag = TAGS[*tag].map(str::to_string);
                LineItem::new(visit, snapshot, Money::from_minor(*minor), None).unwrap()
            })
            .collect()
    }

    proptest! {
        #[test]
        fn plan_conserves_money(specs in items_strategy(), payment in 1i64..20_000_000) {
            let items = build(VisitId::new(), &specs);
            let amount = Money::from_minor(payment);
            let plan = plan_allocation(&items, amount, &LedgerConfig::default());

            let planned: Money = plan.steps.iter().map(|s| s.amount).sum();
            prop_assert_eq!(planned + plan.remainder, amount);
            prop_assert!(!plan.remainder.is_negative());
            for step in &plan.steps {
                let item = items.iter().find(|i| i.id == step.line_item_id).unwrap();
                prop_assert!(step.amount <= item.outstanding_amount);
                prop_assert!(step.amount.is_positive());
            }
        }

        #[test]
        fn plan_exhausts_higher_priority_first(specs in items_strategy(), payment in 1i64..20_000_000) {
            let config = LedgerConfig::default();
            let items = build(VisitId::new(), &specs);
            let plan = plan_allocation(&items, Money::from_minor(payment), &config);

            // Every step except the last must settle its item completely.
            for step in plan.steps.iter().rev().skip(1) {
                let item = items.iter().find(|i| i.id == step.line_item_id).unwrap();
                prop_assert_eq!(step.amount, item.outstanding_amount);
            }
            let ranks: Vec<usize> = plan
                .steps
                .iter()
                .map(|s| items.iter().find(|i| i.id == s.line_item_id).unwrap())
                .map(|i| config.priority_rank(i.tag()))
                .collect();
            prop_assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
