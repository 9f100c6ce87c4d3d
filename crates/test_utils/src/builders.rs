//! Test Data Builders
//!
//! Builder patterns for constructing ledger records with sensible defaults.
//! Tests set only the fields they care about.

use chrono::{DateTime, Duration, Utc};
use core_kernel::{ArtifactId, Money, VisitId};
use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use rust_decimal::Decimal;

use domain_billing::{
    ArtifactLink, ArtifactSnapshot, BillingReference, EntityType, LineItem, PaymentMethod, ServiceSnapshot,
};

use crate::fixtures::{MoneyFixtures, ServiceFixtures};

/// Random but well-formed customer email for checkout requests
pub fn fake_customer_email() -> String {
    SafeEmail().fake()
}

/// Builder for line items in any paid state
pub struct TestLineItemBuilder {
    visit_id: VisitId,
    service: ServiceSnapshot,
    amount: Money,
    paid: Money,
    method: PaymentMethod,
    artifact: Option<ArtifactLink>,
    created_at: Option<DateTime<Utc>>,
}

impl TestLineItemBuilder {
    /// Creates an unpaid consultation line item builder
    pub fn new(visit_id: VisitId) -> Self {
        Self {
            visit_id,
            service: ServiceFixtures::consultation(),
            amount: MoneyFixtures::consultation_fee(),
            paid: Money::zero(),
            method: PaymentMethod::Cash,
            artifact: None,
            created_at: None,
        }
    }

    pub fn with_service(mut self, service: ServiceSnapshot) -> Self {
        self.service = service;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Money::new(amount);
        self
    }

    /// Pre-applies `paid` with `method`
    pub fn paid(mut self, paid: Decimal, method: PaymentMethod) -> Self {
        self.paid = Money::new(paid);
        self.method = method;
        self
    }

    pub fn with_artifact(mut self, entity_type: EntityType, entity_id: ArtifactId) -> Self {
        self.artifact = Some(ArtifactLink { entity_type, entity_id });
        self
    }

    /// Backdates creation, which decides order among equal-priority items
    pub fn created_minutes_ago(mut self, minutes: i64) -> Self {
        self.created_at = Some(Utc::now() - Duration::minutes(minutes));
        self
    }

    /// Builds the line item
    ///
    /// # Panics
    ///
    /// Panics if the amounts are not a valid line item state
    pub fn build(self) -> LineItem {
        let mut item = LineItem::new(self.visit_id, self.service, self.amount, self.artifact)
            .expect("valid line item");
        if let Some(created_at) = self.created_at {
            item.created_at = created_at;
            item.updated_at = created_at;
        }
        if self.paid.is_positive() {
            let at = item.created_at;
            item.apply_payment(self.paid, self.method, at).expect("valid payment");
        }
        item
    }
}

/// Builder for clinical artifact projections
pub struct TestArtifactBuilder {
    entity_type: EntityType,
    entity_id: ArtifactId,
    visit_id: VisitId,
    line_item: Option<LineItem>,
    is_emergency: bool,
    is_completed: bool,
    catalog_price: Option<Money>,
    completed_at: Option<DateTime<Utc>>,
}

impl TestArtifactBuilder {
    /// A completed, non-emergency lab result with no line item
    pub fn new(visit_id: VisitId) -> Self {
        Self {
            entity_type: EntityType::LabResult,
            entity_id: ArtifactId::new(),
            visit_id,
            line_item: None,
            is_emergency: false,
            is_completed: true,
            catalog_price: Some(MoneyFixtures::lab_fee()),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn of_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = entity_type;
        self
    }

    pub fn billed_by(mut self, item: &LineItem) -> Self {
        self.line_item = Some(item.clone());
        self
    }

    pub fn emergency(mut self) -> Self {
        self.is_emergency = true;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.is_completed = false;
        self.completed_at = None;
        self
    }

    pub fn catalog_price(mut self, price: Option<Decimal>) -> Self {
        self.catalog_price = price.map(Money::new);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn build(self) -> ArtifactSnapshot {
        ArtifactSnapshot {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            reference: BillingReference {
                visit_id: self.visit_id,
                line_item_id: self.line_item.as_ref().map(|i| i.id),
                is_emergency: self.is_emergency,
                is_completed: self.is_completed,
                catalog_price: self.catalog_price,
            },
            completed_at: self.completed_at,
        }
    }
}
