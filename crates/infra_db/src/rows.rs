//! Row types and their conversion into domain records
//!
//! Status and method columns are stored as the same SCREAMING_SNAKE_CASE
//! names the domain enums serialize to, so decoding goes through serde.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use core_kernel::{
    AllocationId, ArtifactId, LeakRecordId, LineItemId, Money, PatientId, PaymentId, PaymentIntentId,
    ReconciliationId, ServiceId, UserId, VisitId,
};
use domain_billing::{
    AllocationEntry, ArtifactLink, BillingReference, DailyReconciliation, EntityType, LeakRecord, LineItem,
    Payment, PaymentIntent, ReconciliationParts, ReconciliationTotals, ServiceSnapshot, Visit,
};

use crate::error::DatabaseError;

/// Decodes a text column into one of the domain's wire-named enums
pub(crate) fn decode_enum<T: DeserializeOwned>(column: &str, value: &str) -> Result<T, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(value.to_owned()))
        .map_err(|_| DatabaseError::Decode(format!("unexpected {} value '{}'", column, value)))
}

/// Encodes a domain enum as its wire name for a text column
pub(crate) fn encode_enum<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        Ok(other) => Err(DatabaseError::Decode(format!("not a unit enum: {}", other))),
        Err(e) => Err(DatabaseError::Decode(e.to_string())),
    }
}

fn to_u32(column: &str, value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{} is negative: {}", column, value)))
}

pub(crate) fn to_i32(column: &str, value: u32) -> Result<i32, DatabaseError> {
    i32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{} out of range: {}", column, value)))
}

// ============================================================================
// Visits
// ============================================================================

pub(crate) const VISIT_COLUMNS: &str =
    "visit_id, patient_id, status, payment_status, opened_at, closed_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VisitRow {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for Visit {
    type Error = DatabaseError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: VisitId::from_uuid(row.visit_id),
            patient_id: PatientId::from_uuid(row.patient_id),
            status: decode_enum("visits.status", &row.status)?,
            payment_status: decode_enum("visits.payment_status", &row.payment_status)?,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Line items
// ============================================================================

pub(crate) const LINE_ITEM_COLUMNS: &str = "line_item_id, visit_id, service_id, service_code, service_name, \
     service_tag, amount, amount_paid, outstanding_amount, bill_status, payment_method, artifact_type, \
     artifact_id, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LineItemRow {
    pub line_item_id: Uuid,
    pub visit_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_code: String,
    pub service_name: String,
    pub service_tag: Option<String>,
    pub amount: Decimal,
    pub amount_paid: Decimal,
    pub outstanding_amount: Decimal,
    pub bill_status: String,
    pub payment_method: Option<String>,
    pub artifact_type: Option<String>,
    pub artifact_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = DatabaseError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        let artifact = match (row.artifact_type, row.artifact_id) {
            (Some(entity_type), Some(entity_id)) => Some(ArtifactLink {
                entity_type: decode_enum("line_items.artifact_type", &entity_type)?,
                entity_id: ArtifactId::from_uuid(entity_id),
            }),
            _ => None,
        };
        let payment_method = row
            .payment_method
            .as_deref()
            .map(|m| decode_enum("line_items.payment_method", m))
            .transpose()?;

        Ok(LineItem {
            id: LineItemId::from_uuid(row.line_item_id),
            visit_id: VisitId::from_uuid(row.visit_id),
            service: ServiceSnapshot {
                service_id: row.service_id.map(ServiceId::from_uuid),
                code: row.service_code,
                name: row.service_name,
                tag: row.service_tag,
            },
            amount: Money::new(row.amount),
            amount_paid: Money::new(row.amount_paid),
            outstanding_amount: Money::new(row.outstanding_amount),
            bill_status: decode_enum("line_items.bill_status", &row.bill_status)?,
            payment_method,
            artifact,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Allocations and payments
// ============================================================================

pub(crate) const ALLOCATION_COLUMNS: &str =
    "allocation_id, payment_id, visit_id, line_item_id, amount, method, allocated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AllocationRow {
    pub allocation_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub visit_id: Uuid,
    pub line_item_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub allocated_at: DateTime<Utc>,
}

impl TryFrom<AllocationRow> for AllocationEntry {
    type Error = DatabaseError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        Ok(AllocationEntry {
            id: AllocationId::from_uuid(row.allocation_id),
            payment_id: row.payment_id.map(PaymentId::from_uuid),
            visit_id: VisitId::from_uuid(row.visit_id),
            line_item_id: LineItemId::from_uuid(row.line_item_id),
            amount: Money::new(row.amount),
            method: decode_enum("allocations.method", &row.method)?,
            allocated_at: row.allocated_at,
        })
    }
}

pub(crate) const PAYMENT_COLUMNS: &str = "payment_id, visit_id, reference, amount, method, received_by, \
     allocated_at, unallocated_remainder, created_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    pub payment_id: Uuid,
    pub visit_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub method: String,
    pub received_by: Option<Uuid>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub unallocated_remainder: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.payment_id),
            visit_id: VisitId::from_uuid(row.visit_id),
            reference: row.reference,
            amount: Money::new(row.amount),
            method: decode_enum("payments.method", &row.method)?,
            received_by: row.received_by.map(UserId::from_uuid),
            allocated_at: row.allocated_at,
            unallocated_remainder: Money::new(row.unallocated_remainder),
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Payment intents
// ============================================================================

pub(crate) const INTENT_COLUMNS: &str = "intent_id, visit_id, reference, amount, status, customer_email, \
     gateway_transaction_id, failure_reason, payment_id, created_at, verified_at, failed_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentIntentRow {
    pub intent_id: Uuid,
    pub visit_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub status: String,
    pub customer_email: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentIntentRow> for PaymentIntent {
    type Error = DatabaseError;

    fn try_from(row: PaymentIntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            id: PaymentIntentId::from_uuid(row.intent_id),
            visit_id: VisitId::from_uuid(row.visit_id),
            reference: row.reference,
            amount: Money::new(row.amount),
            status: decode_enum("payment_intents.status", &row.status)?,
            customer_email: row.customer_email,
            gateway_transaction_id: row.gateway_transaction_id,
            failure_reason: row.failure_reason,
            payment_id: row.payment_id.map(PaymentId::from_uuid),
            created_at: row.created_at,
            verified_at: row.verified_at,
            failed_at: row.failed_at,
        })
    }
}

// ============================================================================
// Leak records
// ============================================================================

pub(crate) const LEAK_COLUMNS: &str = "leak_id, entity_type, entity_id, visit_id, line_item_id, estimated_loss, \
     detected_at, resolved_at, resolved_by, resolution_notes";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LeakRow {
    pub leak_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub visit_id: Uuid,
    pub line_item_id: Option<Uuid>,
    pub estimated_loss: Decimal,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolution_notes: Option<String>,
}

impl TryFrom<LeakRow> for LeakRecord {
    type Error = DatabaseError;

    fn try_from(row: LeakRow) -> Result<Self, Self::Error> {
        Ok(LeakRecord {
            id: LeakRecordId::from_uuid(row.leak_id),
            entity_type: decode_enum::<EntityType>("leak_records.entity_type", &row.entity_type)?,
            entity_id: ArtifactId::from_uuid(row.entity_id),
            visit_id: VisitId::from_uuid(row.visit_id),
            line_item_id: row.line_item_id.map(LineItemId::from_uuid),
            estimated_loss: Money::new(row.estimated_loss),
            detected_at: row.detected_at,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by.map(UserId::from_uuid),
            resolution_notes: row.resolution_notes,
        })
    }
}

// ============================================================================
// Daily reconciliations
// ============================================================================

pub(crate) const RECONCILIATION_COLUMNS: &str = "reconciliation_id, reconciliation_date, status, total_revenue, \
     total_cash, total_wallet, total_card, total_visits, active_visits_closed, prepared_by, finalized_by, \
     finalized_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReconciliationRow {
    pub reconciliation_id: Uuid,
    pub reconciliation_date: NaiveDate,
    pub status: String,
    pub total_revenue: Decimal,
    pub total_cash: Decimal,
    pub total_wallet: Decimal,
    pub total_card: Decimal,
    pub total_visits: i32,
    pub active_visits_closed: i32,
    pub prepared_by: Option<Uuid>,
    pub finalized_by: Option<Uuid>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReconciliationRow> for DailyReconciliation {
    type Error = DatabaseError;

    fn try_from(row: ReconciliationRow) -> Result<Self, Self::Error> {
        Ok(DailyReconciliation::restore(ReconciliationParts {
            id: ReconciliationId::from_uuid(row.reconciliation_id),
            reconciliation_date: row.reconciliation_date,
            status: decode_enum("daily_reconciliations.status", &row.status)?,
            totals: ReconciliationTotals {
                total_revenue: Money::new(row.total_revenue),
                total_cash: Money::new(row.total_cash),
                total_wallet: Money::new(row.total_wallet),
                total_card: Money::new(row.total_card),
                total_visits: to_u32("total_visits", row.total_visits)?,
                active_visits_closed: to_u32("active_visits_closed", row.active_visits_closed)?,
            },
            prepared_by: row.prepared_by.map(UserId::from_uuid),
            finalized_by: row.finalized_by.map(UserId::from_uuid),
            finalized_at: row.finalized_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

// ============================================================================
// Clinical projection
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BillingReferenceRow {
    pub visit_id: Uuid,
    pub line_item_id: Option<Uuid>,
    pub is_emergency: bool,
    pub is_completed: bool,
    pub catalog_price: Option<Decimal>,
}

impl From<BillingReferenceRow> for BillingReference {
    fn from(row: BillingReferenceRow) -> Self {
        BillingReference {
            visit_id: VisitId::from_uuid(row.visit_id),
            line_item_id: row.line_item_id.map(LineItemId::from_uuid),
            is_emergency: row.is_emergency,
            is_completed: row.is_completed,
            catalog_price: row.catalog_price.map(Money::new),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArtifactRefRow {
    pub entity_type: String,
    pub entity_id: Uuid,
}

impl TryFrom<ArtifactRefRow> for ArtifactLink {
    type Error = DatabaseError;

    fn try_from(row: ArtifactRefRow) -> Result<Self, Self::Error> {
        Ok(ArtifactLink {
            entity_type: decode_enum("clinical_billing_references.entity_type", &row.entity_type)?,
            entity_id: ArtifactId::from_uuid(row.entity_id),
        })
    }
}
