//! Billing Ledger Ports
//!
//! Storage is reached through a unit of work: `LedgerStore::begin` opens
//! one atomic scope, every read and write happens on it, and nothing is
//! visible to others until `commit`. Dropping a unit of work without
//! committing discards all of its writes.
//!
//! - **PostgreSQL adapter** (infra_db): one database transaction per unit;
//!   `lock_*` methods use `SELECT ... FOR UPDATE`.
//! - **In-memory adapter** (`crate::memory`): units are serialised and
//!   work on a private copy of the state.
//!
//! Conditional transitions (`claim_payment_intent`, `resolve_leak`,
//! `finalize_reconciliation`, `mark_payment_allocated`) are single atomic
//! check-and-set operations. They return `None`/`false` when the guard did
//! not hold instead of failing, so callers can report the existing state.
//!
//! ```rust,ignore
//! let mut uow = store.begin().await?;
//! let outcome = engine.allocate(uow.as_mut(), visit_id, amount, method, None, policy).await?;
//! uow.commit().await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use core_kernel::{
    ArtifactId, DayWindow, DomainPort, HealthCheckable, LeakRecordId, LineItemId, Money,
    PaymentId, PortError, UserId, VisitId,
};

use crate::allocation::AllocationEntry;
use crate::artifact::EntityType;
use crate::gateway::intent::PaymentIntent;
use crate::leak::LeakRecord;
use crate::line_item::LineItem;
use crate::payment::Payment;
use crate::reconciliation::DailyReconciliation;
use crate::visit::Visit;

/// Entry point to ledger storage
#[async_trait]
pub trait LedgerStore: DomainPort + HealthCheckable {
    /// Opens a new atomic unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, PortError>;
}

/// One atomic scope over ledger storage
#[async_trait]
pub trait LedgerUnitOfWork: Send {
    // ------------------------------------------------------------------
    // Visits
    // ------------------------------------------------------------------

    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), PortError>;

    async fn get_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError>;

    /// Reads the visit and holds its lock until the unit ends
    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError>;

    async fn update_visit(&mut self, visit: &Visit) -> Result<(), PortError>;

    // ------------------------------------------------------------------
    // Line items
    // ------------------------------------------------------------------

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), PortError>;

    async fn get_line_item(&mut self, id: LineItemId) -> Result<Option<LineItem>, PortError>;

    /// All line items of a visit, oldest first
    async fn line_items_for_visit(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError>;

    /// Like `line_items_for_visit`, holding row locks until the unit ends
    async fn lock_line_items(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError>;

    /// Persists new paid/outstanding state; `amount_paid` may never decrease
    async fn update_line_item(&mut self, item: &LineItem) -> Result<(), PortError>;

    async fn insert_allocation(&mut self, entry: &AllocationEntry) -> Result<(), PortError>;

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Inserts the payment unless one with the same reference exists.
    /// Returns the stored payment and whether it was created.
    async fn get_or_create_payment(&mut self, payment: &Payment) -> Result<(Payment, bool), PortError>;

    async fn get_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, PortError>;

    async fn get_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, PortError>;

    /// Stamps `allocated_at` only if it is still unset
    async fn mark_payment_allocated(&mut self, id: PaymentId, at: DateTime<Utc>) -> Result<bool, PortError>;

    async fn set_payment_remainder(&mut self, id: PaymentId, remainder: Money) -> Result<(), PortError>;

    /// Payments never run through allocation, oldest first
    async fn unallocated_payments(&mut self, limit: u32) -> Result<Vec<Payment>, PortError>;

    // ------------------------------------------------------------------
    // Payment intents
    // ------------------------------------------------------------------

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), PortError>;

    async fn find_payment_intent(&mut self, reference: &str) -> Result<Option<PaymentIntent>, PortError>;

    /// INITIALIZED -> VERIFIED; `None` if the intent was not INITIALIZED
    async fn claim_payment_intent(
        &mut self,
        reference: &str,
        verified_at: DateTime<Utc>,
        gateway_transaction_id: Option<&str>,
    ) -> Result<Option<PaymentIntent>, PortError>;

    /// INITIALIZED -> FAILED; `None` if the intent was not INITIALIZED
    async fn fail_payment_intent(
        &mut self,
        reference: &str,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<Option<PaymentIntent>, PortError>;

    /// Records which payment settled a verified intent
    async fn link_payment_intent(&mut self, reference: &str, payment_id: PaymentId) -> Result<(), PortError>;

    // ------------------------------------------------------------------
    // Leak records
    // ------------------------------------------------------------------

    async fn find_unresolved_leak(
        &mut self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<LeakRecord>, PortError>;

    /// Inserts the record unless an unresolved one exists for the same
    /// artifact, in which case the existing record is returned
    async fn insert_leak_if_absent(&mut self, leak: &LeakRecord) -> Result<LeakRecord, PortError>;

    async fn get_leak(&mut self, id: LeakRecordId) -> Result<Option<LeakRecord>, PortError>;

    /// Stamps the resolution only if the record is still unresolved
    async fn resolve_leak(
        &mut self,
        id: LeakRecordId,
        resolved_by: UserId,
        notes: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<LeakRecord>, PortError>;

    async fn leaks_detected_between(&mut self, window: &DayWindow) -> Result<Vec<LeakRecord>, PortError>;

    // ------------------------------------------------------------------
    // Daily reconciliation
    // ------------------------------------------------------------------

    async fn find_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError>;

    /// Inserts a draft unless a record exists for its date.
    /// Returns the stored record and whether it was created.
    async fn get_or_create_reconciliation(
        &mut self,
        draft: &DailyReconciliation,
    ) -> Result<(DailyReconciliation, bool), PortError>;

    async fn lock_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError>;

    /// Writes recomputed totals. Fails with `PortError::Conflict` when the
    /// stored record is finalized.
    async fn update_reconciliation(&mut self, reconciliation: &DailyReconciliation) -> Result<(), PortError>;

    /// DRAFT -> FINALIZED; `None` if the record was not DRAFT
    async fn finalize_reconciliation(
        &mut self,
        date: NaiveDate,
        finalized_by: UserId,
        finalized_at: DateTime<Utc>,
    ) -> Result<Option<DailyReconciliation>, PortError>;

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    async fn allocations_between(&mut self, window: &DayWindow) -> Result<Vec<AllocationEntry>, PortError>;

    /// Visits with an allocation or a new line item inside the window
    async fn visits_with_activity_between(&mut self, window: &DayWindow) -> Result<Vec<VisitId>, PortError>;

    /// Makes every write of this unit durable
    async fn commit(&mut self) -> Result<(), PortError>;
}

/// Write-only audit trail
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &str, actor: Option<&UserId>, resource: &str);
}

/// Audit sink that emits structured events on the `audit` tracing target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &str, actor: Option<&UserId>, resource: &str) {
        let actor = actor.map(ToString::to_string).unwrap_or_else(|| "system".to_string());
        info!(target: "audit", event = %event, actor = %actor, resource = %resource, "audit");
    }
}
