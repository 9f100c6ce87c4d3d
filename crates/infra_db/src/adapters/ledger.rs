//! PostgreSQL Ledger Adapter
//!
//! Implements the `LedgerStore` port on PostgreSQL.
//!
//! # Overview
//!
//! Every `begin` opens one database transaction, held by a [`PgUnitOfWork`].
//! Dropping the unit without calling `commit` rolls the transaction back.
//!
//! - `lock_visit`, `lock_line_items` and `lock_reconciliation` use
//!   `SELECT ... FOR UPDATE`, so two allocations for the same visit run one
//!   after the other.
//! - Idempotent inserts use `INSERT ... ON CONFLICT DO NOTHING RETURNING`
//!   and fall back to reading the existing row.
//! - Exactly-once transitions are conditional updates
//!   (`WHERE status = 'INITIALIZED'`, `WHERE allocated_at IS NULL`, ...);
//!   zero affected rows means another unit got there first.
//!
//! # Error Handling
//!
//! SQLx errors go through `DatabaseError` and come out as `PortError`.
//! The schema's guard triggers raise `check_violation`, which surfaces as
//! `PortError::Validation`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::PgLedgerStore;
//! use domain_billing::LedgerStore;
//!
//! let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
//! let mut uow = store.begin().await?;
//! let items = uow.lock_line_items(visit_id).await?;
//! uow.commit().await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_kernel::{
    ArtifactId, DayWindow, DomainPort, HealthCheckResult, HealthCheckable, LeakRecordId, LineItemId, Money,
    PaymentId, PortError, UserId, VisitId,
};
use domain_billing::{
    AllocationEntry, DailyReconciliation, EntityType, LeakRecord, LedgerStore, LedgerUnitOfWork, LineItem,
    Payment, PaymentIntent, Visit,
};

use crate::error::{port_error, DatabaseError};
use crate::rows::{
    encode_enum, to_i32, AllocationRow, LeakRow, LineItemRow, PaymentIntentRow, PaymentRow, ReconciliationRow,
    VisitRow, ALLOCATION_COLUMNS, INTENT_COLUMNS, LEAK_COLUMNS, LINE_ITEM_COLUMNS, PAYMENT_COLUMNS,
    RECONCILIATION_COLUMNS, VISIT_COLUMNS,
};

/// PostgreSQL-backed implementation of the `LedgerStore` port
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl DomainPort for PgLedgerStore {}

#[async_trait]
impl HealthCheckable for PgLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy("postgres-ledger-store", latency_ms),
            Err(e) => HealthCheckResult::unhealthy("postgres-ledger-store", latency_ms, e.to_string()),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, PortError> {
        let tx = self.pool.begin().await.map_err(port_error)?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }
}

/// One ledger unit of work on a PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection, PortError> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| PortError::internal("unit of work already committed"))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, PortError> {
    encode_enum(value).map_err(PortError::from)
}

fn convert<R, T>(row: R) -> Result<T, PortError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    T::try_from(row).map_err(PortError::from)
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, PortError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(convert).collect()
}

fn check_line_item(item: &LineItem) -> Result<(), PortError> {
    item.check_invariants()
        .map_err(|e| PortError::validation_field(e.to_string(), "line_item"))
}

#[async_trait]
impl LedgerUnitOfWork for PgUnitOfWork {
    // ------------------------------------------------------------------
    // Visits
    // ------------------------------------------------------------------

    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), PortError> {
        let status = encode(&visit.status)?;
        let payment_status = encode(&visit.payment_status)?;
        sqlx::query(
            "INSERT INTO visits (visit_id, patient_id, status, payment_status, opened_at, closed_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*visit.id.as_uuid())
        .bind(*visit.patient_id.as_uuid())
        .bind(status)
        .bind(payment_status)
        .bind(visit.opened_at)
        .bind(visit.closed_at)
        .bind(visit.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;
        Ok(())
    }

    async fn get_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError> {
        let sql = format!("SELECT {} FROM visits WHERE visit_id = $1", VISIT_COLUMNS);
        let row = sqlx::query_as::<_, VisitRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError> {
        let sql = format!("SELECT {} FROM visits WHERE visit_id = $1 FOR UPDATE", VISIT_COLUMNS);
        let row = sqlx::query_as::<_, VisitRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn update_visit(&mut self, visit: &Visit) -> Result<(), PortError> {
        let status = encode(&visit.status)?;
        let payment_status = encode(&visit.payment_status)?;
        let result = sqlx::query(
            "UPDATE visits SET status = $2, payment_status = $3, closed_at = $4, updated_at = $5 \
             WHERE visit_id = $1",
        )
        .bind(*visit.id.as_uuid())
        .bind(status)
        .bind(payment_status)
        .bind(visit.closed_at)
        .bind(visit.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Visit", visit.id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Line items
    // ------------------------------------------------------------------

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), PortError> {
        check_line_item(item)?;
        let bill_status = encode(&item.bill_status)?;
        let payment_method = item.payment_method.as_ref().map(encode).transpose()?;
        let artifact_type = item.artifact.map(|a| a.entity_type.as_str());
        let artifact_id = item.artifact.map(|a| *a.entity_id.as_uuid());

        sqlx::query(
            "INSERT INTO line_items (line_item_id, visit_id, service_id, service_code, service_name, service_tag, \
             amount, amount_paid, outstanding_amount, bill_status, payment_method, artifact_type, artifact_id, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(*item.id.as_uuid())
        .bind(*item.visit_id.as_uuid())
        .bind(item.service.service_id.map(|s| *s.as_uuid()))
        .bind(&item.service.code)
        .bind(&item.service.name)
        .bind(&item.service.tag)
        .bind(item.amount.amount())
        .bind(item.amount_paid.amount())
        .bind(item.outstanding_amount.amount())
        .bind(bill_status)
        .bind(payment_method)
        .bind(artifact_type)
        .bind(artifact_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;

        debug!(line_item_id = %item.id, "Line item inserted");
        Ok(())
    }

    async fn get_line_item(&mut self, id: LineItemId) -> Result<Option<LineItem>, PortError> {
        let sql = format!("SELECT {} FROM line_items WHERE line_item_id = $1", LINE_ITEM_COLUMNS);
        let row = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn line_items_for_visit(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError> {
        let sql = format!(
            "SELECT {} FROM line_items WHERE visit_id = $1 ORDER BY created_at, line_item_id",
            LINE_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(*visit_id.as_uuid())
            .fetch_all(self.conn()?)
            .await
            .map_err(port_error)?;
        convert_all(rows)
    }

    async fn lock_line_items(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError> {
        let sql = format!(
            "SELECT {} FROM line_items WHERE visit_id = $1 ORDER BY created_at, line_item_id FOR UPDATE",
            LINE_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(*visit_id.as_uuid())
            .fetch_all(self.conn()?)
            .await
            .map_err(port_error)?;
        convert_all(rows)
    }

    async fn update_line_item(&mut self, item: &LineItem) -> Result<(), PortError> {
        check_line_item(item)?;
        let bill_status = encode(&item.bill_status)?;
        let payment_method = item.payment_method.as_ref().map(encode).transpose()?;

        let result = sqlx::query(
            "UPDATE line_items SET amount_paid = $2, outstanding_amount = $3, bill_status = $4, \
             payment_method = $5, updated_at = $6 WHERE line_item_id = $1",
        )
        .bind(*item.id.as_uuid())
        .bind(item.amount_paid.amount())
        .bind(item.outstanding_amount.amount())
        .bind(bill_status)
        .bind(payment_method)
        .bind(item.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::not_found("LineItem", item.id));
        }
        Ok(())
    }

    async fn insert_allocation(&mut self, entry: &AllocationEntry) -> Result<(), PortError> {
        let method = encode(&entry.method)?;
        sqlx::query(
            "INSERT INTO allocations (allocation_id, payment_id, visit_id, line_item_id, amount, method, allocated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*entry.id.as_uuid())
        .bind(entry.payment_id.map(|p| *p.as_uuid()))
        .bind(*entry.visit_id.as_uuid())
        .bind(*entry.line_item_id.as_uuid())
        .bind(entry.amount.amount())
        .bind(method)
        .bind(entry.allocated_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    async fn get_or_create_payment(&mut self, payment: &Payment) -> Result<(Payment, bool), PortError> {
        let method = encode(&payment.method)?;
        let sql = format!(
            "INSERT INTO payments (payment_id, visit_id, reference, amount, method, received_by, allocated_at, \
             unallocated_remainder, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (reference) DO NOTHING \
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(*payment.id.as_uuid())
            .bind(*payment.visit_id.as_uuid())
            .bind(&payment.reference)
            .bind(payment.amount.amount())
            .bind(method)
            .bind(payment.received_by.map(|u| *u.as_uuid()))
            .bind(payment.allocated_at)
            .bind(payment.unallocated_remainder.amount())
            .bind(payment.created_at)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;

        if let Some(row) = inserted {
            return Ok((convert(row)?, true));
        }

        debug!(reference = %payment.reference, "Payment reference already recorded");
        let existing = self
            .get_payment_by_reference(&payment.reference)
            .await?
            .ok_or_else(|| PortError::internal(format!("payment {} vanished after conflict", payment.reference)))?;
        Ok((existing, false))
    }

    async fn get_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, PortError> {
        let sql = format!("SELECT {} FROM payments WHERE payment_id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn get_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, PortError> {
        let sql = format!("SELECT {} FROM payments WHERE reference = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reference)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn mark_payment_allocated(&mut self, id: PaymentId, at: DateTime<Utc>) -> Result<bool, PortError> {
        let result = sqlx::query("UPDATE payments SET allocated_at = $2 WHERE payment_id = $1 AND allocated_at IS NULL")
            .bind(*id.as_uuid())
            .bind(at)
            .execute(self.conn()?)
            .await
            .map_err(port_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_payment_remainder(&mut self, id: PaymentId, remainder: Money) -> Result<(), PortError> {
        let result = sqlx::query("UPDATE payments SET unallocated_remainder = $2 WHERE payment_id = $1")
            .bind(*id.as_uuid())
            .bind(remainder.amount())
            .execute(self.conn()?)
            .await
            .map_err(port_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Payment", id));
        }
        Ok(())
    }

    async fn unallocated_payments(&mut self, limit: u32) -> Result<Vec<Payment>, PortError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE allocated_at IS NULL ORDER BY created_at, payment_id LIMIT $1",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.conn()?)
            .await
            .map_err(port_error)?;
        convert_all(rows)
    }

    // ------------------------------------------------------------------
    // Payment intents
    // ------------------------------------------------------------------

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), PortError> {
        let status = encode(&intent.status)?;
        sqlx::query(
            "INSERT INTO payment_intents (intent_id, visit_id, reference, amount, status, customer_email, \
             gateway_transaction_id, failure_reason, payment_id, created_at, verified_at, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*intent.id.as_uuid())
        .bind(*intent.visit_id.as_uuid())
        .bind(&intent.reference)
        .bind(intent.amount.amount())
        .bind(status)
        .bind(&intent.customer_email)
        .bind(&intent.gateway_transaction_id)
        .bind(&intent.failure_reason)
        .bind(intent.payment_id.map(|p| *p.as_uuid()))
        .bind(intent.created_at)
        .bind(intent.verified_at)
        .bind(intent.failed_at)
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;
        Ok(())
    }

    async fn find_payment_intent(&mut self, reference: &str) -> Result<Option<PaymentIntent>, PortError> {
        let sql = format!("SELECT {} FROM payment_intents WHERE reference = $1", INTENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentIntentRow>(&sql)
            .bind(reference)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    #[instrument(skip(self, gateway_transaction_id))]
    async fn claim_payment_intent(
        &mut self,
        reference: &str,
        verified_at: DateTime<Utc>,
        gateway_transaction_id: Option<&str>,
    ) -> Result<Option<PaymentIntent>, PortError> {
        let sql = format!(
            "UPDATE payment_intents SET status = 'VERIFIED', verified_at = $2, \
             gateway_transaction_id = COALESCE($3, gateway_transaction_id) \
             WHERE reference = $1 AND status = 'INITIALIZED' \
             RETURNING {}",
            INTENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentIntentRow>(&sql)
            .bind(reference)
            .bind(verified_at)
            .bind(gateway_transaction_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        if row.is_none() {
            debug!("Payment intent was not INITIALIZED; claim skipped");
        }
        row.map(convert).transpose()
    }

    async fn fail_payment_intent(
        &mut self,
        reference: &str,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<Option<PaymentIntent>, PortError> {
        let sql = format!(
            "UPDATE payment_intents SET status = 'FAILED', failure_reason = $2, failed_at = $3 \
             WHERE reference = $1 AND status = 'INITIALIZED' \
             RETURNING {}",
            INTENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentIntentRow>(&sql)
            .bind(reference)
            .bind(reason)
            .bind(failed_at)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn link_payment_intent(&mut self, reference: &str, payment_id: PaymentId) -> Result<(), PortError> {
        let result = sqlx::query("UPDATE payment_intents SET payment_id = $2 WHERE reference = $1")
            .bind(reference)
            .bind(*payment_id.as_uuid())
            .execute(self.conn()?)
            .await
            .map_err(port_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::not_found("PaymentIntent", reference));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leak records
    // ------------------------------------------------------------------

    async fn find_unresolved_leak(
        &mut self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<LeakRecord>, PortError> {
        let sql = format!(
            "SELECT {} FROM leak_records WHERE entity_type = $1 AND entity_id = $2 AND resolved_at IS NULL",
            LEAK_COLUMNS
        );
        let row = sqlx::query_as::<_, LeakRow>(&sql)
            .bind(entity_type.as_str())
            .bind(*entity_id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn insert_leak_if_absent(&mut self, leak: &LeakRecord) -> Result<LeakRecord, PortError> {
        let sql = format!(
            "INSERT INTO leak_records (leak_id, entity_type, entity_id, visit_id, line_item_id, estimated_loss, \
             detected_at, resolved_at, resolved_by, resolution_notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (entity_type, entity_id) WHERE resolved_at IS NULL DO NOTHING \
             RETURNING {}",
            LEAK_COLUMNS
        );
        let inserted = sqlx::query_as::<_, LeakRow>(&sql)
            .bind(*leak.id.as_uuid())
            .bind(leak.entity_type.as_str())
            .bind(*leak.entity_id.as_uuid())
            .bind(*leak.visit_id.as_uuid())
            .bind(leak.line_item_id.map(|l| *l.as_uuid()))
            .bind(leak.estimated_loss.amount())
            .bind(leak.detected_at)
            .bind(leak.resolved_at)
            .bind(leak.resolved_by.map(|u| *u.as_uuid()))
            .bind(&leak.resolution_notes)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;

        if let Some(row) = inserted {
            return convert(row);
        }
        self.find_unresolved_leak(leak.entity_type, leak.entity_id)
            .await?
            .ok_or_else(|| PortError::internal(format!("unresolved leak for {} vanished after conflict", leak.entity_id)))
    }

    async fn get_leak(&mut self, id: LeakRecordId) -> Result<Option<LeakRecord>, PortError> {
        let sql = format!("SELECT {} FROM leak_records WHERE leak_id = $1", LEAK_COLUMNS);
        let row = sqlx::query_as::<_, LeakRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn resolve_leak(
        &mut self,
        id: LeakRecordId,
        resolved_by: UserId,
        notes: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<LeakRecord>, PortError> {
        let sql = format!(
            "UPDATE leak_records SET resolved_at = $2, resolved_by = $3, resolution_notes = $4 \
             WHERE leak_id = $1 AND resolved_at IS NULL \
             RETURNING {}",
            LEAK_COLUMNS
        );
        let row = sqlx::query_as::<_, LeakRow>(&sql)
            .bind(*id.as_uuid())
            .bind(resolved_at)
            .bind(*resolved_by.as_uuid())
            .bind(notes)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn leaks_detected_between(&mut self, window: &DayWindow) -> Result<Vec<LeakRecord>, PortError> {
        let sql = format!(
            "SELECT {} FROM leak_records WHERE detected_at >= $1 AND detected_at < $2 ORDER BY detected_at, leak_id",
            LEAK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LeakRow>(&sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(self.conn()?)
            .await
            .map_err(port_error)?;
        convert_all(rows)
    }

    // ------------------------------------------------------------------
    // Daily reconciliation
    // ------------------------------------------------------------------

    async fn find_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError> {
        let sql = format!(
            "SELECT {} FROM daily_reconciliations WHERE reconciliation_date = $1",
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(date)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn get_or_create_reconciliation(
        &mut self,
        draft: &DailyReconciliation,
    ) -> Result<(DailyReconciliation, bool), PortError> {
        let status = encode(&draft.status())?;
        let totals = draft.totals();
        let sql = format!(
            "INSERT INTO daily_reconciliations (reconciliation_id, reconciliation_date, status, total_revenue, \
             total_cash, total_wallet, total_card, total_visits, active_visits_closed, prepared_by, finalized_by, \
             finalized_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (reconciliation_date) DO NOTHING \
             RETURNING {}",
            RECONCILIATION_COLUMNS
        );
        let inserted = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(*draft.id().as_uuid())
            .bind(draft.date())
            .bind(status)
            .bind(totals.total_revenue.amount())
            .bind(totals.total_cash.amount())
            .bind(totals.total_wallet.amount())
            .bind(totals.total_card.amount())
            .bind(to_i32("total_visits", totals.total_visits)?)
            .bind(to_i32("active_visits_closed", totals.active_visits_closed)?)
            .bind(draft.prepared_by().map(|u| *u.as_uuid()))
            .bind(draft.finalized_by().map(|u| *u.as_uuid()))
            .bind(draft.finalized_at())
            .bind(draft.created_at())
            .bind(draft.updated_at())
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;

        if let Some(row) = inserted {
            return Ok((convert(row)?, true));
        }
        let existing = self
            .find_reconciliation(draft.date())
            .await?
            .ok_or_else(|| PortError::internal(format!("reconciliation {} vanished after conflict", draft.date())))?;
        Ok((existing, false))
    }

    async fn lock_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError> {
        let sql = format!(
            "SELECT {} FROM daily_reconciliations WHERE reconciliation_date = $1 FOR UPDATE",
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(date)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    async fn update_reconciliation(&mut self, reconciliation: &DailyReconciliation) -> Result<(), PortError> {
        let totals = reconciliation.totals();
        let result = sqlx::query(
            "UPDATE daily_reconciliations SET total_revenue = $2, total_cash = $3, total_wallet = $4, \
             total_card = $5, total_visits = $6, active_visits_closed = $7, updated_at = $8 \
             WHERE reconciliation_date = $1 AND status = 'DRAFT'",
        )
        .bind(reconciliation.date())
        .bind(totals.total_revenue.amount())
        .bind(totals.total_cash.amount())
        .bind(totals.total_wallet.amount())
        .bind(totals.total_card.amount())
        .bind(to_i32("total_visits", totals.total_visits)?)
        .bind(to_i32("active_visits_closed", totals.active_visits_closed)?)
        .bind(reconciliation.updated_at())
        .execute(self.conn()?)
        .await
        .map_err(port_error)?;

        if result.rows_affected() == 0 {
            warn!(date = %reconciliation.date(), "Reconciliation update rejected; record missing or finalized");
            return match self.find_reconciliation(reconciliation.date()).await? {
                Some(_) => Err(PortError::conflict(format!(
                    "reconciliation for {} is finalized",
                    reconciliation.date()
                ))),
                None => Err(PortError::not_found("DailyReconciliation", reconciliation.date())),
            };
        }
        Ok(())
    }

    async fn finalize_reconciliation(
        &mut self,
        date: NaiveDate,
        finalized_by: UserId,
        finalized_at: DateTime<Utc>,
    ) -> Result<Option<DailyReconciliation>, PortError> {
        let sql = format!(
            "UPDATE daily_reconciliations SET status = 'FINALIZED', finalized_by = $2, finalized_at = $3, \
             updated_at = $3 \
             WHERE reconciliation_date = $1 AND status = 'DRAFT' \
             RETURNING {}",
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(date)
            .bind(*finalized_by.as_uuid())
            .bind(finalized_at)
            .fetch_optional(self.conn()?)
            .await
            .map_err(port_error)?;
        row.map(convert).transpose()
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    async fn allocations_between(&mut self, window: &DayWindow) -> Result<Vec<AllocationEntry>, PortError> {
        let sql = format!(
            "SELECT {} FROM allocations WHERE allocated_at >= $1 AND allocated_at < $2 \
             ORDER BY allocated_at, allocation_id",
            ALLOCATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, AllocationRow>(&sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(self.conn()?)
            .await
            .map_err(port_error)?;
        convert_all(rows)
    }

    async fn visits_with_activity_between(&mut self, window: &DayWindow) -> Result<Vec<VisitId>, PortError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT visit_id FROM allocations WHERE allocated_at >= $1 AND allocated_at < $2 \
             UNION \
             SELECT visit_id FROM line_items WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(self.conn()?)
        .await
        .map_err(port_error)?;
        Ok(ids.into_iter().map(VisitId::from_uuid).collect())
    }

    async fn commit(&mut self) -> Result<(), PortError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| PortError::internal("unit of work already committed"))?;
        tx.commit().await.map_err(port_error)
    }
}
