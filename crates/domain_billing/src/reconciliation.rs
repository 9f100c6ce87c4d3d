//! Daily reconciliation closing
//!
//! One record per clinic-local business day. A DRAFT can be refreshed any
//! number of times; each refresh recomputes the day's totals from the
//! allocation journal. Finalizing freezes the record for good.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{Money, PortError, ReconciliationId, Timezone, UserId, VisitId};

use crate::allocation::AllocationEntry;
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::payment::MethodBucket;
use crate::ports::{AuditSink, LedgerStore, LedgerUnitOfWork};
use crate::visit::VisitPaymentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    Draft,
    Finalized,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Draft => "DRAFT",
            ReconciliationStatus::Finalized => "FINALIZED",
        }
    }
}

/// Computed revenue figures for one day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTotals {
    pub total_revenue: Money,
    pub total_cash: Money,
    pub total_wallet: Money,
    pub total_card: Money,
    pub total_visits: u32,
    pub active_visits_closed: u32,
}

impl ReconciliationTotals {
    /// Sums allocation entries by method bucket
    pub fn from_allocations(entries: &[AllocationEntry]) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            match entry.method.bucket() {
                MethodBucket::Cash => totals.total_cash += entry.amount,
                MethodBucket::Wallet => totals.total_wallet += entry.amount,
                MethodBucket::Card => totals.total_card += entry.amount,
            }
            totals.total_revenue += entry.amount;
        }
        totals
    }
}

/// Stored field set, used by adapters to rebuild a record
#[derive(Debug, Clone)]
pub struct ReconciliationParts {
    pub id: ReconciliationId,
    pub reconciliation_date: NaiveDate,
    pub status: ReconciliationStatus,
    pub totals: ReconciliationTotals,
    pub prepared_by: Option<UserId>,
    pub finalized_by: Option<UserId>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// End-of-day revenue record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReconciliation {
    id: ReconciliationId,
    reconciliation_date: NaiveDate,
    status: ReconciliationStatus,
    totals: ReconciliationTotals,
    prepared_by: Option<UserId>,
    finalized_by: Option<UserId>,
    finalized_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DailyReconciliation {
    pub fn draft(date: NaiveDate, prepared_by: Option<UserId>) -> Self {
        let now = Utc::now();
        Self {
            id: ReconciliationId::new_v7(),
            reconciliation_date: date,
            status: ReconciliationStatus::Draft,
            totals: ReconciliationTotals::default(),
            prepared_by,
            finalized_by: None,
            finalized_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn restore(parts: ReconciliationParts) -> Self {
        Self {
            id: parts.id,
            reconciliation_date: parts.reconciliation_date,
            status: parts.status,
            totals: parts.totals,
            prepared_by: parts.prepared_by,
            finalized_by: parts.finalized_by,
            finalized_at: parts.finalized_at,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    pub fn id(&self) -> ReconciliationId {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.reconciliation_date
    }

    pub fn status(&self) -> ReconciliationStatus {
        self.status
    }

    pub fn totals(&self) -> &ReconciliationTotals {
        &self.totals
    }

    pub fn prepared_by(&self) -> Option<UserId> {
        self.prepared_by
    }

    pub fn finalized_by(&self) -> Option<UserId> {
        self.finalized_by
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_finalized(&self) -> bool {
        self.status == ReconciliationStatus::Finalized
    }

    /// Replaces the computed totals of a draft
    pub fn apply_totals(&mut self, totals: ReconciliationTotals, at: DateTime<Utc>) -> Result<(), BillingError> {
        if self.is_finalized() {
            return Err(BillingError::AlreadyFinalized(self.reconciliation_date));
        }
        self.totals = totals;
        self.updated_at = at;
        Ok(())
    }

    pub fn finalize(&mut self, user: UserId, at: DateTime<Utc>) -> Result<(), BillingError> {
        if self.is_finalized() {
            return Err(BillingError::AlreadyFinalized(self.reconciliation_date));
        }
        self.status = ReconciliationStatus::Finalized;
        self.finalized_by = Some(user);
        self.finalized_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// Produces and freezes daily reconciliation records
pub struct ReconciliationCloser {
    store: Arc<dyn LedgerStore>,
    config: Arc<LedgerConfig>,
    timezone: Timezone,
    audit: Arc<dyn AuditSink>,
}

impl ReconciliationCloser {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: Arc<LedgerConfig>,
        timezone: Timezone,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            config,
            timezone,
            audit,
        }
    }

    pub fn timezone(&self) -> &Timezone {
        &self.timezone
    }

    /// Returns the record for `date`, creating an empty draft if absent
    #[instrument(skip(self))]
    pub async fn create_or_get(
        &self,
        date: NaiveDate,
        prepared_by: Option<UserId>,
    ) -> Result<DailyReconciliation, BillingError> {
        let mut uow = self.store.begin().await?;
        let (record, created) = uow
            .get_or_create_reconciliation(&DailyReconciliation::draft(date, prepared_by))
            .await?;
        uow.commit().await?;

        if created {
            info!(reconciliation_id = %record.id(), "Daily reconciliation created");
            self.audit
                .record("reconciliation.created", prepared_by.as_ref(), &date.to_string());
        }
        Ok(record)
    }

    pub async fn get(&self, date: NaiveDate) -> Result<DailyReconciliation, BillingError> {
        let mut uow = self.store.begin().await?;
        uow.find_reconciliation(date)
            .await?
            .ok_or(BillingError::ReconciliationNotFound(date))
    }

    /// Recomputes a draft's totals from the day's allocations
    #[instrument(skip(self))]
    pub async fn refresh(&self, date: NaiveDate) -> Result<DailyReconciliation, BillingError> {
        let window = self.timezone.day_window(date)?;
        let mut uow = self.store.begin().await?;

        let mut record = uow
            .lock_reconciliation(date)
            .await?
            .ok_or(BillingError::ReconciliationNotFound(date))?;
        if record.is_finalized() {
            return Err(BillingError::AlreadyFinalized(date));
        }

        let allocations = uow.allocations_between(&window).await?;
        let mut totals = ReconciliationTotals::from_allocations(&allocations);

        let touched: BTreeSet<VisitId> = uow
            .visits_with_activity_between(&window)
            .await?
            .into_iter()
            .collect();
        totals.total_visits = touched.len() as u32;

        let closed_now = if self.config.close_settled_visits {
            close_settled_visits(uow.as_mut(), &touched).await?
        } else {
            0
        };
        totals.active_visits_closed = record.totals().active_visits_closed + closed_now;

        record.apply_totals(totals, Utc::now())?;
        match uow.update_reconciliation(&record).await {
            Ok(()) => {}
            Err(PortError::Conflict { .. }) => return Err(BillingError::AlreadyFinalized(date)),
            Err(e) => return Err(e.into()),
        }
        uow.commit().await?;

        info!(
            total_revenue = %record.totals().total_revenue,
            total_visits = record.totals().total_visits,
            closed = closed_now,
            "Daily reconciliation refreshed"
        );
        Ok(record)
    }

    /// Freezes a draft; the record is immutable afterwards
    #[instrument(skip(self))]
    pub async fn finalize(&self, date: NaiveDate, user: UserId) -> Result<DailyReconciliation, BillingError> {
        let mut uow = self.store.begin().await?;
        match uow.finalize_reconciliation(date, user, Utc::now()).await? {
            Some(record) => {
                uow.commit().await?;
                info!(reconciliation_id = %record.id(), finalized_by = %user, "Daily reconciliation finalized");
                self.audit
                    .record("reconciliation.finalized", Some(&user), &date.to_string());
                Ok(record)
            }
            None => match uow.find_reconciliation(date).await? {
                Some(_) => Err(BillingError::AlreadyFinalized(date)),
                None => Err(BillingError::ReconciliationNotFound(date)),
            },
        }
    }
}

/// Closes active visits whose line items are all paid; returns the count
async fn close_settled_visits(
    uow: &mut dyn LedgerUnitOfWork,
    visits: &BTreeSet<VisitId>,
) -> Result<u32, BillingError> {
    let now = Utc::now();
    let mut closed = 0;

    for visit_id in visits {
        let Some(mut visit) = uow.lock_visit(*visit_id).await? else {
            continue;
        };
        if !visit.is_active() {
            continue;
        }
        let items = uow.line_items_for_visit(*visit_id).await?;
        if VisitPaymentStatus::from_items(&items) != VisitPaymentStatus::Paid {
            continue;
        }
        visit.payment_status = VisitPaymentStatus::Paid;
        visit.close(now)?;
        uow.update_visit(&visit).await?;
        debug!(visit_id = %visit_id, "Settled visit closed");
        closed += 1;
    }
    Ok(closed)
}
