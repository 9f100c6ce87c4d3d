//! Daily reconciliation DTOs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use domain_billing::{DailyReconciliation, ReconciliationStatus};

#[derive(Debug, Deserialize)]
pub struct CreateReconciliationRequest {
    /// Defaults to today in the clinic timezone
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub id: Uuid,
    pub reconciliation_date: NaiveDate,
    pub status: ReconciliationStatus,
    pub total_revenue: Decimal,
    pub total_cash: Decimal,
    pub total_wallet: Decimal,
    pub total_card: Decimal,
    pub total_visits: u32,
    pub active_visits_closed: u32,
    pub prepared_by: Option<Uuid>,
    pub finalized_by: Option<Uuid>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<DailyReconciliation> for ReconciliationResponse {
    fn from(record: DailyReconciliation) -> Self {
        let totals = record.totals();
        Self {
            id: *record.id().as_uuid(),
            reconciliation_date: record.date(),
            status: record.status(),
            total_revenue: totals.total_revenue.amount(),
            total_cash: totals.total_cash.amount(),
            total_wallet: totals.total_wallet.amount(),
            total_card: totals.total_card.amount(),
            total_visits: totals.total_visits,
            active_visits_closed: totals.active_visits_closed,
            prepared_by: record.prepared_by().map(|u| *u.as_uuid()),
            finalized_by: record.finalized_by().map(|u| *u.as_uuid()),
            finalized_at: record.finalized_at(),
            updated_at: record.updated_at(),
        }
    }
}
