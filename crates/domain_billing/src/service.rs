//! Ledger service
//!
//! Application-level operations around the Allocation Engine: registering
//! visits, adding line items, recording desk payments, backfilling
//! historical payments, and the per-visit billing summary. Each operation
//! runs in exactly one unit of work.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{Money, PatientId, PaymentId, UserId, VisitId};

use crate::allocation::{AllocationEngine, AllocationOutcome, AllocationPolicy};
use crate::artifact::ArtifactLink;
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::line_item::{LineItem, ServiceSnapshot};
use crate::payment::{Payment, PaymentMethod};
use crate::ports::{AuditSink, LedgerStore};
use crate::visit::{compute_billing_summary, refresh_visit_payment_status, BillingSummary, Visit};

/// A payment taken at the reception desk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPayment {
    pub visit_id: VisitId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Receipt number; generated when absent
    pub reference: Option<String>,
    pub received_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPayment {
    pub payment: Payment,
    /// `None` when this reference had already been settled
    pub allocation: Option<AllocationOutcome>,
    pub remainder: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub payment_id: PaymentId,
    pub reference: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub examined: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub failures: Vec<BackfillFailure>,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    engine: AllocationEngine,
    config: Arc<LedgerConfig>,
    audit: Arc<dyn AuditSink>,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: AllocationEngine,
        config: Arc<LedgerConfig>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            engine,
            config,
            audit,
        }
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    #[instrument(skip(self))]
    pub async fn register_visit(&self, patient_id: PatientId) -> Result<Visit, BillingError> {
        let visit = Visit::open(patient_id);
        let mut uow = self.store.begin().await?;
        uow.insert_visit(&visit).await?;
        uow.commit().await?;

        info!(visit_id = %visit.id, "Visit registered");
        Ok(visit)
    }

    /// Adds a billable service to an active visit
    #[instrument(skip(self, service), fields(code = %service.code))]
    pub async fn add_line_item(
        &self,
        visit_id: VisitId,
        service: ServiceSnapshot,
        amount: Decimal,
        artifact: Option<ArtifactLink>,
    ) -> Result<LineItem, BillingError> {
        let amount = self.config.validate_amount(amount)?;
        let item = LineItem::new(visit_id, service, amount, artifact)?;
        item.check_invariants()?;

        let mut uow = self.store.begin().await?;
        let visit = uow
            .lock_visit(visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit_id))?;
        if !visit.is_active() {
            return Err(BillingError::VisitClosed(visit_id));
        }
        uow.insert_line_item(&item).await?;
        refresh_visit_payment_status(uow.as_mut(), visit_id).await?;
        uow.commit().await?;

        info!(line_item_id = %item.id, amount = %item.amount, "Line item added");
        Ok(item)
    }

    /// Runs the Allocation Engine directly in a unit of its own
    ///
    /// No payment record is written; the journal rows carry no payment id.
    pub async fn allocate(
        &self,
        visit_id: VisitId,
        amount: Decimal,
        method: PaymentMethod,
        policy: AllocationPolicy,
    ) -> Result<AllocationOutcome, BillingError> {
        let amount = self.config.validate_amount(amount)?;
        let mut uow = self.store.begin().await?;
        let outcome = self
            .engine
            .allocate(uow.as_mut(), visit_id, amount, method, None, policy)
            .await?;
        refresh_visit_payment_status(uow.as_mut(), visit_id).await?;
        uow.commit().await?;
        Ok(outcome)
    }

    /// Records a cash, wallet or card payment and allocates it
    #[instrument(skip(self, request), fields(visit_id = %request.visit_id, method = %request.method))]
    pub async fn record_manual_payment(&self, request: ManualPayment) -> Result<RecordedPayment, BillingError> {
        if !request.method.is_manual() {
            return Err(BillingError::InvalidPaymentMethod(format!(
                "{} payments are recorded by the gateway adapter",
                request.method
            )));
        }
        let amount = self.config.validate_amount(request.amount)?;
        let reference = match request.reference {
            Some(reference) if !reference.trim().is_empty() => reference.trim().to_string(),
            _ => Payment::generate_reference(request.method),
        };

        let mut uow = self.store.begin().await?;
        let visit = uow
            .get_visit(request.visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(request.visit_id))?;
        if !visit.is_active() {
            return Err(BillingError::VisitClosed(request.visit_id));
        }

        let candidate = Payment::new(request.visit_id, reference, amount, request.method, request.received_by);
        let (payment, created) = uow.get_or_create_payment(&candidate).await?;
        if !created && payment.visit_id != request.visit_id {
            return Err(BillingError::integrity(
                payment.reference.clone(),
                "reference already recorded against another visit",
            ));
        }
        if !created && (payment.amount != amount || payment.method != request.method) {
            return Err(BillingError::integrity(
                payment.reference.clone(),
                "reference already recorded with different amount or method",
            ));
        }

        let allocation = self
            .engine
            .settle_payment(uow.as_mut(), &payment, AllocationPolicy::RequireOutstanding)
            .await?;
        let stored = uow
            .get_payment(payment.id)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(payment.reference.clone()))?;
        uow.commit().await?;

        let remainder = stored.unallocated_remainder;
        if remainder.is_positive() {
            warn!(
                payment_id = %stored.id,
                remainder = %remainder,
                "Payment exceeds outstanding balance; remainder left unallocated"
            );
        }
        if created {
            self.audit
                .record("payment.recorded", request.received_by.as_ref(), &stored.reference);
        }

        Ok(RecordedPayment {
            payment: stored,
            allocation,
            remainder,
        })
    }

    /// Allocates historical payments that never went through allocation
    ///
    /// Each payment is settled in its own unit of work through the same
    /// entry point as live payments. Running it twice is harmless.
    #[instrument(skip(self))]
    pub async fn backfill_unallocated(&self, limit: u32) -> Result<BackfillReport, BillingError> {
        let pending = {
            let mut uow = self.store.begin().await?;
            uow.unallocated_payments(limit).await?
        };

        let mut report = BackfillReport::default();
        for payment in pending {
            report.examined += 1;
            match self.settle_one(&payment).await {
                Ok(true) => report.settled += 1,
                Ok(false) => report.already_settled += 1,
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "Backfill failed for payment");
                    report.failures.push(BackfillFailure {
                        payment_id: payment.id,
                        reference: payment.reference.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            settled = report.settled,
            failures = report.failures.len(),
            "Backfill finished"
        );
        Ok(report)
    }

    async fn settle_one(&self, payment: &Payment) -> Result<bool, BillingError> {
        let mut uow = self.store.begin().await?;
        let outcome = self
            .engine
            .settle_payment(uow.as_mut(), payment, AllocationPolicy::Tolerant)
            .await?;
        uow.commit().await?;
        Ok(outcome.is_some())
    }

    /// Read-only totals for one visit
    pub async fn billing_summary(&self, visit_id: VisitId) -> Result<BillingSummary, BillingError> {
        let mut uow = self.store.begin().await?;
        uow.get_visit(visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit_id))?;
        let items = uow.line_items_for_visit(visit_id).await?;
        Ok(compute_billing_summary(visit_id, &items))
    }

    pub async fn line_items(&self, visit_id: VisitId) -> Result<Vec<LineItem>, BillingError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.line_items_for_visit(visit_id).await?)
    }
}
