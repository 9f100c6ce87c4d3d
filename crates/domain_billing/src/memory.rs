//! In-memory adapters
//!
//! Used by tests and by local runs without a database. The ledger store
//! serialises units of work: `begin` takes an owned lock on the whole
//! state, the unit works on a private copy, and `commit` writes the copy
//! back. Dropping an uncommitted unit leaves the state untouched.
//!
//! The store enforces the same integrity rules as the PostgreSQL schema,
//! so domain code misbehaving against it fails the same way.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use core_kernel::{
    ArtifactId, DayWindow, DomainPort, HealthCheckResult, HealthCheckable, LeakRecordId, LineItemId,
    Money, PaymentId, PortError, UserId, VisitId,
};

use crate::allocation::AllocationEntry;
use crate::artifact::{ArtifactRef, ArtifactSnapshot, BillableArtifact, BillingReference, ClinicalArtifactPort, EntityType};
use crate::gateway::client::{
    InitializeTransaction, InitializedTransaction, PaymentGateway, TransactionStatus, VerifiedTransaction,
};
use crate::gateway::intent::{IntentStatus, PaymentIntent};
use crate::leak::LeakRecord;
use crate::line_item::LineItem;
use crate::payment::Payment;
use crate::ports::{AuditSink, LedgerStore, LedgerUnitOfWork};
use crate::reconciliation::DailyReconciliation;
use crate::visit::Visit;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    visits: HashMap<VisitId, Visit>,
    line_items: HashMap<LineItemId, LineItem>,
    allocations: Vec<AllocationEntry>,
    payments: HashMap<PaymentId, Payment>,
    intents: HashMap<String, PaymentIntent>,
    leaks: HashMap<LeakRecordId, LeakRecord>,
    reconciliations: BTreeMap<NaiveDate, DailyReconciliation>,
}

impl LedgerState {
    fn items_of(&self, visit_id: VisitId) -> Vec<LineItem> {
        let mut items: Vec<LineItem> = self
            .line_items
            .values()
            .filter(|i| i.visit_id == visit_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    fn unresolved_leak(&self, entity_type: EntityType, entity_id: ArtifactId) -> Option<&LeakRecord> {
        self.leaks
            .values()
            .find(|l| l.entity_type == entity_type && l.entity_id == entity_id && !l.is_resolved())
    }
}

/// Ledger store held entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed line items of a visit, oldest first
    pub async fn line_items(&self, visit_id: VisitId) -> Vec<LineItem> {
        self.state.lock().await.items_of(visit_id)
    }

    pub async fn visit(&self, visit_id: VisitId) -> Option<Visit> {
        self.state.lock().await.visits.get(&visit_id).cloned()
    }

    /// Committed allocation journal, in write order
    pub async fn allocations(&self) -> Vec<AllocationEntry> {
        self.state.lock().await.allocations.clone()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self.state.lock().await.payments.values().cloned().collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        payments
    }

    pub async fn intent(&self, reference: &str) -> Option<PaymentIntent> {
        self.state.lock().await.intents.get(reference).cloned()
    }

    pub async fn leaks(&self) -> Vec<LeakRecord> {
        let mut leaks: Vec<LeakRecord> = self.state.lock().await.leaks.values().cloned().collect();
        leaks.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        leaks
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("memory-ledger-store", 0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, PortError> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

fn integrity(err: impl std::fmt::Display) -> PortError {
    PortError::validation(err.to_string())
}

#[async_trait]
impl LedgerUnitOfWork for InMemoryUnitOfWork {
    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), PortError> {
        if self.working.visits.contains_key(&visit.id) {
            return Err(PortError::conflict(format!("visit {} already exists", visit.id)));
        }
        self.working.visits.insert(visit.id, visit.clone());
        Ok(())
    }

    async fn get_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError> {
        Ok(self.working.visits.get(&id).cloned())
    }

    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, PortError> {
        Ok(self.working.visits.get(&id).cloned())
    }

    async fn update_visit(&mut self, visit: &Visit) -> Result<(), PortError> {
        match self.working.visits.get_mut(&visit.id) {
            Some(stored) => {
                *stored = visit.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Visit", visit.id)),
        }
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), PortError> {
        if !self.working.visits.contains_key(&item.visit_id) {
            return Err(PortError::not_found("Visit", item.visit_id));
        }
        item.check_invariants().map_err(integrity)?;
        self.working.line_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_line_item(&mut self, id: LineItemId) -> Result<Option<LineItem>, PortError> {
        Ok(self.working.line_items.get(&id).cloned())
    }

    async fn line_items_for_visit(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError> {
        Ok(self.working.items_of(visit_id))
    }

    async fn lock_line_items(&mut self, visit_id: VisitId) -> Result<Vec<LineItem>, PortError> {
        Ok(self.working.items_of(visit_id))
    }

    async fn update_line_item(&mut self, item: &LineItem) -> Result<(), PortError> {
        item.check_invariants().map_err(integrity)?;
        let stored = self
            .working
            .line_items
            .get_mut(&item.id)
            .ok_or_else(|| PortError::not_found("LineItem", item.id))?;
        if item.amount_paid < stored.amount_paid {
            return Err(PortError::validation(format!(
                "amount_paid of line item {} cannot decrease",
                item.id
            )));
        }
        *stored = item.clone();
        Ok(())
    }

    async fn insert_allocation(&mut self, entry: &AllocationEntry) -> Result<(), PortError> {
        if !self.working.line_items.contains_key(&entry.line_item_id) {
            return Err(PortError::not_found("LineItem", entry.line_item_id));
        }
        self.working.allocations.push(entry.clone());
        Ok(())
    }

    async fn get_or_create_payment(&mut self, payment: &Payment) -> Result<(Payment, bool), PortError> {
        if let Some(existing) = self
            .working
            .payments
            .values()
            .find(|p| p.reference == payment.reference)
        {
            return Ok((existing.clone(), false));
        }
        if !self.working.visits.contains_key(&payment.visit_id) {
            return Err(PortError::not_found("Visit", payment.visit_id));
        }
        self.working.payments.insert(payment.id, payment.clone());
        Ok((payment.clone(), true))
    }

    async fn get_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, PortError> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn get_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, PortError> {
        Ok(self
            .working
            .payments
            .values()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn mark_payment_allocated(&mut self, id: PaymentId, at: DateTime<Utc>) -> Result<bool, PortError> {
        let payment = self
            .working
            .payments
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Payment", id))?;
        if payment.allocated_at.is_some() {
            return Ok(false);
        }
        payment.allocated_at = Some(at);
        Ok(true)
    }

    async fn set_payment_remainder(&mut self, id: PaymentId, remainder: Money) -> Result<(), PortError> {
        let payment = self
            .working
            .payments
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Payment", id))?;
        payment.unallocated_remainder = remainder;
        Ok(())
    }

    async fn unallocated_payments(&mut self, limit: u32) -> Result<Vec<Payment>, PortError> {
        let mut pending: Vec<Payment> = self
            .working
            .payments
            .values()
            .filter(|p| !p.is_allocated())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<(), PortError> {
        if self.working.intents.contains_key(&intent.reference) {
            return Err(PortError::conflict(format!(
                "payment intent {} already exists",
                intent.reference
            )));
        }
        self.working.intents.insert(intent.reference.clone(), intent.clone());
        Ok(())
    }

    async fn find_payment_intent(&mut self, reference: &str) -> Result<Option<PaymentIntent>, PortError> {
        Ok(self.working.intents.get(reference).cloned())
    }

    async fn claim_payment_intent(
        &mut self,
        reference: &str,
        verified_at: DateTime<Utc>,
        gateway_transaction_id: Option<&str>,
    ) -> Result<Option<PaymentIntent>, PortError> {
        match self.working.intents.get_mut(reference) {
            Some(intent) if intent.status == IntentStatus::Initialized => {
                intent.status = IntentStatus::Verified;
                intent.verified_at = Some(verified_at);
                intent.gateway_transaction_id = gateway_transaction_id.map(str::to_string);
                Ok(Some(intent.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail_payment_intent(
        &mut self,
        reference: &str,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<Option<PaymentIntent>, PortError> {
        match self.working.intents.get_mut(reference) {
            Some(intent) if intent.status == IntentStatus::Initialized => {
                intent.status = IntentStatus::Failed;
                intent.failed_at = Some(failed_at);
                intent.failure_reason = Some(reason.to_string());
                Ok(Some(intent.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn link_payment_intent(&mut self, reference: &str, payment_id: PaymentId) -> Result<(), PortError> {
        let intent = self
            .working
            .intents
            .get_mut(reference)
            .ok_or_else(|| PortError::not_found("PaymentIntent", reference))?;
        intent.payment_id = Some(payment_id);
        Ok(())
    }

    async fn find_unresolved_leak(
        &mut self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<LeakRecord>, PortError> {
        Ok(self.working.unresolved_leak(entity_type, entity_id).cloned())
    }

    async fn insert_leak_if_absent(&mut self, leak: &LeakRecord) -> Result<LeakRecord, PortError> {
        if let Some(existing) = self.working.unresolved_leak(leak.entity_type, leak.entity_id) {
            return Ok(existing.clone());
        }
        self.working.leaks.insert(leak.id, leak.clone());
        Ok(leak.clone())
    }

    async fn get_leak(&mut self, id: LeakRecordId) -> Result<Option<LeakRecord>, PortError> {
        Ok(self.working.leaks.get(&id).cloned())
    }

    async fn resolve_leak(
        &mut self,
        id: LeakRecordId,
        resolved_by: UserId,
        notes: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<LeakRecord>, PortError> {
        match self.working.leaks.get_mut(&id) {
            Some(leak) if !leak.is_resolved() => {
                leak.resolved_at = Some(resolved_at);
                leak.resolved_by = Some(resolved_by);
                leak.resolution_notes = Some(notes.to_string());
                Ok(Some(leak.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn leaks_detected_between(&mut self, window: &DayWindow) -> Result<Vec<LeakRecord>, PortError> {
        let mut leaks: Vec<LeakRecord> = self
            .working
            .leaks
            .values()
            .filter(|l| window.contains(l.detected_at))
            .cloned()
            .collect();
        leaks.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        Ok(leaks)
    }

    async fn find_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError> {
        Ok(self.working.reconciliations.get(&date).cloned())
    }

    async fn get_or_create_reconciliation(
        &mut self,
        draft: &DailyReconciliation,
    ) -> Result<(DailyReconciliation, bool), PortError> {
        if let Some(existing) = self.working.reconciliations.get(&draft.date()) {
            return Ok((existing.clone(), false));
        }
        self.working.reconciliations.insert(draft.date(), draft.clone());
        Ok((draft.clone(), true))
    }

    async fn lock_reconciliation(&mut self, date: NaiveDate) -> Result<Option<DailyReconciliation>, PortError> {
        Ok(self.working.reconciliations.get(&date).cloned())
    }

    async fn update_reconciliation(&mut self, reconciliation: &DailyReconciliation) -> Result<(), PortError> {
        let stored = self
            .working
            .reconciliations
            .get_mut(&reconciliation.date())
            .ok_or_else(|| PortError::not_found("DailyReconciliation", reconciliation.date()))?;
        if stored.is_finalized() {
            return Err(PortError::conflict(format!(
                "reconciliation for {} is finalized",
                reconciliation.date()
            )));
        }
        *stored = reconciliation.clone();
        Ok(())
    }

    async fn finalize_reconciliation(
        &mut self,
        date: NaiveDate,
        finalized_by: UserId,
        finalized_at: DateTime<Utc>,
    ) -> Result<Option<DailyReconciliation>, PortError> {
        match self.working.reconciliations.get_mut(&date) {
            Some(record) if !record.is_finalized() => {
                record
                    .finalize(finalized_by, finalized_at)
                    .map_err(|e| PortError::internal(e.to_string()))?;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn allocations_between(&mut self, window: &DayWindow) -> Result<Vec<AllocationEntry>, PortError> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|a| window.contains(a.allocated_at))
            .cloned()
            .collect())
    }

    async fn visits_with_activity_between(&mut self, window: &DayWindow) -> Result<Vec<VisitId>, PortError> {
        let mut visits: BTreeSet<VisitId> = self
            .working
            .allocations
            .iter()
            .filter(|a| window.contains(a.allocated_at))
            .map(|a| a.visit_id)
            .collect();
        visits.extend(
            self.working
                .line_items
                .values()
                .filter(|i| window.contains(i.created_at))
                .map(|i| i.visit_id),
        );
        Ok(visits.into_iter().collect())
    }

    async fn commit(&mut self) -> Result<(), PortError> {
        *self.guard = self.working.clone();
        Ok(())
    }
}

/// Clinical projection backed by registered snapshots
#[derive(Debug, Default)]
pub struct InMemoryArtifactRegistry {
    artifacts: RwLock<HashMap<(EntityType, ArtifactId), ArtifactSnapshot>>,
    broken: RwLock<HashSet<ArtifactId>>,
}

impl InMemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, snapshot: ArtifactSnapshot) {
        self.artifacts
            .write()
            .await
            .insert((snapshot.entity_type(), snapshot.entity_id()), snapshot);
    }

    /// Makes lookups of one artifact fail, for exercising error paths
    pub async fn break_artifact(&self, entity_id: ArtifactId) {
        self.broken.write().await.insert(entity_id);
    }
}

impl DomainPort for InMemoryArtifactRegistry {}

#[async_trait]
impl ClinicalArtifactPort for InMemoryArtifactRegistry {
    async fn billing_reference(
        &self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<BillingReference>, PortError> {
        if self.broken.read().await.contains(&entity_id) {
            return Err(PortError::connection(format!("artifact {} unavailable", entity_id)));
        }
        Ok(self
            .artifacts
            .read()
            .await
            .get(&(entity_type, entity_id))
            .map(|s| s.billing_reference()))
    }

    async fn completed_between(&self, window: &DayWindow) -> Result<Vec<ArtifactRef>, PortError> {
        let artifacts = self.artifacts.read().await;
        let mut completed: Vec<&ArtifactSnapshot> = artifacts
            .values()
            .filter(|s| s.completed_at.is_some_and(|at| window.contains(at)))
            .collect();
        completed.sort_by_key(|s| s.completed_at);
        Ok(completed.into_iter().map(|s| s.artifact_ref()).collect())
    }
}

/// Scriptable payment provider
#[derive(Debug, Default)]
pub struct StubPaymentGateway {
    transactions: RwLock<HashMap<String, VerifiedTransaction>>,
    delay: RwLock<Option<Duration>>,
    unavailable: AtomicBool,
    verify_calls: AtomicUsize,
    initialize_calls: AtomicUsize,
}

impl StubPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets what `verify_transaction` reports for a reference
    pub async fn set_transaction(&self, transaction: VerifiedTransaction) {
        self.transactions
            .write()
            .await
            .insert(transaction.reference.clone(), transaction);
    }

    /// Shorthand for a successful charge
    pub async fn succeed(&self, reference: &str, amount: Money, visit_id: VisitId) {
        self.set_transaction(VerifiedTransaction {
            reference: reference.to_string(),
            status: TransactionStatus::Success,
            amount,
            visit_id: Some(visit_id),
            gateway_transaction_id: Some(format!("TRX-{}", reference)),
            paid_at: Some(Utc::now()),
            gateway_response: Some("Approved".to_string()),
        })
        .await;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) -> Result<(), PortError> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::ServiceUnavailable {
                service: "stub-gateway".to_string(),
            });
        }
        Ok(())
    }
}

impl DomainPort for StubPaymentGateway {}

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn initialize_transaction(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, PortError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await?;
        Ok(InitializedTransaction {
            reference: request.reference.clone(),
            authorization_url: format!("https://checkout.stub/{}", request.reference),
            access_code: Some(format!("ACC-{}", request.reference)),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, PortError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await?;
        self.transactions
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| PortError::not_found("Transaction", reference))
    }
}

/// One captured audit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub event: String,
    pub actor: Option<UserId>,
    pub resource: String,
}

/// Audit sink that keeps events for assertions
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditRecord> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.event == event).count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &str, actor: Option<&UserId>, resource: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(AuditRecord {
                event: event.to_string(),
                actor: actor.copied(),
                resource: resource.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::ServiceSnapshot;
    use core_kernel::PatientId;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_uncommitted_unit_is_discarded() {
        let store = InMemoryLedgerStore::new();
        let visit = Visit::open(PatientId::new());
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_visit(&visit).await.unwrap();
        }
        assert!(store.visit(visit.id).await.is_none());

        let mut uow = store.begin().await.unwrap();
        uow.insert_visit(&visit).await.unwrap();
        uow.commit().await.unwrap();
        drop(uow);
        assert!(store.visit(visit.id).await.is_some());
    }

    #[tokio::test]
    async fn test_amount_paid_cannot_decrease() {
        let store = InMemoryLedgerStore::new();
        let visit = Visit::open(PatientId::new());
        let mut item = LineItem::new(
            visit.id,
            ServiceSnapshot::new("LAB", "Lab"),
            Money::new(dec!(3000)),
            None,
        )
        .unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.insert_visit(&visit).await.unwrap();
        let original = item.clone();
        item.apply_payment(Money::new(dec!(1000)), crate::payment::PaymentMethod::Cash, Utc::now())
            .unwrap();
        uow.insert_line_item(&item).await.unwrap();

        let err = uow.update_line_item(&original).await.unwrap_err();
        assert!(matches!(err, PortError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_payment_reference_is_unique() {
        let store = InMemoryLedgerStore::new();
        let visit = Visit::open(PatientId::new());
        let mut uow = store.begin().await.unwrap();
        uow.insert_visit(&visit).await.unwrap();

        let first = Payment::new(visit.id, "REF-1", Money::new(dec!(10)), crate::payment::PaymentMethod::Cash, None);
        let second = Payment::new(visit.id, "REF-1", Money::new(dec!(99)), crate::payment::PaymentMethod::Cash, None);
        let (stored, created) = uow.get_or_create_payment(&first).await.unwrap();
        assert!(created);
        let (again, created) = uow.get_or_create_payment(&second).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, stored.id);
        assert_eq!(again.amount, Money::new(dec!(10)));
    }
}
