//! Ledger Test Harness
//!
//! Wires every ledger service over the in-memory adapters, the way the API
//! server wires them over PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use core_kernel::{PatientId, Timezone, UserId, VisitId};
use rust_decimal::Decimal;

use domain_billing::{
    AllocationEngine, BillingError, GatewayReconciler, InMemoryArtifactRegistry, InMemoryLedgerStore, LeakDetector,
    LedgerConfig, LedgerService, LineItem, ManualPayment, PaymentMethod, ReconciliationCloser, RecordedPayment,
    RecordingAuditSink, ServiceSnapshot, StubPaymentGateway,
};

use crate::fixtures::GatewayFixtures;

/// All ledger services sharing one in-memory store
pub struct LedgerHarness {
    pub config: Arc<LedgerConfig>,
    pub store: Arc<InMemoryLedgerStore>,
    pub artifacts: Arc<InMemoryArtifactRegistry>,
    pub gateway: Arc<StubPaymentGateway>,
    pub audit: Arc<RecordingAuditSink>,
    pub service: Arc<LedgerService>,
    pub reconciler: Arc<GatewayReconciler>,
    pub detector: Arc<LeakDetector>,
    pub closer: Arc<ReconciliationCloser>,
}

impl Default for LedgerHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerHarness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default(), Timezone::default())
    }

    pub fn with_config(config: LedgerConfig, timezone: Timezone) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(InMemoryLedgerStore::new());
        let artifacts = Arc::new(InMemoryArtifactRegistry::new());
        let gateway = Arc::new(StubPaymentGateway::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = AllocationEngine::new(config.clone());

        let service = LedgerService::new(store.clone(), engine.clone(), config.clone(), audit.clone());
        let reconciler = GatewayReconciler::new(
            store.clone(),
            gateway.clone(),
            GatewayFixtures::verifier(),
            engine,
            audit.clone(),
            Duration::from_secs(2),
        );
        let detector = LeakDetector::new(
            store.clone(),
            artifacts.clone(),
            config.clone(),
            timezone.clone(),
            audit.clone(),
        );
        let closer = ReconciliationCloser::new(store.clone(), config.clone(), timezone, audit.clone());

        Self {
            config,
            store,
            artifacts,
            gateway,
            audit,
            service: Arc::new(service),
            reconciler: Arc::new(reconciler),
            detector: Arc::new(detector),
            closer: Arc::new(closer),
        }
    }

    /// Registers a visit for a fresh patient
    pub async fn visit(&self) -> VisitId {
        self.service
            .register_visit(PatientId::new())
            .await
            .expect("visit registration")
            .id
    }

    pub async fn item(&self, visit_id: VisitId, service: ServiceSnapshot, amount: Decimal) -> LineItem {
        self.service
            .add_line_item(visit_id, service, amount, None)
            .await
            .expect("line item")
    }

    pub async fn pay(
        &self,
        visit_id: VisitId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<RecordedPayment, BillingError> {
        self.service
            .record_manual_payment(ManualPayment {
                visit_id,
                amount,
                method,
                reference: None,
                received_by: Some(UserId::new()),
            })
            .await
    }
}
