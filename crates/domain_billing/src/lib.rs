//! Billing Domain - Clinic Visit Ledger
//!
//! This crate turns clinical and commercial events into a consistent,
//! auditable financial state per patient visit.
//!
//! # Components
//!
//! - **Line items** (`line_item`): one billable service within a visit;
//!   `amount_paid + outstanding_amount == amount` always holds.
//! - **Allocation Engine** (`allocation`): spreads a cleared payment over a
//!   visit's outstanding items, registration first, then consultation, then
//!   everything else oldest first.
//! - **Gateway reconciliation** (`gateway`): verifies provider webhooks
//!   server-side and settles each provider reference exactly once.
//! - **Leak Detector** (`leak`): finds completed clinical work without a
//!   fully paid line item.
//! - **Reconciliation Closer** (`reconciliation`): daily revenue totals with
//!   a DRAFT -> FINALIZED lifecycle.
//!
//! Storage is reached only through the `LedgerStore` port; `memory` holds
//! in-process adapters for tests and local runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{LedgerService, ManualPayment, PaymentMethod};
//!
//! let recorded = service
//!     .record_manual_payment(ManualPayment {
//!         visit_id,
//!         amount: dec!(7000),
//!         method: PaymentMethod::Cash,
//!         reference: None,
//!         received_by: Some(cashier),
//!     })
//!     .await?;
//! assert!(recorded.remainder.is_zero());
//! ```

pub mod allocation;
pub mod artifact;
pub mod config;
pub mod error;
pub mod gateway;
pub mod leak;
pub mod line_item;
pub mod memory;
pub mod payment;
pub mod ports;
pub mod reconciliation;
pub mod service;
pub mod visit;

pub use allocation::{
    plan_allocation, prioritize, AllocationEngine, AllocationEntry, AllocationOutcome, AllocationPlan,
    AllocationPolicy, PlannedAllocation,
};
pub use artifact::{
    ArtifactLink, ArtifactRef, ArtifactSnapshot, BillableArtifact, BillingReference, ClinicalArtifactPort,
    EntityType,
};
pub use config::LedgerConfig;
pub use error::BillingError;
pub use gateway::{
    GatewayConfig, GatewayReconciler, HttpPaymentGateway, InitializeTransaction, InitializedTransaction,
    InitiatedPayment, IntentStatus, PaymentGateway, PaymentIntent, ReconciliationResult, SignatureVerifier,
    TransactionStatus, VerifiedTransaction, WebhookNotification,
};
pub use leak::{EntityLeakCount, LeakDetector, LeakRecord, LeakScanReport, LeakSummary, ScanFailure};
pub use line_item::{BillStatus, LineItem, ServiceSnapshot};
pub use memory::{
    AuditRecord, InMemoryArtifactRegistry, InMemoryLedgerStore, RecordingAuditSink, StubPaymentGateway,
};
pub use payment::{MethodBucket, Payment, PaymentMethod};
pub use ports::{AuditSink, LedgerStore, LedgerUnitOfWork, TracingAuditSink};
pub use reconciliation::{
    DailyReconciliation, ReconciliationCloser, ReconciliationParts, ReconciliationStatus, ReconciliationTotals,
};
pub use service::{BackfillFailure, BackfillReport, LedgerService, ManualPayment, RecordedPayment};
pub use visit::{
    compute_billing_summary, refresh_visit_payment_status, BillingSummary, Visit, VisitPaymentStatus,
    VisitStatus,
};
