//! Payment gateway integration
//!
//! - `intent`: the per-transaction state machine
//! - `notification`: webhook payloads and signature checks
//! - `client`: the outbound provider port
//! - `http`: the REST adapter for that port
//! - `reconcile`: exactly-once settlement of verified transactions

pub mod client;
pub mod http;
pub mod intent;
pub mod notification;
pub mod reconcile;

pub use client::{
    GatewayConfig, InitializeTransaction, InitializedTransaction, PaymentGateway,
    TransactionStatus, VerifiedTransaction,
};
pub use http::HttpPaymentGateway;
pub use intent::{IntentStatus, PaymentIntent};
pub use notification::{SignatureVerifier, WebhookNotification};
pub use reconcile::{GatewayReconciler, InitiatedPayment, ReconciliationResult};
