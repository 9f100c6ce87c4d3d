//! Payment intents
//!
//! One intent tracks one attempt at an online payment. Its provider
//! reference is the idempotency key for settlement: whatever the number of
//! webhook deliveries, an intent moves out of INITIALIZED exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use core_kernel::{Money, PaymentId, PaymentIntentId, VisitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Initialized,
    Verified,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Initialized => "INITIALIZED",
            IntentStatus::Verified => "VERIFIED",
            IntentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Initialized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub visit_id: VisitId,
    /// Globally unique provider reference
    pub reference: String,
    pub amount: Money,
    pub status: IntentStatus,
    pub customer_email: Option<String>,
    /// Provider's own transaction id, known after verification
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    /// Payment record created when the intent settled
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn new(visit_id: VisitId, amount: Money, customer_email: Option<String>) -> Self {
        Self {
            id: PaymentIntentId::new_v7(),
            visit_id,
            reference: Self::generate_reference(),
            amount,
            status: IntentStatus::Initialized,
            customer_email,
            gateway_transaction_id: None,
            failure_reason: None,
            payment_id: None,
            created_at: Utc::now(),
            verified_at: None,
            failed_at: None,
        }
    }

    /// Pre-generates a reference so the intent exists before the provider
    /// has heard of the transaction
    pub fn generate_reference() -> String {
        format!("CLN-{}", Uuid::now_v7().simple())
    }

    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Initialized
    }
}
