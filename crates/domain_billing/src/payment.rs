//! Payment records
//!
//! A `Payment` is the user-visible record of money received for a visit,
//! keyed by a unique reference. Recording the same reference twice yields
//! the original record, and a payment is allocated at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::{Money, PaymentId, UserId, VisitId};

use crate::error::BillingError;

/// How money reached the clinic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash at the reception desk
    Cash,
    /// Debit from the patient's prepaid wallet
    Wallet,
    /// Card at a desk terminal
    Card,
    /// Online payment through the payment gateway
    Gateway,
}

/// Reconciliation bucket a method's takings are reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodBucket {
    Cash,
    Wallet,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Gateway => "GATEWAY",
        }
    }

    /// Card terminal and online gateway takings share the card bucket
    pub fn bucket(&self) -> MethodBucket {
        match self {
            PaymentMethod::Cash => MethodBucket::Cash,
            PaymentMethod::Wallet => MethodBucket::Wallet,
            PaymentMethod::Card | PaymentMethod::Gateway => MethodBucket::Card,
        }
    }

    /// Methods a cashier may record by hand
    pub fn is_manual(&self) -> bool {
        !matches!(self, PaymentMethod::Gateway)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMethod::Cash),
            "WALLET" => Ok(PaymentMethod::Wallet),
            "CARD" => Ok(PaymentMethod::Card),
            "GATEWAY" => Ok(PaymentMethod::Gateway),
            other => Err(BillingError::InvalidPaymentMethod(other.to_string())),
        }
    }
}

/// A payment received for a visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub visit_id: VisitId,
    /// Unique idempotency key: the gateway reference or a desk receipt number
    pub reference: String,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Cashier who took the payment; `None` for gateway payments
    pub received_by: Option<UserId>,
    /// Set once the payment has been run through allocation
    pub allocated_at: Option<DateTime<Utc>>,
    /// Portion that matched no outstanding line item
    pub unallocated_remainder: Money,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        visit_id: VisitId,
        reference: impl Into<String>,
        amount: Money,
        method: PaymentMethod,
        received_by: Option<UserId>,
    ) -> Self {
        Self {
            id: PaymentId::new_v7(),
            visit_id,
            reference: reference.into(),
            amount,
            method,
            received_by,
            allocated_at: None,
            unallocated_remainder: Money::zero(),
            created_at: Utc::now(),
        }
    }

    /// Generates a receipt reference for desk payments recorded without one
    pub fn generate_reference(method: PaymentMethod) -> String {
        format!("{}-{}", method.as_str(), Uuid::now_v7().simple())
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated_at.is_some()
    }
}
