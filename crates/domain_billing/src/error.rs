//! Billing ledger errors

use chrono::NaiveDate;
use thiserror::Error;

use core_kernel::{
    LeakRecordId, LineItemId, MoneyError, PortError, TemporalError, VisitId,
};

/// Errors that can occur in the billing ledger
///
/// Variants fall into four groups: validation (caller fixes input and
/// retries), terminal-state conflicts, integrity violations (fail closed),
/// and transient failures of the payment provider or storage.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Amount is zero, negative, or too precise
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Visit not found: {0}")]
    VisitNotFound(VisitId),

    #[error("Visit is closed: {0}")]
    VisitClosed(VisitId),

    #[error("Line item not found: {0}")]
    LineItemNotFound(LineItemId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// No payment intent carries this provider reference
    #[error("Payment intent not found for reference {0}")]
    PaymentIntentNotFound(String),

    #[error("Clinical artifact not found: {entity_type} {entity_id}")]
    ArtifactNotFound {
        entity_type: String,
        entity_id: String,
    },

    #[error("Leak record not found: {0}")]
    LeakNotFound(LeakRecordId),

    #[error("No reconciliation exists for {0}")]
    ReconciliationNotFound(NaiveDate),

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    /// The visit has no line item with an outstanding balance
    #[error("Visit {0} has no outstanding balance")]
    NoOutstandingBalance(VisitId),

    #[error("Reconciliation for {0} is already finalized")]
    AlreadyFinalized(NaiveDate),

    #[error("Leak record {0} is already resolved")]
    AlreadyResolved(LeakRecordId),

    #[error("Webhook signature is missing or invalid")]
    InvalidSignature,

    #[error("Malformed gateway notification: {0}")]
    MalformedNotification(String),

    /// Verified transaction disagrees with the stored intent
    #[error("Integrity violation for reference {reference}: {reason}")]
    IntegrityViolation {
        reference: String,
        reason: String,
    },

    /// A ledger invariant would be broken by this write
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The payment provider could not be reached or did not answer in time
    #[error("Payment gateway unavailable: {message}")]
    GatewayUnavailable {
        message: String,
        retryable: bool,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Port(#[from] PortError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),
}

impl BillingError {
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        BillingError::InvalidAmount(message.into())
    }

    pub fn integrity(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::IntegrityViolation {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the same call may succeed later without any change
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::GatewayUnavailable { retryable, .. } => *retryable,
            BillingError::Port(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidSignature | BillingError::IntegrityViolation { .. }
        )
    }

    /// Returns true for errors caused by bad caller input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidAmount(_)
                | BillingError::VisitNotFound(_)
                | BillingError::VisitClosed(_)
                | BillingError::LineItemNotFound(_)
                | BillingError::PaymentNotFound(_)
                | BillingError::PaymentIntentNotFound(_)
                | BillingError::ArtifactNotFound { .. }
                | BillingError::LeakNotFound(_)
                | BillingError::ReconciliationNotFound(_)
                | BillingError::InvalidPaymentMethod(_)
                | BillingError::NoOutstandingBalance(_)
                | BillingError::MalformedNotification(_)
        )
    }
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        BillingError::InvalidAmount(err.to_string())
    }
}
