//! Gateway reconciliation
//!
//! Turns at-least-once webhook delivery into exactly-once settlement:
//!
//! 1. The signature is checked on the raw body before anything is read.
//! 2. The reference is looked up; an unknown reference is rejected.
//! 3. An intent that already left INITIALIZED short-circuits.
//! 4. The provider is asked, server-side and with a bounded timeout, what
//!    really happened. A timeout leaves the intent INITIALIZED.
//! 5. The verified visit and amount must match the stored intent.
//! 6. On success the intent is claimed (conditional INITIALIZED -> VERIFIED),
//!    the payment record is fetched or created by reference, and the payment
//!    is allocated, all in one unit of work.
//! 7. On a failed or abandoned transaction the intent is marked FAILED.
//!
//! The claim in step 6 and the payment get-or-create are two independent
//! guards, so a duplicate delivery is harmless whether it arrives before or
//! after a crash in the middle of a settlement.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use core_kernel::{PaymentId, PortError, UserId, VisitId};
use rust_decimal::Decimal;

use crate::allocation::{AllocationEngine, AllocationOutcome, AllocationPolicy};
use crate::error::BillingError;
use crate::payment::{Payment, PaymentMethod};
use crate::ports::{AuditSink, LedgerStore};

use super::client::{InitializeTransaction, PaymentGateway, TransactionStatus, VerifiedTransaction};
use super::intent::{IntentStatus, PaymentIntent};
use super::notification::{SignatureVerifier, WebhookNotification};

/// Outcome of processing one notification or verification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconciliationResult {
    /// This call verified the intent and allocated the payment
    Settled {
        reference: String,
        payment_id: PaymentId,
        allocation: Option<AllocationOutcome>,
    },
    /// An earlier delivery already settled this reference
    AlreadySettled {
        reference: String,
        payment_id: Option<PaymentId>,
    },
    /// The provider reported a failed or abandoned transaction
    Failed { reference: String, reason: String },
    /// An earlier delivery already marked this reference failed
    AlreadyFailed {
        reference: String,
        reason: Option<String>,
    },
    /// The provider has not finished the transaction yet
    Pending { reference: String },
    /// Event type that cannot settle a payment
    Ignored { event: String },
}

impl ReconciliationResult {
    /// True when the payment is settled, by this call or an earlier one
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ReconciliationResult::Settled { .. } | ReconciliationResult::AlreadySettled { .. }
        )
    }
}

/// An intent persisted and a checkout opened at the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiatedPayment {
    pub intent: PaymentIntent,
    pub authorization_url: String,
}

/// Drives the allocation engine from gateway notifications
pub struct GatewayReconciler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: SignatureVerifier,
    engine: AllocationEngine,
    audit: Arc<dyn AuditSink>,
    verify_timeout: Duration,
    callback_url: Option<String>,
}

impl GatewayReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: SignatureVerifier,
        engine: AllocationEngine,
        audit: Arc<dyn AuditSink>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            verifier,
            engine,
            audit,
            verify_timeout,
            callback_url: None,
        }
    }

    pub fn with_callback_url(mut self, callback_url: Option<String>) -> Self {
        self.callback_url = callback_url;
        self
    }

    /// Creates an intent and opens a checkout session for it
    #[instrument(skip_all, fields(visit_id = %visit_id))]
    pub async fn initiate(
        &self,
        visit_id: VisitId,
        amount: Decimal,
        customer_email: String,
        actor: Option<&UserId>,
    ) -> Result<InitiatedPayment, BillingError> {
        let amount = self.engine.config().validate_amount(amount)?;

        let mut uow = self.store.begin().await?;
        let visit = uow
            .get_visit(visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit_id))?;
        if !visit.is_active() {
            return Err(BillingError::VisitClosed(visit_id));
        }
        let intent = PaymentIntent::new(visit_id, amount, Some(customer_email.clone()));
        uow.insert_payment_intent(&intent).await?;
        uow.commit().await?;

        self.audit
            .record("payment_intent.initialized", actor, &intent.reference);

        let request = InitializeTransaction {
            reference: intent.reference.clone(),
            amount,
            email: customer_email,
            visit_id,
            callback_url: self.callback_url.clone(),
        };
        let initialized = self
            .bounded("initialize_transaction", self.gateway.initialize_transaction(&request))
            .await?;

        info!(reference = %intent.reference, "Gateway checkout initialized");
        Ok(InitiatedPayment {
            intent,
            authorization_url: initialized.authorization_url,
        })
    }

    /// Handles one webhook delivery
    ///
    /// `signature` is the raw signature header value.
    pub async fn reconcile(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconciliationResult, BillingError> {
        if let Err(e) = self.verifier.verify(body, signature) {
            warn!(body_len = body.len(), "Rejected webhook with invalid signature");
            self.audit.record("gateway.webhook_rejected", None, "invalid signature");
            return Err(e);
        }

        let notification = WebhookNotification::parse(body)?;
        if !notification.is_charge_event() {
            info!(event = %notification.event, "Ignoring non-charge gateway event");
            return Ok(ReconciliationResult::Ignored {
                event: notification.event,
            });
        }

        self.reconcile_reference(&notification.data.reference).await
    }

    /// Verifies and settles one reference
    ///
    /// Shared by the webhook path (after its signature check) and the
    /// authenticated verify-after-checkout call.
    #[instrument(skip(self))]
    pub async fn reconcile_reference(&self, reference: &str) -> Result<ReconciliationResult, BillingError> {
        let intent = {
            let mut uow = self.store.begin().await?;
            uow.find_payment_intent(reference)
                .await?
                .ok_or_else(|| BillingError::PaymentIntentNotFound(reference.to_string()))?
        };

        if let Some(result) = Self::terminal_result(&intent) {
            info!(reference, status = intent.status.as_str(), "Intent already reconciled");
            return Ok(result);
        }

        let verified = self
            .bounded("verify_transaction", self.gateway.verify_transaction(reference))
            .await
            .map_err(|e| {
                warn!(reference, error = %e, "Verification failed; intent left INITIALIZED");
                e
            })?;

        match verified.status {
            TransactionStatus::Pending => {
                info!(reference, "Transaction still pending at provider");
                Ok(ReconciliationResult::Pending {
                    reference: reference.to_string(),
                })
            }
            TransactionStatus::Failed | TransactionStatus::Abandoned => {
                let reason = verified
                    .gateway_response
                    .clone()
                    .unwrap_or_else(|| format!("transaction {:?} at provider", verified.status).to_lowercase());
                self.fail_intent(reference, &reason).await
            }
            TransactionStatus::Success => {
                self.cross_check(&intent, &verified).await?;
                self.settle(&intent, &verified).await
            }
        }
    }

    fn terminal_result(intent: &PaymentIntent) -> Option<ReconciliationResult> {
        match intent.status {
            IntentStatus::Initialized => None,
            IntentStatus::Verified => Some(ReconciliationResult::AlreadySettled {
                reference: intent.reference.clone(),
                payment_id: intent.payment_id,
            }),
            IntentStatus::Failed => Some(ReconciliationResult::AlreadyFailed {
                reference: intent.reference.clone(),
                reason: intent.failure_reason.clone(),
            }),
        }
    }

    /// Runs a provider call under the verification timeout
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = Result<T, PortError>>,
    ) -> Result<T, BillingError> {
        match tokio::time::timeout(self.verify_timeout, call).await {
            Err(_) => Err(BillingError::GatewayUnavailable {
                message: format!("{} timed out after {:?}", operation, self.verify_timeout),
                retryable: true,
            }),
            Ok(Err(e)) if e.is_transient() => Err(BillingError::GatewayUnavailable {
                message: e.to_string(),
                retryable: true,
            }),
            Ok(Err(e)) => Err(BillingError::GatewayUnavailable {
                message: e.to_string(),
                retryable: false,
            }),
            Ok(Ok(value)) => Ok(value),
        }
    }

    /// Compares the provider's facts with what the intent recorded
    async fn cross_check(
        &self,
        intent: &PaymentIntent,
        verified: &VerifiedTransaction,
    ) -> Result<(), BillingError> {
        let reason = if verified.visit_id != Some(intent.visit_id) {
            Some(format!(
                "visit mismatch: intent has {}, provider reported {}",
                intent.visit_id,
                verified
                    .visit_id
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ))
        } else if verified.amount != intent.amount {
            Some(format!(
                "amount mismatch: intent has {}, provider reported {}",
                intent.amount, verified.amount
            ))
        } else {
            None
        };

        let Some(reason) = reason else {
            return Ok(());
        };

        error!(
            reference = %intent.reference,
            intent_visit = %intent.visit_id,
            reported_visit = ?verified.visit_id,
            intent_amount = %intent.amount,
            reported_amount = %verified.amount,
            gateway_transaction_id = ?verified.gateway_transaction_id,
            "Gateway integrity violation; intent failed without allocation"
        );

        let mut uow = self.store.begin().await?;
        uow.fail_payment_intent(&intent.reference, &reason, Utc::now())
            .await?;
        uow.commit().await?;
        self.audit
            .record("gateway.integrity_violation", None, &intent.reference);

        Err(BillingError::integrity(intent.reference.clone(), reason))
    }

    async fn fail_intent(&self, reference: &str, reason: &str) -> Result<ReconciliationResult, BillingError> {
        let mut uow = self.store.begin().await?;
        let failed = uow.fail_payment_intent(reference, reason, Utc::now()).await?;
        match failed {
            Some(_) => {
                uow.commit().await?;
                info!(reference, reason, "Payment intent failed");
                self.audit.record("payment_intent.failed", None, reference);
                Ok(ReconciliationResult::Failed {
                    reference: reference.to_string(),
                    reason: reason.to_string(),
                })
            }
            None => self.current_terminal_state(uow.as_mut(), reference).await,
        }
    }

    async fn settle(
        &self,
        intent: &PaymentIntent,
        verified: &VerifiedTransaction,
    ) -> Result<ReconciliationResult, BillingError> {
        let reference = intent.reference.as_str();
        let mut uow = self.store.begin().await?;

        let claimed = uow
            .claim_payment_intent(reference, Utc::now(), verified.gateway_transaction_id.as_deref())
            .await?;
        if claimed.is_none() {
            info!(reference, "Lost the claim to a concurrent delivery");
            return self.current_terminal_state(uow.as_mut(), reference).await;
        }

        let candidate = Payment::new(
            intent.visit_id,
            reference,
            intent.amount,
            PaymentMethod::Gateway,
            None,
        );
        let (payment, created) = uow.get_or_create_payment(&candidate).await?;
        if !created {
            warn!(reference, payment_id = %payment.id, "Payment record already existed for reference");
        }

        let allocation = self
            .engine
            .settle_payment(uow.as_mut(), &payment, AllocationPolicy::Tolerant)
            .await?;
        uow.link_payment_intent(reference, payment.id).await?;
        uow.commit().await?;

        if let Some(ref outcome) = allocation {
            if outcome.remainder.is_positive() {
                warn!(reference, remainder = %outcome.remainder, "Gateway payment exceeded outstanding balance");
            }
        }
        info!(reference, payment_id = %payment.id, "Gateway payment settled");
        self.audit.record("payment.gateway_settled", None, reference);

        Ok(ReconciliationResult::Settled {
            reference: reference.to_string(),
            payment_id: payment.id,
            allocation,
        })
    }

    async fn current_terminal_state(
        &self,
        uow: &mut dyn crate::ports::LedgerUnitOfWork,
        reference: &str,
    ) -> Result<ReconciliationResult, BillingError> {
        let intent = uow
            .find_payment_intent(reference)
            .await?
            .ok_or_else(|| BillingError::PaymentIntentNotFound(reference.to_string()))?;
        Self::terminal_result(&intent).ok_or_else(|| {
            BillingError::InvariantViolation(format!(
                "intent {} refused a transition but is still INITIALIZED",
                reference
            ))
        })
    }
}
