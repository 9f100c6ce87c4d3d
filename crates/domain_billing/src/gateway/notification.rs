//! Inbound gateway notifications
//!
//! The provider signs each webhook body with HMAC-SHA512 keyed by the
//! shared webhook secret and sends the hex digest in a header. The
//! signature is checked against the raw bytes before the body is parsed.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::BillingError;

type HmacSha512 = Hmac<Sha512>;

/// Webhook payload: `{event, data: {reference, status, id, customer}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub event: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub customer: Option<NotificationCustomer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCustomer {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub customer_code: Option<String>,
}

impl WebhookNotification {
    pub fn parse(body: &[u8]) -> Result<Self, BillingError> {
        let notification: WebhookNotification = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedNotification(e.to_string()))?;
        if notification.data.reference.trim().is_empty() {
            return Err(BillingError::MalformedNotification(
                "notification carries an empty reference".to_string(),
            ));
        }
        Ok(notification)
    }

    /// Only charge events can settle a payment
    pub fn is_charge_event(&self) -> bool {
        self.event.starts_with("charge.")
    }
}

/// Verifies webhook signatures with the shared secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex-encoded HMAC-SHA512 of `body`
    pub fn sign(&self, body: &[u8]) -> Result<String, BillingError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks `signature` against `body` in constant time
    ///
    /// Fails closed: a missing secret, a missing or undecodable signature,
    /// and a mismatch are all `InvalidSignature`.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), BillingError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(BillingError::InvalidSignature)?;
        let expected = hex::decode(signature).map_err(|_| BillingError::InvalidSignature)?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| BillingError::InvalidSignature)
    }

    fn mac(&self) -> Result<HmacSha512, BillingError> {
        if self.secret.is_empty() {
            return Err(BillingError::InvalidSignature);
        }
        HmacSha512::new_from_slice(&self.secret).map_err(|_| BillingError::InvalidSignature)
    }
}
