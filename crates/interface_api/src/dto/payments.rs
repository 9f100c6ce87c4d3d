//! Payment DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use domain_billing::{InitiatedPayment, IntentStatus, PaymentMethod};

use super::positive_amount;

/// A payment taken at the desk
#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Receipt or terminal reference; replays with the same value are no-ops
    #[validate(length(min = 1, max = 100))]
    pub reference: Option<String>,
}

/// Starts an online checkout
#[derive(Debug, Deserialize, Validate)]
pub struct GatewayPaymentRequest {
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    #[validate(email)]
    pub customer_email: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatedPaymentResponse {
    pub reference: String,
    pub authorization_url: String,
    pub amount: Decimal,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<InitiatedPayment> for InitiatedPaymentResponse {
    fn from(initiated: InitiatedPayment) -> Self {
        Self {
            reference: initiated.intent.reference,
            authorization_url: initiated.authorization_url,
            amount: initiated.intent.amount.amount(),
            status: initiated.intent.status,
            created_at: initiated.intent.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BackfillRequest {
    #[validate(range(min = 1, max = 1000))]
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gateway_request_requires_email() {
        let request = GatewayPaymentRequest {
            amount: dec!(8000),
            customer_email: "not-an-email".to_string(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_backfill_limit_is_bounded() {
        assert!(BackfillRequest { limit: 0 }.validate().is_err());
        assert!(BackfillRequest { limit: 100 }.validate().is_ok());
        assert!(BackfillRequest { limit: 5000 }.validate().is_err());
    }

    #[test]
    fn test_method_uses_wire_names() {
        let request: RecordPaymentRequest =
            serde_json::from_str(r#"{"amount": "7000", "method": "CASH"}"#).unwrap();
        assert_eq!(request.method, PaymentMethod::Cash);
        assert!(request.reference.is_none());
    }
}
