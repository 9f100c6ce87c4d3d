//! Payment provider port
//!
//! The provider's verification endpoint is the source of truth for a
//! transaction. Webhook payloads only tell the ledger which reference to
//! ask about.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CircuitBreakerConfig, DomainPort, Money, PortError, VisitId};

/// Status the provider reports for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Abandoned,
    /// Still in progress at the provider; ask again later
    Pending,
}

impl TransactionStatus {
    /// Maps the provider's status string; unknown values count as pending
    pub fn from_provider(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "success" | "successful" => TransactionStatus::Success,
            "failed" | "reversed" => TransactionStatus::Failed,
            "abandoned" => TransactionStatus::Abandoned,
            _ => TransactionStatus::Pending,
        }
    }
}

/// Authoritative view of one transaction, from a server-side verify call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: Money,
    /// Visit id that was attached as metadata when the transaction began
    pub visit_id: Option<VisitId>,
    pub gateway_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Provider's human-readable outcome ("Approved", "Insufficient funds")
    pub gateway_response: Option<String>,
}

/// Request to open a checkout session at the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeTransaction {
    pub reference: String,
    pub amount: Money,
    pub email: String,
    pub visit_id: VisitId,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub reference: String,
    pub authorization_url: String,
    pub access_code: Option<String>,
}

/// Outbound port to the payment provider
#[async_trait]
pub trait PaymentGateway: DomainPort {
    async fn initialize_transaction(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, PortError>;

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, PortError>;
}

/// Settings for the payment provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Secret API key used for server-side calls
    pub secret_key: String,
    /// Shared secret for webhook signatures
    pub webhook_secret: String,
    /// Upper bound on any single provider call
    pub timeout_secs: u64,
    /// Where the provider sends the payer after checkout
    pub callback_url: Option<String>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            timeout_secs: 10,
            callback_url: None,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TransactionStatus::from_provider("success"), TransactionStatus::Success);
        assert_eq!(TransactionStatus::from_provider("ABANDONED"), TransactionStatus::Abandoned);
        assert_eq!(TransactionStatus::from_provider("ongoing"), TransactionStatus::Pending);
    }

    #[test]
    fn test_timeout_has_floor() {
        let config = GatewayConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.timeout(), std::time::Duration::from_secs(1));
    }
}
