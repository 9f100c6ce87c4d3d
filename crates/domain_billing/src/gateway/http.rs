//! HTTP adapter for the payment provider
//!
//! Talks to a Paystack-style REST API: amounts travel in minor units, the
//! visit id rides along in transaction metadata, and every response is an
//! envelope `{status, message, data}`.
//!
//! Provider failures are mapped to `PortError` variants:
//! - 404 -> `PortError::NotFound`
//! - 401/403 -> `PortError::Unauthorized`
//! - 429 -> `PortError::RateLimited`
//! - 5xx, open circuit -> `PortError::ServiceUnavailable`
//! - Timeouts -> `PortError::Timeout`
//! - Connection failures -> `PortError::Connection`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use core_kernel::{
    AdapterHealth, CircuitBreakerConfig, DomainPort, HealthCheckResult, HealthCheckable, Money,
    PortError, VisitId,
};

use super::client::{
    GatewayConfig, InitializeTransaction, InitializedTransaction, PaymentGateway,
    TransactionStatus, VerifiedTransaction,
};

const ADAPTER_ID: &str = "payment-gateway-http";

/// Circuit breaker state for fault tolerance
///
/// `opened_at` is `Some` exactly while the circuit is open.
#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            opened_at: RwLock::new(None),
        }
    }

    async fn is_available(&self) -> bool {
        match *self.opened_at.read().await {
            None => true,
            // Half-open once the reset timeout has elapsed
            Some(at) => at.elapsed() > Duration::from_secs(self.config.reset_timeout_secs),
        }
    }

    async fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= u64::from(self.config.success_threshold) {
            *self.opened_at.write().await = None;
            self.success_count.store(0, Ordering::Relaxed);
        }
    }

    async fn record_failure(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= u64::from(self.config.failure_threshold) {
            *self.opened_at.write().await = Some(Instant::now());
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    #[serde(default)]
    id: Option<Value>,
    status: String,
    reference: String,
    amount: i64,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl VerifyData {
    fn visit_id(&self) -> Option<VisitId> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("visit_id"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    fn into_verified(self) -> VerifiedTransaction {
        let visit_id = self.visit_id();
        let gateway_transaction_id = self.id.as_ref().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        VerifiedTransaction {
            status: TransactionStatus::from_provider(&self.status),
            amount: Money::from_minor(self.amount),
            visit_id,
            gateway_transaction_id,
            paid_at: self.paid_at,
            gateway_response: self.gateway_response,
            reference: self.reference,
        }
    }
}

/// Payment gateway adapter over the provider's REST API
#[derive(Debug)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| PortError::Internal {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;
        let circuit_breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);

        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn is_circuit_open(&self) -> bool {
        match self.circuit_breaker {
            Some(ref cb) => !cb.is_available().await,
            None => false,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PortError> {
        if self.is_circuit_open().await {
            return Err(PortError::ServiceUnavailable {
                service: "payment gateway (circuit open)".to_string(),
            });
        }

        let result = self.execute(operation, request).await;
        if let Some(ref cb) = self.circuit_breaker {
            match &result {
                Err(e) if e.is_transient() => cb.record_failure().await,
                _ => cb.record_success().await,
            }
        }
        result
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PortError> {
        let response = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| self.map_transport_error(operation, e))?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "Gateway response");
        if !status.is_success() {
            return Err(Self::map_status(operation, status));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| PortError::transformation(format!("{}: {}", operation, e)))?;
        if !envelope.status {
            return Err(PortError::validation(
                envelope
                    .message
                    .unwrap_or_else(|| format!("{} rejected by provider", operation)),
            ));
        }
        envelope
            .data
            .ok_or_else(|| PortError::transformation(format!("{}: response has no data", operation)))
    }

    fn map_transport_error(&self, operation: &str, err: reqwest::Error) -> PortError {
        if err.is_timeout() {
            warn!(operation, "Gateway call timed out");
            PortError::Timeout {
                operation: operation.to_string(),
                duration_ms: self.config.timeout().as_millis() as u64,
            }
        } else {
            PortError::Connection {
                message: format!("{} failed: {}", operation, err),
                source: Some(Box::new(err)),
            }
        }
    }

    fn map_status(operation: &str, status: StatusCode) -> PortError {
        match status {
            StatusCode::NOT_FOUND => PortError::not_found("Transaction", operation),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized {
                message: format!("{} rejected credentials", operation),
            },
            StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited {
                retry_after_secs: 30,
            },
            s if s.is_server_error() => PortError::ServiceUnavailable {
                service: format!("payment gateway ({})", s.as_u16()),
            },
            s => PortError::internal(format!("{} returned HTTP {}", operation, s.as_u16())),
        }
    }
}

impl DomainPort for HttpPaymentGateway {}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize_transaction(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, PortError> {
        let amount = request
            .amount
            .to_minor()
            .map_err(|e| PortError::validation_field(e.to_string(), "amount"))?;
        let body = json!({
            "email": request.email,
            "amount": amount,
            "reference": request.reference,
            "callback_url": request.callback_url.as_ref().or(self.config.callback_url.as_ref()),
            "metadata": { "visit_id": request.visit_id.to_string() },
        });

        let data: InitializeData = self
            .send(
                "initialize_transaction",
                self.client.post(self.url("transaction/initialize")).json(&body),
            )
            .await?;

        Ok(InitializedTransaction {
            reference: data.reference,
            authorization_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, PortError> {
        let data: VerifyData = self
            .send("verify_transaction", self.client.get(self.url(&verify_path(reference))))
            .await?;
        Ok(data.into_verified())
    }
}

#[async_trait]
impl HealthCheckable for HttpPaymentGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let status = if self.is_circuit_open().await {
            AdapterHealth::Degraded
        } else {
            AdapterHealth::Healthy
        };
        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status,
            latency_ms: 0,
            message: (status == AdapterHealth::Degraded).then(|| "Circuit breaker is open".to_string()),
            checked_at: Utc::now(),
        }
    }
}

/// Verification path; the reference travels as a single path segment
fn verify_path(reference: &str) -> String {
    format!("transaction/verify/{}", urlencoding::encode(reference))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_data_maps_metadata_visit() {
        let visit_id = VisitId::new();
        let data: VerifyData = serde_json::from_value(json!({
            "id": 4099260516u64,
            "status": "success",
            "reference": "CLN-abc",
            "amount": 700000,
            "paid_at": "2026-03-02T10:15:00Z",
            "gateway_response": "Approved",
            "metadata": { "visit_id": visit_id.to_string() }
        }))
        .unwrap();

        let verified = data.into_verified();
        assert_eq!(verified.status, TransactionStatus::Success);
        assert_eq!(verified.amount, Money::from_minor(700_000));
        assert_eq!(verified.visit_id, Some(visit_id));
        assert_eq!(verified.gateway_transaction_id.as_deref(), Some("4099260516"));
    }

    #[test]
    fn test_verify_data_tolerates_empty_metadata() {
        let data: VerifyData = serde_json::from_value(json!({
            "status": "abandoned",
            "reference": "CLN-abc",
            "amount": 100,
            "metadata": ""
        }))
        .unwrap();
        assert_eq!(data.visit_id(), None);
    }

    #[test]
    fn test_status_mapping() {
        assert!(HttpPaymentGateway::map_status("verify", StatusCode::BAD_GATEWAY).is_transient());
        assert!(HttpPaymentGateway::map_status("verify", StatusCode::NOT_FOUND).is_not_found());
        assert!(!HttpPaymentGateway::map_status("verify", StatusCode::UNAUTHORIZED).is_transient());
    }

    #[test]
    fn test_verify_path_keeps_reference_in_one_segment() {
        assert_eq!(verify_path("CLN-01_a.b"), "transaction/verify/CLN-01_a.b");
        assert_eq!(verify_path("a/b c?x"), "transaction/verify/a%2Fb%20c%3Fx");
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_secs: 60,
            success_threshold: 1,
        });
        assert!(cb.is_available().await);
        cb.record_failure().await;
        assert!(cb.is_available().await);
        cb.record_failure().await;
        assert!(!cb.is_available().await);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_calls_until_success_closes_it() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_secs: 3600,
            success_threshold: 1,
        });
        cb.record_failure().await;
        assert!(cb.opened_at.read().await.is_some());
        assert!(!cb.is_available().await);

        cb.record_success().await;
        assert!(cb.opened_at.read().await.is_none());
        assert!(cb.is_available().await);
    }
}
