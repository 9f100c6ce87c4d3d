//! HTTP tests for the ledger API
//!
//! The router runs over the in-memory harness, so these need no database.
//! Each test mints its own JWT with the roles it exercises.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use core_kernel::{HealthCheckable, UserId};
use interface_api::auth::{create_token, roles};
use interface_api::config::ApiConfig;
use interface_api::handlers::webhooks::SIGNATURE_HEADER;
use interface_api::{create_router, AppState};
use test_utils::{GatewayFixtures, IdFixtures, LedgerHarness, TestArtifactBuilder};

const JWT_SECRET: &str = "api-test-secret";

struct TestApi {
    server: TestServer,
    harness: LedgerHarness,
}

impl TestApi {
    fn new() -> Self {
        let harness = LedgerHarness::new();
        let config = ApiConfig {
            jwt_secret: JWT_SECRET.to_string(),
            ..ApiConfig::default()
        };
        let probes: Vec<Arc<dyn HealthCheckable>> = vec![harness.store.clone()];
        let state = AppState {
            config: Arc::new(config),
            ledger: harness.service.clone(),
            reconciler: harness.reconciler.clone(),
            detector: harness.detector.clone(),
            closer: harness.closer.clone(),
            probes,
        };
        let server = TestServer::new(create_router(state)).unwrap();
        Self { server, harness }
    }

    fn token(&self, role: &str) -> String {
        self.token_for(&UserId::new(), role)
    }

    fn token_for(&self, user: &UserId, role: &str) -> String {
        create_token(user, vec![role.to_string()], JWT_SECRET, 3600).unwrap()
    }

    /// Registers a visit with a registration and a consultation item
    async fn billed_visit(&self) -> String {
        let cashier = self.token(roles::CASHIER);
        let visit: Value = self
            .server
            .post("/api/v1/visits")
            .authorization_bearer(&cashier)
            .json(&json!({ "patient_id": IdFixtures::patient_id().as_uuid() }))
            .await
            .json();
        let visit_id = visit["id"].as_str().unwrap().to_string();

        for (code, tag, amount) in [("REG-OPD", "registration", "5000"), ("CONS-GP", "consultation", "10000")] {
            self.server
                .post(&format!("/api/v1/visits/{}/line-items", visit_id))
                .authorization_bearer(&cashier)
                .json(&json!({
                    "service_code": code,
                    "service_name": code,
                    "tag": tag,
                    "amount": amount,
                }))
                .await
                .assert_status(StatusCode::CREATED);
        }
        visit_id
    }
}

fn decimal(value: &Value) -> rust_decimal::Decimal {
    serde_json::from_value(value.clone()).unwrap()
}

// ============================================================================
// Health and authentication
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_is_public() {
        let api = TestApi::new();
        let response = api.server.get("/health").await;
        response.assert_status_ok();
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_probes_adapters() {
        let api = TestApi::new();
        let body: Value = api.server.get("/health/ready").await.json();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["adapters"][0]["adapter_id"], "memory-ledger-store");
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let api = TestApi::new();
        api.server
            .post("/api/v1/visits")
            .json(&json!({ "patient_id": IdFixtures::patient_id().as_uuid() }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        api.server
            .post("/api/v1/visits")
            .authorization_bearer("not-a-jwt")
            .json(&json!({ "patient_id": IdFixtures::patient_id().as_uuid() }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cashier_cannot_finalize() {
        let api = TestApi::new();
        api.server
            .post("/api/v1/reconciliations/2026-03-02/finalize")
            .authorization_bearer(api.token(roles::CASHIER))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}

// ============================================================================
// Desk payments
// ============================================================================

mod payment_tests {
    use super::*;

    #[tokio::test]
    async fn test_cash_payment_fills_registration_first() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;

        let response = api
            .server
            .post(&format!("/api/v1/visits/{}/payments", visit_id))
            .authorization_bearer(api.token(roles::CASHIER))
            .json(&json!({ "amount": "7000", "method": "CASH" }))
            .await;
        response.assert_status_ok();
        let recorded: Value = response.json();
        assert_eq!(decimal(&recorded["remainder"]), rust_decimal::Decimal::ZERO);

        let billing: Value = api
            .server
            .get(&format!("/api/v1/visits/{}/billing", visit_id))
            .authorization_bearer(api.token(roles::CASHIER))
            .await
            .json();
        assert_eq!(decimal(&billing["summary"]["total_paid"]), rust_decimal_macros::dec!(7000));
        assert_eq!(billing["summary"]["payment_status"], "PARTIALLY_PAID");

        let items = billing["line_items"].as_array().unwrap();
        let registration = items.iter().find(|i| i["service"]["code"] == "REG-OPD").unwrap();
        let consultation = items.iter().find(|i| i["service"]["code"] == "CONS-GP").unwrap();
        assert_eq!(registration["bill_status"], "PAID");
        assert_eq!(consultation["bill_status"], "PARTIALLY_PAID");
        assert_eq!(decimal(&consultation["outstanding_amount"]), rust_decimal_macros::dec!(8000));
    }

    #[tokio::test]
    async fn test_invalid_payment_bodies_are_rejected() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let cashier = api.token(roles::CASHIER);
        let path = format!("/api/v1/visits/{}/payments", visit_id);

        api.server
            .post(&path)
            .authorization_bearer(&cashier)
            .json(&json!({ "amount": "0", "method": "CASH" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        api.server
            .post(&path)
            .authorization_bearer(&cashier)
            .json(&json!({ "amount": "100", "method": "GATEWAY" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        api.server
            .post(&format!("/api/v1/visits/{}/payments", uuid::Uuid::new_v4()))
            .authorization_bearer(&cashier)
            .json(&json!({ "amount": "100", "method": "CARD" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_paid_visit_rejects_further_desk_payments() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let cashier = api.token(roles::CASHIER);
        let path = format!("/api/v1/visits/{}/payments", visit_id);

        let recorded: Value = api
            .server
            .post(&path)
            .authorization_bearer(&cashier)
            .json(&json!({ "amount": "16000", "method": "WALLET" }))
            .await
            .json();
        assert_eq!(decimal(&recorded["remainder"]), rust_decimal_macros::dec!(1000));

        let body: Value = api
            .server
            .post(&path)
            .authorization_bearer(&cashier)
            .json(&json!({ "amount": "500", "method": "CASH" }))
            .await
            .json();
        assert_eq!(body["error"], "validation_error");
    }
}

// ============================================================================
// Gateway checkout and webhooks
// ============================================================================

mod webhook_tests {
    use super::*;

    async fn initiate(api: &TestApi, visit_id: &str, amount: &str) -> String {
        let response = api
            .server
            .post(&format!("/api/v1/visits/{}/gateway-payments", visit_id))
            .authorization_bearer(api.token(roles::CASHIER))
            .json(&json!({ "amount": amount, "customer_email": "patient@example.com" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["status"], "INITIALIZED");
        body["reference"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_checkout_rejects_unstorable_amounts() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let path = format!("/api/v1/visits/{}/gateway-payments", visit_id);

        for amount in ["70.005", "1000000000000.00"] {
            api.server
                .post(&path)
                .authorization_bearer(api.token(roles::CASHIER))
                .json(&json!({ "amount": amount, "customer_email": "patient@example.com" }))
                .await
                .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    fn signature_header(signature: &str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(signature).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_signed_webhook_settles_once() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let reference = initiate(&api, &visit_id, "15000").await;
        let visit = core_kernel::VisitId::from_uuid(visit_id.parse().unwrap());
        api.harness
            .gateway
            .succeed(&reference, core_kernel::Money::new(rust_decimal_macros::dec!(15000)), visit)
            .await;

        let (body, signature) = GatewayFixtures::signed(&GatewayFixtures::charge_success(&reference));
        let mut results = Vec::new();
        for _ in 0..2 {
            let (name, value) = signature_header(&signature);
            let response = api
                .server
                .post("/webhooks/gateway")
                .add_header(name, value)
                .bytes(Bytes::from(body.clone()))
                .await;
            response.assert_status_ok();
            results.push(response.json::<Value>()["result"].as_str().unwrap().to_string());
        }
        assert_eq!(results, vec!["settled", "already_settled"]);

        let items = api.harness.store.line_items(visit).await;
        assert!(items.iter().all(|i| i.outstanding_amount.is_zero()));
        assert_eq!(api.harness.store.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unsigned_webhook_is_rejected() {
        let api = TestApi::new();
        let (body, _) = GatewayFixtures::signed(&GatewayFixtures::charge_success("CLN-unknown"));

        api.server
            .post("/webhooks/gateway")
            .bytes(Bytes::from(body.clone()))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let (name, value) = signature_header(&"0".repeat(128));
        api.server
            .post("/webhooks/gateway")
            .add_header(name, value)
            .bytes(Bytes::from(body))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unavailable_gateway_asks_provider_to_retry() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let reference = initiate(&api, &visit_id, "5000").await;
        api.harness.gateway.set_unavailable(true);

        let (body, signature) = GatewayFixtures::signed(&GatewayFixtures::charge_success(&reference));
        let (name, value) = signature_header(&signature);
        api.server
            .post("/webhooks/gateway")
            .add_header(name, value)
            .bytes(Bytes::from(body))
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let intent = api.harness.store.intent(&reference).await.unwrap();
        assert_eq!(intent.status, domain_billing::IntentStatus::Initialized);
    }

    #[tokio::test]
    async fn test_verify_after_checkout() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let reference = initiate(&api, &visit_id, "5000").await;
        let visit = core_kernel::VisitId::from_uuid(visit_id.parse().unwrap());
        api.harness
            .gateway
            .succeed(&reference, core_kernel::Money::new(rust_decimal_macros::dec!(5000)), visit)
            .await;

        let body: Value = api
            .server
            .post(&format!("/api/v1/gateway/verify/{}", reference))
            .authorization_bearer(api.token(roles::CASHIER))
            .await
            .json();
        assert_eq!(body["result"], "settled");
    }
}

// ============================================================================
// Leaks and the daily close
// ============================================================================

mod close_tests {
    use super::*;

    #[tokio::test]
    async fn test_detect_and_resolve_leak() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        let visit = core_kernel::VisitId::from_uuid(visit_id.parse().unwrap());
        let artifact = TestArtifactBuilder::new(visit).build();
        api.harness.artifacts.register(artifact.clone()).await;
        let accountant = api.token(roles::ACCOUNTANT);

        let detected: Value = api
            .server
            .post("/api/v1/leaks/detect")
            .authorization_bearer(&accountant)
            .json(&json!({ "entity_type": "LAB_RESULT", "entity_id": artifact.entity_id.as_uuid() }))
            .await
            .json();
        assert_eq!(detected["leaking"], true);
        let leak_id = detected["leak"]["id"].as_str().unwrap().to_string();

        let summary: Value = api
            .server
            .get("/api/v1/leaks/summary")
            .authorization_bearer(&accountant)
            .await
            .json();
        assert_eq!(summary["total_leaks"], 1);
        assert_eq!(summary["by_entity_type"]["LAB_RESULT"]["total"], 1);

        let path = format!("/api/v1/leaks/{}/resolve", leak_id);
        api.server
            .post(&path)
            .authorization_bearer(&accountant)
            .json(&json!({ "notes": "Billed on the follow-up visit" }))
            .await
            .assert_status_ok();
        api.server
            .post(&path)
            .authorization_bearer(&accountant)
            .json(&json!({ "notes": "again" }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_daily_close_lifecycle() {
        let api = TestApi::new();
        let visit_id = api.billed_visit().await;
        api.server
            .post(&format!("/api/v1/visits/{}/payments", visit_id))
            .authorization_bearer(api.token(roles::CASHIER))
            .json(&json!({ "amount": "15000", "method": "CARD" }))
            .await
            .assert_status_ok();

        let accountant_id = IdFixtures::accountant_id();
        let accountant = api.token_for(&accountant_id, roles::ACCOUNTANT);

        let created: Value = api
            .server
            .post("/api/v1/reconciliations")
            .authorization_bearer(&accountant)
            .json(&json!({}))
            .await
            .json();
        assert_eq!(created["status"], "DRAFT");
        let date = created["reconciliation_date"].as_str().unwrap().to_string();

        let refreshed: Value = api
            .server
            .post(&format!("/api/v1/reconciliations/{}/refresh", date))
            .authorization_bearer(&accountant)
            .await
            .json();
        assert_eq!(decimal(&refreshed["total_card"]), rust_decimal_macros::dec!(15000));
        assert_eq!(refreshed["active_visits_closed"], 1);

        let finalized: Value = api
            .server
            .post(&format!("/api/v1/reconciliations/{}/finalize", date))
            .authorization_bearer(&accountant)
            .await
            .json();
        assert_eq!(finalized["status"], "FINALIZED");
        assert_eq!(finalized["finalized_by"], accountant_id.as_uuid().to_string());

        api.server
            .post(&format!("/api/v1/reconciliations/{}/refresh", date))
            .authorization_bearer(&accountant)
            .await
            .assert_status(StatusCode::CONFLICT);

        api.server
            .get("/api/v1/reconciliations/1999-01-01")
            .authorization_bearer(&accountant)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
