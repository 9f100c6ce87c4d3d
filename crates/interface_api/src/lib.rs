//! HTTP API Layer
//!
//! This crate exposes the clinic billing ledger over HTTP using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: one module per ledger component (visits, payments,
//!   webhooks, leaks, reconciliations)
//! - **Middleware**: JWT authentication and request audit logging
//! - **DTOs**: request bodies validated with `validator`, response shapes
//! - **Error Handling**: `BillingError` mapped onto status codes
//!
//! The gateway webhook is public; the provider authenticates it by signing
//! the body, which the reconciler verifies before trusting anything in it.
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let state = AppState::with_postgres(pool, config)?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    http::HeaderName,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;
use domain_billing::{
    AllocationEngine, BillingError, GatewayReconciler, HttpPaymentGateway, LeakDetector, LedgerService,
    ReconciliationCloser, SignatureVerifier, TracingAuditSink,
};
use infra_db::{PgClinicalArtifactAdapter, PgLedgerStore};

use crate::config::ApiConfig;
use crate::handlers::{health, leaks, payments, reconciliations, visits, webhooks};
use crate::middleware::{audit_middleware, auth_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub ledger: Arc<LedgerService>,
    pub reconciler: Arc<GatewayReconciler>,
    pub detector: Arc<LeakDetector>,
    pub closer: Arc<ReconciliationCloser>,
    /// Adapters probed by the readiness check
    pub probes: Vec<Arc<dyn HealthCheckable>>,
}

impl AppState {
    /// Wires the ledger over PostgreSQL and the HTTP payment gateway
    pub fn with_postgres(pool: PgPool, config: ApiConfig) -> Result<Self, BillingError> {
        config.ledger.validate()?;

        let ledger_config = Arc::new(config.ledger.clone());
        let store = Arc::new(PgLedgerStore::new(pool.clone()));
        let artifacts = Arc::new(PgClinicalArtifactAdapter::new(pool));
        let gateway = Arc::new(HttpPaymentGateway::new(config.gateway.clone())?);
        let audit = Arc::new(TracingAuditSink);
        let engine = AllocationEngine::new(ledger_config.clone());

        let ledger = LedgerService::new(store.clone(), engine.clone(), ledger_config.clone(), audit.clone());
        let reconciler = GatewayReconciler::new(
            store.clone(),
            gateway.clone(),
            SignatureVerifier::new(config.gateway.webhook_secret.clone()),
            engine,
            audit.clone(),
            config.gateway.timeout(),
        )
        .with_callback_url(config.gateway.callback_url.clone());
        let detector = LeakDetector::new(
            store.clone(),
            artifacts.clone(),
            ledger_config.clone(),
            config.timezone,
            audit.clone(),
        );
        let closer = ReconciliationCloser::new(store.clone(), ledger_config, config.timezone, audit);
        let probes: Vec<Arc<dyn HealthCheckable>> = vec![store, artifacts, gateway];

        Ok(Self {
            config: Arc::new(config),
            ledger: Arc::new(ledger),
            reconciler: Arc::new(reconciler),
            detector: Arc::new(detector),
            closer: Arc::new(closer),
            probes,
        })
    }
}

/// Creates the main API router
///
/// # Returns
///
/// Configured Axum router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Public routes (no bearer token)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/webhooks/gateway", post(webhooks::gateway_webhook));

    let visit_routes = Router::new()
        .route("/", post(visits::register_visit))
        .route("/:id/billing", get(visits::get_billing))
        .route("/:id/line-items", post(visits::add_line_item))
        .route("/:id/payments", post(payments::record_payment))
        .route("/:id/gateway-payments", post(payments::initiate_gateway_payment));

    let payment_routes = Router::new()
        .route("/payments/backfill", post(payments::backfill))
        .route("/gateway/verify/:reference", post(payments::verify_reference));

    let leak_routes = Router::new()
        .route("/detect", post(leaks::detect))
        .route("/scan", post(leaks::scan))
        .route("/summary", get(leaks::daily_summary))
        .route("/:id/resolve", post(leaks::resolve));

    let reconciliation_routes = Router::new()
        .route("/", post(reconciliations::create_or_get))
        .route("/:date", get(reconciliations::get))
        .route("/:date/refresh", post(reconciliations::refresh))
        .route("/:date/finalize", post(reconciliations::finalize));

    // Protected API routes
    let api_routes = Router::new()
        .nest("/visits", visit_routes)
        .nest("/leaks", leak_routes)
        .nest("/reconciliations", reconciliation_routes)
        .merge(payment_routes)
        .layer(axum_middleware::from_fn_with_state(state.clone(), audit_middleware))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    let request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
