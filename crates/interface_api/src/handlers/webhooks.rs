//! Payment provider webhook

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use tracing::error;

use domain_billing::{BillingError, ReconciliationResult};

use crate::{error::ApiError, AppState};

/// Header carrying the hex HMAC-SHA512 of the raw body
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Receives a provider notification
///
/// The raw body is verified before it is parsed. Any non-2xx response makes
/// the provider deliver again, so transient failures surface as 503 while
/// replays of settled references answer 200.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconciliationResult>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.reconciler.reconcile(&body, signature).await {
        Ok(result) => Ok(Json(result)),
        Err(e @ BillingError::IntegrityViolation { .. }) => {
            error!(error = %e, "Webhook rejected on integrity check");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
