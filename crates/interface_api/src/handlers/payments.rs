//! Payment handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use core_kernel::VisitId;
use uuid::Uuid;
use validator::Validate;

use domain_billing::{BackfillReport, ManualPayment, ReconciliationResult, RecordedPayment};

use crate::auth::{permissions, Claims};
use crate::dto::payments::*;
use crate::handlers::authorize;
use crate::{error::ApiError, AppState};

/// Records a desk payment and allocates it
///
/// Replaying the same reference returns the original payment without
/// allocating again.
pub async fn record_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<RecordedPayment>, ApiError> {
    let cashier = authorize(&claims, permissions::PAYMENT_RECORD)?;
    request.validate()?;

    let recorded = state
        .ledger
        .record_manual_payment(ManualPayment {
            visit_id: VisitId::from_uuid(id),
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            received_by: Some(cashier),
        })
        .await?;
    Ok(Json(recorded))
}

/// Opens a gateway checkout for part or all of a visit's bill
pub async fn initiate_gateway_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<GatewayPaymentRequest>,
) -> Result<(StatusCode, Json<InitiatedPaymentResponse>), ApiError> {
    let user = authorize(&claims, permissions::PAYMENT_RECORD)?;
    request.validate()?;

    let initiated = state
        .reconciler
        .initiate(
            VisitId::from_uuid(id),
            request.amount,
            request.customer_email,
            Some(&user),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(initiated.into())))
}

/// Verifies a reference with the provider after the payer returns from
/// checkout, without waiting for the webhook
pub async fn verify_reference(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ReconciliationResult>, ApiError> {
    authorize(&claims, permissions::PAYMENT_RECORD)?;
    let result = state.reconciler.reconcile_reference(reference.trim()).await?;
    Ok(Json(result))
}

/// Allocates historical payments that were never allocated
pub async fn backfill(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<BackfillRequest>,
) -> Result<Json<BackfillReport>, ApiError> {
    authorize(&claims, permissions::PAYMENT_BACKFILL)?;
    request.validate()?;
    let report = state.ledger.backfill_unallocated(request.limit).await?;
    Ok(Json(report))
}
