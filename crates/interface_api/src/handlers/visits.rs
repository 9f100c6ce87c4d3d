//! Visit and line item handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use core_kernel::{PatientId, VisitId};
use domain_billing::{LineItem, Visit};

use crate::auth::{permissions, Claims};
use crate::dto::visits::*;
use crate::handlers::authorize;
use crate::{error::ApiError, AppState};

/// Opens a visit for a patient
pub async fn register_visit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<RegisterVisitRequest>,
) -> Result<(StatusCode, Json<Visit>), ApiError> {
    authorize(&claims, permissions::BILLING_WRITE)?;
    let visit = state
        .ledger
        .register_visit(PatientId::from_uuid(request.patient_id))
        .await?;
    Ok((StatusCode::CREATED, Json(visit)))
}

/// The visit's bill: summary plus line items
pub async fn get_billing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<VisitBillingResponse>, ApiError> {
    authorize(&claims, permissions::BILLING_READ)?;
    let visit_id = VisitId::from_uuid(id);
    let summary = state.ledger.billing_summary(visit_id).await?;
    let line_items = state.ledger.line_items(visit_id).await?;
    Ok(Json(VisitBillingResponse { summary, line_items }))
}

/// Adds a billable service to a visit
pub async fn add_line_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<LineItem>), ApiError> {
    authorize(&claims, permissions::BILLING_WRITE)?;
    request.validate()?;
    let item = state
        .ledger
        .add_line_item(
            VisitId::from_uuid(id),
            request.service(),
            request.amount,
            request.artifact_link(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}
