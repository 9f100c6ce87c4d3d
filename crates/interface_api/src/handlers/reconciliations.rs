//! Daily reconciliation handlers

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};

use crate::auth::{permissions, Claims};
use crate::dto::reconciliations::*;
use crate::handlers::authorize;
use crate::{error::ApiError, AppState};

/// Opens the day's draft, or returns the existing record unchanged
pub async fn create_or_get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<CreateReconciliationRequest>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let user = authorize(&claims, permissions::RECONCILIATION_CLOSE)?;
    let date = request
        .date
        .unwrap_or_else(|| state.closer.timezone().business_date(Utc::now()));
    let record = state.closer.create_or_get(date, Some(user)).await?;
    Ok(Json(record.into()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    authorize(&claims, permissions::RECONCILIATION_READ)?;
    Ok(Json(state.closer.get(date).await?.into()))
}

/// Recomputes a draft's totals; 409 once finalized
pub async fn refresh(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    authorize(&claims, permissions::RECONCILIATION_CLOSE)?;
    Ok(Json(state.closer.refresh(date).await?.into()))
}

pub async fn finalize(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let user = authorize(&claims, permissions::RECONCILIATION_CLOSE)?;
    Ok(Json(state.closer.finalize(date, user).await?.into()))
}
