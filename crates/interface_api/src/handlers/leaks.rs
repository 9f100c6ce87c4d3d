//! Leak detection handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use core_kernel::LeakRecordId;
use domain_billing::{LeakRecord, LeakScanReport, LeakSummary};

use crate::auth::{permissions, Claims};
use crate::dto::leaks::*;
use crate::handlers::authorize;
use crate::{error::ApiError, AppState};

/// Checks one completed artifact for unpaid work
pub async fn detect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<DetectLeakRequest>,
) -> Result<Json<DetectLeakResponse>, ApiError> {
    authorize(&claims, permissions::LEAK_DETECT)?;
    let leak = state
        .detector
        .detect(request.entity_type, request.artifact_id())
        .await?;
    Ok(Json(DetectLeakResponse {
        leaking: leak.is_some(),
        leak,
    }))
}

/// Scans an explicit batch, or everything completed on a day
pub async fn scan(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<LeakScanReport>, ApiError> {
    authorize(&claims, permissions::LEAK_DETECT)?;
    request.validate()?;

    let report = match request.artifact_refs() {
        Some(artifacts) => state.detector.scan(&artifacts).await,
        None => {
            let date = request
                .date
                .unwrap_or_else(|| state.config.timezone.business_date(Utc::now()));
            state.detector.scan_completed_on(date).await?
        }
    };
    Ok(Json(report))
}

/// Leaks detected on a business day, by entity type
pub async fn daily_summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<LeakSummary>, ApiError> {
    authorize(&claims, permissions::LEAK_DETECT)?;
    let date = query
        .date
        .unwrap_or_else(|| state.config.timezone.business_date(Utc::now()));
    Ok(Json(state.detector.daily_summary(date).await?))
}

pub async fn resolve(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveLeakRequest>,
) -> Result<Json<LeakRecord>, ApiError> {
    let user = authorize(&claims, permissions::LEAK_RESOLVE)?;
    request.validate()?;
    let resolved = state
        .detector
        .resolve(LeakRecordId::from_uuid(id), user, request.notes.trim())
        .await?;
    Ok(Json(resolved))
}
