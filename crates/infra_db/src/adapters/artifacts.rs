//! PostgreSQL Clinical Artifact Adapter
//!
//! Reads the `clinical_billing_references` projection. The clinical
//! modules own that table (or replace it with a view over their own
//! records); the ledger never writes to it.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Instant;

use core_kernel::{ArtifactId, DayWindow, DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_billing::{ArtifactRef, BillingReference, ClinicalArtifactPort, EntityType};

use crate::error::port_error;
use crate::rows::{ArtifactRefRow, BillingReferenceRow};

#[derive(Debug, Clone)]
pub struct PgClinicalArtifactAdapter {
    pool: PgPool,
}

impl PgClinicalArtifactAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgClinicalArtifactAdapter {}

#[async_trait]
impl HealthCheckable for PgClinicalArtifactAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM clinical_billing_references LIMIT 1")
            .fetch_one(&self.pool)
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy("postgres-clinical-artifacts", latency_ms),
            Err(e) => HealthCheckResult::unhealthy("postgres-clinical-artifacts", latency_ms, e.to_string()),
        }
    }
}

#[async_trait]
impl ClinicalArtifactPort for PgClinicalArtifactAdapter {
    async fn billing_reference(
        &self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<BillingReference>, PortError> {
        let row = sqlx::query_as::<_, BillingReferenceRow>(
            "SELECT visit_id, line_item_id, is_emergency, is_completed, catalog_price \
             FROM clinical_billing_references WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(entity_type.as_str())
        .bind(*entity_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(row.map(BillingReference::from))
    }

    async fn completed_between(&self, window: &DayWindow) -> Result<Vec<ArtifactRef>, PortError> {
        let rows = sqlx::query_as::<_, ArtifactRefRow>(
            "SELECT entity_type, entity_id FROM clinical_billing_references \
             WHERE is_completed AND completed_at >= $1 AND completed_at < $2 \
             ORDER BY completed_at, entity_id",
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;

        rows.into_iter()
            .map(|row| ArtifactRef::try_from(row).map_err(PortError::from))
            .collect()
    }
}
