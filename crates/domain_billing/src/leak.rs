//! Revenue leak detection
//!
//! A leak is a completed clinical artifact whose billing is not settled:
//! either no line item exists for it, or its line item is not PAID.
//! Emergency artifacts are exempt when `LedgerConfig::emergency_exempt`
//! is set.
//!
//! Detection is idempotent per artifact. While an unresolved record
//! exists for an artifact, detecting it again returns that record. Records
//! are append-only: the only mutation is a one-way manual resolution.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use core_kernel::{ArtifactId, LeakRecordId, LineItemId, Money, Timezone, UserId, VisitId};

use crate::artifact::{ArtifactRef, BillableArtifact, BillingReference, ClinicalArtifactPort, EntityType};
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::ports::{AuditSink, LedgerStore};

/// A detected inconsistency between clinical and billing records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakRecord {
    pub id: LeakRecordId,
    pub entity_type: EntityType,
    pub entity_id: ArtifactId,
    pub visit_id: VisitId,
    pub line_item_id: Option<LineItemId>,
    pub estimated_loss: Money,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
    pub resolution_notes: Option<String>,
}

impl LeakRecord {
    pub fn new(
        entity_type: EntityType,
        entity_id: ArtifactId,
        visit_id: VisitId,
        line_item_id: Option<LineItemId>,
        estimated_loss: Money,
    ) -> Self {
        Self {
            id: LeakRecordId::new_v7(),
            entity_type,
            entity_id,
            visit_id,
            line_item_id,
            estimated_loss,
            detected_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Marks the leak resolved; fails if it already is
    pub fn resolve(&mut self, user: UserId, notes: impl Into<String>, at: DateTime<Utc>) -> Result<(), BillingError> {
        if self.is_resolved() {
            return Err(BillingError::AlreadyResolved(self.id));
        }
        self.resolved_at = Some(at);
        self.resolved_by = Some(user);
        self.resolution_notes = Some(notes.into());
        Ok(())
    }
}

/// Counts for one entity type within a summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLeakCount {
    pub total: usize,
    pub estimated_loss: Money,
}

/// Read-side rollup of the leaks detected on one business day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakSummary {
    pub date: NaiveDate,
    pub total_leaks: usize,
    pub total_estimated_loss: Money,
    pub resolved: usize,
    pub unresolved: usize,
    pub by_entity_type: BTreeMap<EntityType, EntityLeakCount>,
}

impl LeakSummary {
    pub fn from_records(date: NaiveDate, records: &[LeakRecord]) -> Self {
        let mut by_entity_type: BTreeMap<EntityType, EntityLeakCount> = BTreeMap::new();
        for record in records {
            let entry = by_entity_type.entry(record.entity_type).or_default();
            entry.total += 1;
            entry.estimated_loss += record.estimated_loss;
        }
        let resolved = records.iter().filter(|r| r.is_resolved()).count();

        Self {
            date,
            total_leaks: records.len(),
            total_estimated_loss: records.iter().map(|r| r.estimated_loss).sum(),
            resolved,
            unresolved: records.len() - resolved,
            by_entity_type,
        }
    }
}

/// Per-artifact failure in a batch scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub artifact: ArtifactRef,
    pub error: String,
}

/// Result of scanning a batch of artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakScanReport {
    pub examined: usize,
    pub clean: usize,
    pub leaks: Vec<LeakRecord>,
    pub failures: Vec<ScanFailure>,
}

/// Cross-checks completed clinical work against line items
pub struct LeakDetector {
    store: Arc<dyn LedgerStore>,
    artifacts: Arc<dyn ClinicalArtifactPort>,
    config: Arc<LedgerConfig>,
    timezone: Timezone,
    audit: Arc<dyn AuditSink>,
}

impl LeakDetector {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        artifacts: Arc<dyn ClinicalArtifactPort>,
        config: Arc<LedgerConfig>,
        timezone: Timezone,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            artifacts,
            config,
            timezone,
            audit,
        }
    }

    /// Checks one artifact, looked up through the clinical projection
    #[instrument(skip(self), fields(entity_type = %entity_type, entity_id = %entity_id))]
    pub async fn detect(
        &self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<LeakRecord>, BillingError> {
        let reference = self
            .artifacts
            .billing_reference(entity_type, entity_id)
            .await?
            .ok_or_else(|| BillingError::ArtifactNotFound {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            })?;
        self.check(entity_type, entity_id, &reference).await
    }

    /// Checks an artifact the caller already holds
    pub async fn detect_artifact(&self, artifact: &dyn BillableArtifact) -> Result<Option<LeakRecord>, BillingError> {
        self.check(artifact.entity_type(), artifact.entity_id(), &artifact.billing_reference())
            .await
    }

    async fn check(
        &self,
        entity_type: EntityType,
        entity_id: ArtifactId,
        reference: &BillingReference,
    ) -> Result<Option<LeakRecord>, BillingError> {
        if !reference.is_completed {
            debug!("Artifact not completed; nothing billable yet");
            return Ok(None);
        }
        if reference.is_emergency && self.config.emergency_exempt {
            debug!("Emergency artifact exempt from leak detection");
            return Ok(None);
        }

        let mut uow = self.store.begin().await?;

        let line_item = match reference.line_item_id {
            Some(id) => {
                let item = uow.get_line_item(id).await?;
                if item.is_none() {
                    warn!(line_item_id = %id, "Artifact links to a missing line item");
                }
                item
            }
            None => None,
        };

        let estimated_loss = match &line_item {
            Some(item) if item.is_settled() => return Ok(None),
            Some(item) => item.outstanding_amount,
            None => reference.catalog_price.unwrap_or_default(),
        };

        if let Some(existing) = uow.find_unresolved_leak(entity_type, entity_id).await? {
            debug!(leak_id = %existing.id, "Unresolved leak already recorded");
            return Ok(Some(existing));
        }

        let candidate = LeakRecord::new(
            entity_type,
            entity_id,
            reference.visit_id,
            line_item.as_ref().map(|i| i.id),
            estimated_loss,
        );
        let stored = uow.insert_leak_if_absent(&candidate).await?;
        uow.commit().await?;

        if stored.id == candidate.id {
            info!(
                leak_id = %stored.id,
                visit_id = %stored.visit_id,
                estimated_loss = %stored.estimated_loss,
                "Revenue leak detected"
            );
            self.audit.record("leak.detected", None, &stored.id.to_string());
        }
        Ok(Some(stored))
    }

    /// Runs detection over a batch, isolating failures per artifact
    pub async fn scan(&self, artifacts: &[ArtifactRef]) -> LeakScanReport {
        let mut report = LeakScanReport::default();

        for artifact in artifacts {
            report.examined += 1;
            match self.detect(artifact.entity_type, artifact.entity_id).await {
                Ok(Some(leak)) => report.leaks.push(leak),
                Ok(None) => report.clean += 1,
                Err(e) => {
                    warn!(
                        entity_type = %artifact.entity_type,
                        entity_id = %artifact.entity_id,
                        error = %e,
                        "Leak detection failed for artifact"
                    );
                    report.failures.push(ScanFailure {
                        artifact: *artifact,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            leaks = report.leaks.len(),
            failures = report.failures.len(),
            "Leak scan finished"
        );
        report
    }

    /// Scans every artifact completed on a business day
    pub async fn scan_completed_on(&self, date: NaiveDate) -> Result<LeakScanReport, BillingError> {
        let window = self.timezone.day_window(date)?;
        let artifacts = self.artifacts.completed_between(&window).await?;
        Ok(self.scan(&artifacts).await)
    }

    /// Summarises the leaks detected on a business day. Read-only.
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<LeakSummary, BillingError> {
        let window = self.timezone.day_window(date)?;
        let mut uow = self.store.begin().await?;
        let records = uow.leaks_detected_between(&window).await?;
        Ok(LeakSummary::from_records(date, &records))
    }

    /// Manually resolves a leak; one-way
    #[instrument(skip(self, notes))]
    pub async fn resolve(
        &self,
        leak_id: LeakRecordId,
        user: UserId,
        notes: &str,
    ) -> Result<LeakRecord, BillingError> {
        let mut uow = self.store.begin().await?;
        let existing = uow
            .get_leak(leak_id)
            .await?
            .ok_or(BillingError::LeakNotFound(leak_id))?;
        if existing.is_resolved() {
            return Err(BillingError::AlreadyResolved(leak_id));
        }

        let resolved = uow
            .resolve_leak(leak_id, user, notes, Utc::now())
            .await?
            .ok_or(BillingError::AlreadyResolved(leak_id))?;
        uow.commit().await?;

        info!(leak_id = %leak_id, resolved_by = %user, "Leak resolved");
        self.audit.record("leak.resolved", Some(&user), &leak_id.to_string());
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(entity_type: EntityType, loss: rust_decimal::Decimal) -> LeakRecord {
        LeakRecord::new(entity_type, ArtifactId::new(), VisitId::new(), None, Money::new(loss))
    }

    #[test]
    fn test_resolve_is_one_way() {
        let mut leak = record(EntityType::LabResult, dec!(3000));
        leak.resolve(UserId::new(), "billed late", Utc::now()).unwrap();
        assert!(leak.is_resolved());
        assert!(matches!(
            leak.resolve(UserId::new(), "again", Utc::now()),
            Err(BillingError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_summary_rollup() {
        let mut resolved = record(EntityType::LabResult, dec!(3000));
        resolved.resolve(UserId::new(), "ok", Utc::now()).unwrap();
        let records = vec![
            resolved,
            record(EntityType::LabResult, dec!(2000)),
            record(EntityType::DispensedDrug, dec!(500)),
        ];
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let summary = LeakSummary::from_records(date, &records);

        assert_eq!(summary.total_leaks, 3);
        assert_eq!(summary.total_estimated_loss, Money::new(dec!(5500)));
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.unresolved, 2);
        assert_eq!(summary.by_entity_type[&EntityType::LabResult].total, 2);
        assert_eq!(
            summary.by_entity_type[&EntityType::DispensedDrug].estimated_loss,
            Money::new(dec!(500))
        );
    }

    #[test]
    fn test_empty_summary() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let summary = LeakSummary::from_records(date, &[]);
        assert_eq!(summary.total_leaks, 0);
        assert!(summary.total_estimated_loss.is_zero());
        assert!(summary.by_entity_type.is_empty());
    }
}
