//! Clinical artifact projection
//!
//! The ledger never reads clinical records directly. Each clinical module
//! (lab, radiology, pharmacy, procedures, consultations) exposes a narrow
//! billing projection of its artifacts through `BillableArtifact`, and the
//! leak detector looks artifacts up through `ClinicalArtifactPort`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{
    ArtifactId, DayWindow, DomainPort, LineItemId, Money, PortError, VisitId,
};

/// Kind of clinical artifact that implies billable work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    LabResult,
    RadiologyReport,
    DispensedDrug,
    ProcedureTask,
    Consultation,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::LabResult,
        EntityType::RadiologyReport,
        EntityType::DispensedDrug,
        EntityType::ProcedureTask,
        EntityType::Consultation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::LabResult => "LAB_RESULT",
            EntityType::RadiologyReport => "RADIOLOGY_REPORT",
            EntityType::DispensedDrug => "DISPENSED_DRUG",
            EntityType::ProcedureTask => "PROCEDURE_TASK",
            EntityType::Consultation => "CONSULTATION",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PortError::validation_field(format!("unknown entity type {}", s), "entity_type"))
    }
}

/// Link from a line item back to the artifact that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLink {
    pub entity_type: EntityType,
    pub entity_id: ArtifactId,
}

/// Pointer to an artifact, as passed in by clinical modules
pub type ArtifactRef = ArtifactLink;

/// Billing projection of one clinical artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReference {
    /// Visit the artifact belongs to
    pub visit_id: VisitId,
    /// Line item that bills for this artifact, if one was created
    pub line_item_id: Option<LineItemId>,
    /// Emergency care may proceed before payment
    pub is_emergency: bool,
    /// The clinical work has been performed (result recorded, drug dispensed)
    pub is_completed: bool,
    /// Catalog price of the ordered service, used when no line item exists
    pub catalog_price: Option<Money>,
}

/// Implemented by each clinical module for the artifacts it owns
pub trait BillableArtifact: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn entity_id(&self) -> ArtifactId;

    fn billing_reference(&self) -> BillingReference;

    fn artifact_ref(&self) -> ArtifactRef {
        ArtifactLink {
            entity_type: self.entity_type(),
            entity_id: self.entity_id(),
        }
    }
}

/// A materialised billing projection, as stored by the artifact adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSnapshot {
    pub entity_type: EntityType,
    pub entity_id: ArtifactId,
    pub reference: BillingReference,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BillableArtifact for ArtifactSnapshot {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn entity_id(&self) -> ArtifactId {
        self.entity_id
    }

    fn billing_reference(&self) -> BillingReference {
        self.reference.clone()
    }
}

/// Read-only access to the clinical side's billing projections
#[async_trait]
pub trait ClinicalArtifactPort: DomainPort {
    /// Resolves one artifact; `None` when it does not exist
    async fn billing_reference(
        &self,
        entity_type: EntityType,
        entity_id: ArtifactId,
    ) -> Result<Option<BillingReference>, PortError>;

    /// Artifacts whose work was completed within the window
    async fn completed_between(&self, window: &DayWindow) -> Result<Vec<ArtifactRef>, PortError>;
}
