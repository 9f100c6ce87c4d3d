//! Visit and line item DTOs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_kernel::{ArtifactId, ServiceId};
use domain_billing::{ArtifactLink, BillingSummary, EntityType, LineItem, ServiceSnapshot};

use super::positive_amount;

#[derive(Debug, Deserialize)]
pub struct RegisterVisitRequest {
    pub patient_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddLineItemRequest {
    pub service_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub service_code: String,
    #[validate(length(min = 1, max = 200))]
    pub service_name: String,
    /// Allocation tag, e.g. "registration"
    #[validate(length(min = 1, max = 64))]
    pub tag: Option<String>,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    pub artifact: Option<ArtifactLinkRequest>,
}

impl AddLineItemRequest {
    pub fn service(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            service_id: self.service_id.map(ServiceId::from_uuid),
            code: self.service_code.trim().to_string(),
            name: self.service_name.trim().to_string(),
            tag: self.tag.as_ref().map(|t| t.trim().to_string()),
        }
    }

    pub fn artifact_link(&self) -> Option<ArtifactLink> {
        self.artifact.as_ref().map(ArtifactLinkRequest::link)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ArtifactLinkRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl ArtifactLinkRequest {
    pub fn link(&self) -> ArtifactLink {
        ArtifactLink {
            entity_type: self.entity_type,
            entity_id: ArtifactId::from_uuid(self.entity_id),
        }
    }
}

/// A visit's bill: the rollup and every line item
#[derive(Debug, Serialize)]
pub struct VisitBillingResponse {
    pub summary: BillingSummary,
    pub line_items: Vec<LineItem>,
}
