//! Leak detection DTOs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_kernel::ArtifactId;
use domain_billing::{ArtifactRef, EntityType, LeakRecord};

/// Pushed by a clinical module when work completes
#[derive(Debug, Serialize, Deserialize)]
pub struct DetectLeakRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl DetectLeakRequest {
    pub fn artifact_id(&self) -> ArtifactId {
        ArtifactId::from_uuid(self.entity_id)
    }
}

#[derive(Debug, Serialize)]
pub struct DetectLeakResponse {
    pub leaking: bool,
    pub leak: Option<LeakRecord>,
}

/// Either an explicit batch or every artifact completed on `date`
#[derive(Debug, Deserialize, Validate)]
pub struct ScanRequest {
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 500))]
    pub artifacts: Option<Vec<DetectLeakRequest>>,
}

impl ScanRequest {
    pub fn artifact_refs(&self) -> Option<Vec<ArtifactRef>> {
        self.artifacts.as_ref().map(|artifacts| {
            artifacts
                .iter()
                .map(|a| ArtifactRef {
                    entity_type: a.entity_type,
                    entity_id: a.artifact_id(),
                })
                .collect()
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveLeakRequest {
    #[validate(length(min = 1, max = 2000))]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_request_accepts_wire_entity_types() {
        let request: ScanRequest = serde_json::from_str(&format!(
            r#"{{"artifacts": [{{"entity_type": "RADIOLOGY_REPORT", "entity_id": "{}"}}]}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        let refs = request.artifact_refs().unwrap();
        assert_eq!(refs[0].entity_type, EntityType::RadiologyReport);
        assert!(request.date.is_none());
    }

    #[test]
    fn test_resolution_needs_notes() {
        assert!(ResolveLeakRequest { notes: String::new() }.validate().is_err());
        assert!(ResolveLeakRequest {
            notes: "Billed on follow-up visit".to_string()
        }
        .validate()
        .is_ok());
    }
}
