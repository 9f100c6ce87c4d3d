//! Pre-built Test Fixtures
//!
//! Ready-to-use values for the ledger's common entities. Amounts are in
//! the clinic's currency with two decimal places.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{ArtifactId, Money, PatientId, Timezone, UserId};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use domain_billing::{ServiceSnapshot, SignatureVerifier};

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Registration fee
    pub fn registration_fee() -> Money {
        Money::new(dec!(5000.00))
    }

    /// GP consultation fee
    pub fn consultation_fee() -> Money {
        Money::new(dec!(10000.00))
    }

    /// Full blood count
    pub fn lab_fee() -> Money {
        Money::new(dec!(8000.00))
    }

    /// Chest X-ray
    pub fn radiology_fee() -> Money {
        Money::new(dec!(15000.00))
    }

    pub fn zero() -> Money {
        Money::zero()
    }
}

/// Catalog services as they would be snapshotted onto line items
pub struct ServiceFixtures;

impl ServiceFixtures {
    pub fn registration() -> ServiceSnapshot {
        ServiceSnapshot::new("REG-OPD", "Outpatient registration").with_tag("registration")
    }

    pub fn consultation() -> ServiceSnapshot {
        ServiceSnapshot::new("CONS-GP", "GP consultation").with_tag("consultation")
    }

    pub fn lab() -> ServiceSnapshot {
        ServiceSnapshot::new("LAB-FBC", "Full blood count").with_tag("lab")
    }

    pub fn radiology() -> ServiceSnapshot {
        ServiceSnapshot::new("RAD-CXR", "Chest X-ray").with_tag("radiology")
    }

    pub fn pharmacy(code: &str) -> ServiceSnapshot {
        ServiceSnapshot::new(code, format!("Dispensed {}", code)).with_tag("pharmacy")
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// A Monday business day
    pub fn business_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    /// Mid-morning on `business_date`, UTC
    pub fn mid_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    /// UTC+1 clinic timezone
    pub fn lagos() -> Timezone {
        "Africa/Lagos".parse().unwrap()
    }
}

/// Fixture for identifier test data
pub struct IdFixtures;

impl IdFixtures {
    /// Deterministic patient id
    pub fn patient_id() -> PatientId {
        PatientId::from_uuid(Uuid::parse_str("0190f3a4-5b6c-7d8e-9f00-000000000001").unwrap())
    }

    /// Deterministic cashier id
    pub fn cashier_id() -> UserId {
        UserId::from_uuid(Uuid::parse_str("0190f3a4-5b6c-7d8e-9f00-000000000002").unwrap())
    }

    /// Deterministic accountant id
    pub fn accountant_id() -> UserId {
        UserId::from_uuid(Uuid::parse_str("0190f3a4-5b6c-7d8e-9f00-000000000003").unwrap())
    }

    pub fn artifact_id() -> ArtifactId {
        ArtifactId::new()
    }
}

/// Webhook payloads and signatures
pub struct GatewayFixtures;

impl GatewayFixtures {
    pub const WEBHOOK_SECRET: &'static str = "whsec_test_utils";

    pub fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(Self::WEBHOOK_SECRET)
    }

    /// A `charge.success` notification for `reference`
    pub fn charge_success(reference: &str) -> serde_json::Value {
        json!({
            "event": "charge.success",
            "data": {
                "reference": reference,
                "status": "success",
                "id": 4099260516u64,
                "customer": { "email": "patient@example.com", "customer_code": "CUS_test" }
            }
        })
    }

    /// Serialises `body` and signs it with the fixture secret
    pub fn signed(body: &serde_json::Value) -> (Vec<u8>, String) {
        let bytes = serde_json::to_vec(body).unwrap();
        let signature = Self::verifier().sign(&bytes).unwrap();
        (bytes, signature)
    }
}
