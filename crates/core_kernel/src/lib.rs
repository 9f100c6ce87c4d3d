//! Core Kernel - Foundational types for the clinic billing ledger
//!
//! This crate provides the building blocks shared by every other crate:
//! - Fixed-point money for a single-currency ledger
//! - Clinic-local business day windows
//! - Strongly-typed identifiers
//! - Port infrastructure for the hexagonal adapters

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, MoneyError, MONEY_SCALE};
pub use temporal::{DayWindow, TemporalError, Timezone};
pub use identifiers::{
    AllocationId, ArtifactId, AuditEventId, LeakRecordId, LineItemId, PatientId,
    PaymentId, PaymentIntentId, ReconciliationId, ServiceId, UserId, VisitId,
};
pub use ports::{
    AdapterHealth, CircuitBreakerConfig, DomainPort, HealthCheckResult, HealthCheckable,
    PortError,
};
