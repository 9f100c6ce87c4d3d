//! Test Utilities Crate
//!
//! Shared test infrastructure, fixtures, and helpers for the clinic
//! billing ledger test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built values for services, amounts, dates and webhooks
//! - `builders`: Builder patterns for line items and clinical artifacts
//! - `harness`: Every ledger service wired over the in-memory adapters
//! - `database`: PostgreSQL testcontainer management
//! - `assertions`: Ledger-specific assertion helpers
//! - `generators`: Property-based test data generators

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;
pub mod harness;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
