//! Database adapters for the ledger's ports
//!
//! - [`PgLedgerStore`]: the `LedgerStore` port
//! - [`PgClinicalArtifactAdapter`]: the `ClinicalArtifactPort` port

mod artifacts;
mod ledger;

pub use artifacts::PgClinicalArtifactAdapter;
pub use ledger::{PgLedgerStore, PgUnitOfWork};
