//! Infrastructure Database Layer
//!
//! PostgreSQL adapters for the clinic billing ledger, built on SQLx.
//!
//! # Architecture
//!
//! The domain crate defines the `LedgerStore` and `ClinicalArtifactPort`
//! ports; this crate implements them:
//!
//! - [`PgLedgerStore`]: one database transaction per unit of work. Row locks
//!   (`SELECT ... FOR UPDATE`) serialise concurrent allocations on a visit,
//!   and conditional `UPDATE ... WHERE` statements implement the
//!   exactly-once transitions.
//! - [`PgClinicalArtifactAdapter`]: reads the `clinical_billing_references`
//!   projection maintained by the clinical modules.
//!
//! The schema in `migrations/` repeats the ledger's integrity rules as
//! CHECK constraints, partial unique indexes and triggers.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/clinic_ledger")).await?;
//! infra_db::run_migrations(&pool).await?;
//! let store = PgLedgerStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
mod rows;

pub use adapters::{PgClinicalArtifactAdapter, PgLedgerStore, PgUnitOfWork};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
