//! Database Test Utilities
//!
//! Testcontainer management for PostgreSQL integration tests, plus helpers
//! for seeding the clinical projection the ledger reads.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::sync::OnceCell;

use domain_billing::{ArtifactSnapshot, BillableArtifact};
use infra_db::{PgClinicalArtifactAdapter, PgLedgerStore};

/// Default PostgreSQL image for testing
const POSTGRES_IMAGE: &str = "postgres";
const POSTGRES_TAG: &str = "16-alpine";
const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "clinic_ledger_test";

/// Tables emptied by `clear_data`, children first
const LEDGER_TABLES: &[&str] = &[
    "allocations",
    "payment_intents",
    "payments",
    "leak_records",
    "line_items",
    "daily_reconciliations",
    "clinical_billing_references",
    "visits",
];

/// Configuration for test database
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Default for TestDatabaseConfig {
    fn default() -> Self {
        Self {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl TestDatabaseConfig {
    /// Creates the database connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// A wrapper around a PostgreSQL test container
pub struct TestDatabase {
    _container: ContainerAsync<GenericImage>,
    pub config: TestDatabaseConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a new PostgreSQL container with the ledger schema applied
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to start or the schema fails
    /// to apply
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let container = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
            .with_exposed_port(5432.tcp())
            .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"))
            .with_env_var("POSTGRES_USER", POSTGRES_USER)
            .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
            .with_env_var("POSTGRES_DB", POSTGRES_DB)
            .start()
            .await?;

        let port = container.get_host_port_ipv4(5432.tcp()).await?;
        let host = container.get_host().await?.to_string();

        let config = TestDatabaseConfig {
            host,
            port,
            ..TestDatabaseConfig::default()
        };

        // Enough connections for the concurrency tests to contend for real
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.connection_url())
            .await?;

        let test_db = Self {
            _container: container,
            config,
            pool,
        };
        test_db.init_schema().await?;

        Ok(test_db)
    }

    /// Applies the ledger migration
    async fn init_schema(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let schema = include_str!("../../../migrations/20260101_000001_billing_ledger.sql");
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A ledger store over this database
    pub fn ledger_store(&self) -> PgLedgerStore {
        PgLedgerStore::new(self.pool.clone())
    }

    /// A clinical artifact adapter over this database
    pub fn artifact_adapter(&self) -> PgClinicalArtifactAdapter {
        PgClinicalArtifactAdapter::new(self.pool.clone())
    }

    /// Writes an artifact into the clinical projection, as a clinical
    /// module would
    pub async fn seed_artifact(&self, artifact: &ArtifactSnapshot) -> Result<(), sqlx::Error> {
        let reference = artifact.billing_reference();
        sqlx::query(
            "INSERT INTO clinical_billing_references \
             (entity_type, entity_id, visit_id, line_item_id, is_emergency, is_completed, catalog_price, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(artifact.entity_type.as_str())
        .bind(*artifact.entity_id.as_uuid())
        .bind(*reference.visit_id.as_uuid())
        .bind(reference.line_item_id.map(|id| *id.as_uuid()))
        .bind(reference.is_emergency)
        .bind(reference.is_completed)
        .bind(reference.catalog_price.map(|p| p.amount()))
        .bind(artifact.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears all data while preserving the schema
    ///
    /// `TRUNCATE` bypasses the row-level guard triggers on leak records and
    /// finalized reconciliations.
    pub async fn clear_data(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let statement = format!("TRUNCATE TABLE {} CASCADE", LEDGER_TABLES.join(", "));
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }
}

/// Global test database for shared integration tests
static SHARED_TEST_DB: OnceCell<Arc<TestDatabase>> = OnceCell::const_new();

/// Gets or creates a shared test database instance
///
/// # Panics
///
/// Panics if the database fails to initialize
pub async fn get_shared_test_database() -> Arc<TestDatabase> {
    SHARED_TEST_DB
        .get_or_init(|| async {
            Arc::new(
                TestDatabase::new()
                    .await
                    .expect("Failed to create shared test database"),
            )
        })
        .await
        .clone()
}

/// Creates an isolated test database for a single test
pub async fn create_isolated_test_database() -> Result<TestDatabase, Box<dyn std::error::Error + Send + Sync>> {
    TestDatabase::new().await
}

/// Helper macro for running database tests in their own container
///
/// Tests need Docker, so they are ignored by default; run them with
/// `cargo test -- --ignored`.
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$db:ident| $body:block) => {
        #[tokio::test]
        #[ignore = "requires docker"]
        async fn $name() {
            let $db = $crate::database::create_isolated_test_database()
                .await
                .expect("Failed to create test database");
            $body
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_connection_url() {
        let config = TestDatabaseConfig::default();
        let url = config.connection_url();

        assert!(url.starts_with("postgres://"));
        assert!(url.contains(POSTGRES_USER));
        assert!(url.ends_with(POSTGRES_DB));
    }

    #[test]
    fn test_clear_data_covers_every_table() {
        let schema = include_str!("../../../migrations/20260101_000001_billing_ledger.sql");
        let created = schema.matches("CREATE TABLE ").count();
        assert_eq!(created, LEDGER_TABLES.len());
        for table in LEDGER_TABLES {
            assert!(
                schema.contains(&format!("CREATE TABLE {} (", table)),
                "{} is not in the migration",
                table
            );
        }
    }
}
