//! Database error types
//!
//! Errors raised while talking to PostgreSQL, and their translation into
//! the `PortError` vocabulary the domain layer understands.

use core_kernel::PortError;
use thiserror::Error;

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// No connection could be opened or borrowed from the pool
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// A unique index rejected the row (payment reference, open leak, day)
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A row points at a visit or line item that does not exist
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A CHECK constraint or one of the ledger guard triggers refused the write
    #[error("Ledger guard rejected write: {0}")]
    GuardRejected(String),

    /// Serialization failure or deadlock; the whole unit may be retried
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped onto a domain type
    #[error("Cannot decode stored value: {0}")]
    Decode(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl DatabaseError {
    pub fn decode(message: impl Into<String>) -> Self {
        DatabaseError::Decode(message.into())
    }

    /// True when the same unit of work may succeed if run again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed(_) | DatabaseError::TransactionAborted(_)
        )
    }
}

/// Classifies SQLx errors by PostgreSQL error code
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>.
impl From<&sqlx::Error> for DatabaseError {
    fn from(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => DatabaseError::ConnectionFailed("connection pool exhausted".to_string()),
            sqlx::Error::PoolClosed => DatabaseError::ConnectionFailed("connection pool closed".to_string()),
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry(message),
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    // The guard triggers raise check_violation too
                    Some("23514") | Some("23502") => DatabaseError::GuardRejected(message),
                    Some("40001") | Some("40P01") => DatabaseError::TransactionAborted(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => DatabaseError::Decode(error.to_string()),
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}

/// Translates a database error into the port vocabulary
///
/// Guard rejections become `Validation` so a write that slipped past the
/// domain checks surfaces as an invariant failure, never as a 5xx retry.
impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::DuplicateEntry(message) => PortError::conflict(message),
            DatabaseError::ForeignKeyViolation(message) | DatabaseError::GuardRejected(message) => {
                PortError::validation(message)
            }
            DatabaseError::ConnectionFailed(message) | DatabaseError::TransactionAborted(message) => {
                PortError::connection(message)
            }
            DatabaseError::Decode(message) => PortError::transformation(message),
            other => PortError::internal(other.to_string()),
        }
    }
}

/// Shorthand used by the adapters: sqlx error -> specific variant -> port error
pub(crate) fn port_error(error: sqlx::Error) -> PortError {
    PortError::from(DatabaseError::from(&error))
}
