//! Error types for the PostgreSQL storage backend.

use grantstore_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is "undefined table" (42P01).
pub fn is_undefined_table(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNDEFINED_TABLE)
}

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Schema creation error.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Pool error.
    #[error("Pool error: {message}")]
    Pool { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new pool error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => map_sqlx_error(e),
            PostgresError::Schema(e) => StorageError::internal(format!("Schema error: {e}")),
            PostgresError::Config { message } => StorageError::configuration(message),
            PostgresError::Pool { message } => {
                StorageError::connection_error(format!("Pool error: {message}"))
            }
        }
    }
}

/// Maps a raw sqlx error into the storage taxonomy.
///
/// Duplicate keys are detected before this is reached (the insert statement
/// reports them through `rows_affected`); a unique violation here still maps
/// to a transaction error so the caller can retry.
pub fn map_sqlx_error(err: SqlxError) -> StorageError {
    match err {
        SqlxError::PoolTimedOut => StorageError::connection_error("Pool acquire timed out"),
        SqlxError::PoolClosed => StorageError::connection_error("Pool is closed"),
        SqlxError::Io(e) => StorageError::connection_error(e.to_string()),
        SqlxError::Tls(e) => StorageError::connection_error(e.to_string()),
        SqlxError::Configuration(e) => StorageError::configuration(e.to_string()),
        SqlxError::Database(ref db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
            StorageError::transaction_error(format!("Unique violation: {db}"))
        }
        SqlxError::Decode(e) | SqlxError::ColumnDecode { source: e, .. } => {
            StorageError::invalid_document(e.to_string())
        }
        other => StorageError::internal(other.to_string()),
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
