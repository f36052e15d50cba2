//! Error types for the persistence layer
//!
//! This module defines all error types that can occur while mapping records,
//! building statements and talking to the database.

use super::value::DatabaseValue;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// A record could not be reflected into columns and values, or lacks a
    /// capability the operation needs
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A single-row fetch matched zero rows
    #[error("Record not found in {table}")]
    NotFound { table: String },

    /// The store rejected or failed to execute a statement
    #[error("Query failed: {message} (query: {sql})")]
    Query {
        message: String,
        sql: String,
        args: Vec<DatabaseValue>,
    },

    /// The caller cancelled the operation while the statement was in flight
    #[error("Query canceled (query: {sql})")]
    Canceled {
        sql: String,
        args: Vec<DatabaseValue>,
    },

    /// The execution handle does not provide a capability the operation needs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Begin, commit or rollback failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Connection error (generic)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a mapping error
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Mapping(msg.into())
    }

    /// Create a not-found error for the given table
    pub fn not_found<S: Into<String>>(table: S) -> Self {
        DatabaseError::NotFound {
            table: table.into(),
        }
    }

    /// Create a query error carrying the failing statement and its arguments
    pub fn query<M: Into<String>, S: Into<String>>(
        message: M,
        sql: S,
        args: &[DatabaseValue],
    ) -> Self {
        DatabaseError::Query {
            message: message.into(),
            sql: sql.into(),
            args: args.to_vec(),
        }
    }

    /// Create a canceled error for the given statement
    pub fn canceled<S: Into<String>>(sql: S, args: &[DatabaseValue]) -> Self {
        DatabaseError::Canceled {
            sql: sql.into(),
            args: args.to_vec(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Configuration(msg.into())
    }

    /// Create a transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Transaction(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Connection(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// True when a single-row fetch found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    /// True when the caller gave up rather than the statement failing
    pub fn is_canceled(&self) -> bool {
        matches!(self, DatabaseError::Canceled { .. })
    }
}
