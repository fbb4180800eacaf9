//! Error types for the metadata store.

use metaschema_model::ValidationErrors;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization of a JSON column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found (or soft-deleted).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Optimistic concurrency check failed.
    #[error("{kind} {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        kind: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// The record violates a uniqueness or validation rule.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// `PRAGMA foreign_key_check` found orphaned rows after DDL.
    #[error("foreign key violation in table {table}")]
    ForeignKeyViolation { table: String },

    /// A stored value could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for SQLite UNIQUE / CHECK / NOT NULL failures.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
