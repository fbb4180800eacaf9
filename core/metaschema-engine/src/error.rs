//! Error types for the engine.
//!
//! Validation and scope failures carry field-level detail for the caller.
//! Migration failures, schema conflicts and raw database errors are logged
//! with a correlation id; callers only see the id.

use metaschema_model::ValidationErrors;
use metaschema_store::StoreError;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::scope::DenialReason;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed metadata.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Concurrent edit or migration collision; retry the whole operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The physical schema cannot accommodate the requested change.
    #[error("schema conflict on {table}.{column} (correlation id {correlation_id})")]
    SchemaConflict {
        table: String,
        column: String,
        existing: String,
        requested: String,
        correlation_id: Uuid,
    },

    /// DDL failed mid-migration; the transaction was rolled back.
    #[error("migration failed at step {step} ({op}) (correlation id {correlation_id})")]
    Migration {
        step: usize,
        op: String,
        correlation_id: Uuid,
    },

    /// The cascading rule would close a cycle.
    #[error("cascading rule {parent} -> {child} would create a cycle")]
    CyclicRule { parent: String, child: String },

    /// The caller has no standing at the entity's scope level.
    #[error("access denied: {0}")]
    Denied(DenialReason),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Unexpected storage failure; details are in the log.
    #[error("internal error (correlation id {correlation_id})")]
    Internal { correlation_id: Uuid },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors::single(field, message))
    }

    /// Logs `detail` and returns an opaque internal error.
    pub(crate) fn internal(detail: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        error!(%correlation_id, "{detail}");
        Self::Internal { correlation_id }
    }

    /// Correlation id for operator follow-up, when the error carries one.
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            Self::SchemaConflict { correlation_id, .. }
            | Self::Migration { correlation_id, .. }
            | Self::Internal { correlation_id } => Some(*correlation_id),
            _ => None,
        }
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(errors) => format!("invalid definition: {errors}"),
            Self::Conflict(_) => "the record was changed by someone else; reload and retry".into(),
            Self::SchemaConflict { correlation_id, .. }
            | Self::Migration { correlation_id, .. }
            | Self::Internal { correlation_id } => {
                format!("the schema change could not be applied (reference {correlation_id})")
            }
            Self::CyclicRule { .. } => "this rule would make lookups depend on themselves".into(),
            Self::Denied(reason) => format!("access denied: {reason}"),
            Self::NotFound { kind, .. } => format!("{kind} not found"),
            Self::Config(message) => format!("configuration error: {message}"),
        }
    }
}

impl From<ValidationErrors> for EngineError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(errors) => Self::Validation(errors),
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::VersionConflict {
                kind,
                id,
                expected,
                actual,
            } => Self::Conflict(format!(
                "{kind} {id} is at version {actual}, expected {expected}"
            )),
            other => Self::internal(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::from(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_are_opaque() {
        let err = EngineError::from(StoreError::InvalidData("secret table detail".into()));
        assert!(matches!(err, EngineError::Internal { .. }));
        assert!(!err.to_string().contains("secret"));
        assert!(!err.user_message().contains("secret"));
        assert!(err.correlation_id().is_some());
    }

    #[test]
    fn version_conflicts_map_to_conflict() {
        let err = EngineError::from(StoreError::VersionConflict {
            kind: "entity",
            id: "e1".into(),
            expected: 1,
            actual: 2,
        });
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
