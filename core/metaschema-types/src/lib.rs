//! Identifier types for metaschema.
//!
//! Every metadata record (modules, entity and field definitions, lookups,
//! cascading rules, ledger records) and every organizational unit used for
//! data scoping is addressed by a UUID v7 newtype defined here. The types are
//! deliberately distinct so a `TenantId` can never be passed where a
//! `CompanyId` is expected.

mod ids;

pub use ids::{
    BranchId, CompanyId, DepartmentId, EntityDefId, FieldGroupId, FieldId, LookupId, MigrationId,
    ModuleId, RuleId, TenantId,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when handling identifiers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
