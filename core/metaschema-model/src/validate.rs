//! Field-level validation results shared by every metadata record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier accepted for tables, schemas, fields and prefixes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Longest human-readable name accepted for entities, modules and lookups.
pub const MAX_NAME_LEN: usize = 128;

/// Table name prefixes reserved for the metadata store and the database itself.
pub const RESERVED_TABLE_PREFIXES: &[&str] = &["meta_", "sqlite_"];

/// One rejected attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Attribute path (e.g., `table_name`, `fields.due_date.precision`).
    pub field: String,
    pub message: String,
}

/// Collection of violations; empty means the record is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldViolation>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection holding a single violation.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Appends every violation of `other`, prefixing attribute paths.
    pub fn extend_prefixed(&mut self, prefix: &str, other: ValidationErrors) {
        for v in other.0 {
            self.push(format!("{prefix}.{}", v.field), v.message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.0
    }

    /// Returns `Ok(())` when no violation was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Checks a SQL identifier: `^[a-z][a-z0-9_]*$`, at most 63 bytes.
pub fn check_identifier(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(field, "must not be empty");
        return;
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        errors.push(
            field,
            format!("must be at most {MAX_IDENTIFIER_LEN} characters"),
        );
    }
    if !is_identifier(value) {
        errors.push(
            field,
            "must start with a lowercase letter and contain only lowercase letters, digits and '_'",
        );
    }
}

/// Checks a display name: not blank, at most 128 characters.
pub fn check_name(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(field, "must not be blank");
    } else if value.chars().count() > MAX_NAME_LEN {
        errors.push(field, format!("must be at most {MAX_NAME_LEN} characters"));
    }
}

/// Returns true if `value` matches `^[a-z][a-z0-9_]*$`.
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
