use metaschema_types::ModuleId;
use serde::{Deserialize, Serialize};

use crate::validate::{ValidationErrors, check_identifier, check_name};

/// A deployable unit that owns entities under a private table namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    /// When set, every entity table of the module resolves to `{prefix}_{table}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_prefix: Option<String>,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModule {
    pub name: String,
    #[serde(default)]
    pub table_prefix: Option<String>,
}

impl NewModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            table_prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_module(&self.name, self.table_prefix.as_deref())
    }
}

impl Module {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_module(&self.name, self.table_prefix.as_deref())
    }

    /// The prefix including its trailing separator (e.g., `fin_`).
    pub fn prefix_with_separator(&self) -> Option<String> {
        self.table_prefix.as_ref().map(|p| format!("{p}_"))
    }
}

fn validate_module(name: &str, prefix: Option<&str>) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_name(&mut errors, "name", name);
    if let Some(prefix) = prefix {
        check_identifier(&mut errors, "table_prefix", prefix);
        if prefix.ends_with('_') {
            errors.push("table_prefix", "must not end with '_' (the separator is added)");
        }
    }
    errors.into_result()
}
