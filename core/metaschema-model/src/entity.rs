use metaschema_types::{EntityDefId, ModuleId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::scope::DataScope;
use crate::validate::{
    MAX_IDENTIFIER_LEN, RESERVED_TABLE_PREFIXES, ValidationErrors, check_identifier, check_name,
};

/// Schema used when an entity does not name one.
pub const DEFAULT_SCHEMA: &str = "main";

/// Publication status of an entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Draft,
    Published,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            _ => Err(format!("unknown entity status '{s}'")),
        }
    }
}

/// A declared data type materialized as a relational table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub id: EntityDefId,
    /// `None` marks a platform-level (shared) definition.
    pub tenant_id: Option<TenantId>,
    pub module_id: Option<ModuleId>,
    pub name: String,
    /// Stored table name. May lag behind the module prefix; see the table resolver.
    pub table_name: String,
    pub schema_name: String,
    pub status: EntityStatus,
    pub data_scope: DataScope,
    /// Optimistic concurrency counter, bumped by every entity, field or group write.
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl EntityDefinition {
    pub fn is_published(&self) -> bool {
        self.status == EntityStatus::Published
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_entity(
            &self.name,
            &self.table_name,
            &self.schema_name,
            self.tenant_id,
            self.data_scope,
        )
    }
}

/// Input for creating an entity definition. New entities start as drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub module_id: Option<ModuleId>,
    pub name: String,
    pub table_name: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    pub data_scope: DataScope,
}

impl NewEntity {
    pub fn new(name: &str, table_name: &str, data_scope: DataScope) -> Self {
        Self {
            tenant_id: None,
            module_id: None,
            name: name.into(),
            table_name: table_name.into(),
            schema_name: None,
            data_scope,
        }
    }

    pub fn in_module(mut self, module_id: ModuleId) -> Self {
        self.module_id = Some(module_id);
        self
    }

    pub fn owned_by(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn in_schema(mut self, schema: &str) -> Self {
        self.schema_name = Some(schema.into());
        self
    }

    pub fn schema_or_default(&self) -> &str {
        self.schema_name.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_entity(
            &self.name,
            &self.table_name,
            self.schema_or_default(),
            self.tenant_id,
            self.data_scope,
        )
    }
}

fn validate_entity(
    name: &str,
    table_name: &str,
    schema_name: &str,
    tenant_id: Option<TenantId>,
    data_scope: DataScope,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_name(&mut errors, "name", name);
    check_identifier(&mut errors, "table_name", table_name);
    if RESERVED_TABLE_PREFIXES.iter().any(|p| table_name.starts_with(p)) {
        errors.push("table_name", "uses a reserved prefix");
    }
    check_identifier(&mut errors, "schema_name", schema_name);
    if data_scope == DataScope::Platform && tenant_id.is_some() {
        errors.push(
            "tenant_id",
            "platform-scoped entities are shared and must not belong to a tenant",
        );
    }
    errors.into_result()
}

/// Checks the length of a table name after prefix resolution.
pub fn check_resolved_table_len(resolved: &str) -> Result<(), ValidationErrors> {
    if resolved.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationErrors::single(
            "table_name",
            format!("resolved table name '{resolved}' exceeds {MAX_IDENTIFIER_LEN} characters"),
        ));
    }
    Ok(())
}
