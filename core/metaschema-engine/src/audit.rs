//! Consistency auditing.
//!
//! Compares every entity definition with what the database actually holds:
//! stored versus resolved table names, whether the table exists, whether it
//! still matches the ledger head, whether the declared fields have been
//! migrated, and whether its primary key is the one the fields declare. Dry runs only report. Apply mode repairs prefix drift by
//! persisting the resolved name; nothing else is changed automatically.

use metaschema_model::{EntityDefinition, EntityStatus, FieldDefinition, ShapeDifference};
use metaschema_store::{entities, fields, ledger, modules, now_ms};
use metaschema_types::EntityDefId;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::compile::{SYSTEM_KEY, compile_shape};
use crate::dialect::Dialect;
use crate::diff::diff;
use crate::error::EngineResult;
use crate::ledger::LedgerGraph;
use crate::resolver::{ResolvedTable, resolve_entity_table, resolve_table_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// The stored name lacks the module prefix.
    PrefixDrift { stored: String, resolved: String },
    /// The resolved table name is not usable.
    InvalidTableName { message: String },
    MissingTable { table: String },
    /// The table exists only under the stored, unprefixed name.
    LegacyTable { table: String },
    /// The live table differs from the shape recorded by the ledger head.
    ShapeDrift { differences: Vec<ShapeDifference> },
    /// The declared fields differ from the ledger head; these ops are unapplied.
    PendingMigration { ops: Vec<String> },
    /// The declared fields no longer compile to a table.
    InvalidDeclaration { message: String },
    MissingPrimaryKey,
    PrimaryKeyMismatch { declared: String, actual: String },
    EmptyLedger,
    DivergentLedger { heads: usize },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrefixDrift { stored, resolved } => {
                write!(f, "stored table name '{stored}' resolves to '{resolved}'")
            }
            Self::InvalidTableName { message } => write!(f, "invalid table name: {message}"),
            Self::MissingTable { table } => write!(f, "table '{table}' does not exist"),
            Self::LegacyTable { table } => {
                write!(f, "table exists only under its unprefixed name '{table}'")
            }
            Self::ShapeDrift { differences } => {
                let parts: Vec<String> = differences.iter().map(ToString::to_string).collect();
                write!(f, "table differs from the ledger: {}", parts.join("; "))
            }
            Self::PendingMigration { ops } => {
                write!(f, "declared fields are not migrated: {}", ops.join("; "))
            }
            Self::InvalidDeclaration { message } => write!(f, "fields do not compile: {message}"),
            Self::MissingPrimaryKey => f.write_str("table has no primary key"),
            Self::PrimaryKeyMismatch { declared, actual } => {
                write!(f, "primary key is '{actual}', fields declare '{declared}'")
            }
            Self::EmptyLedger => f.write_str("published entity has no migration history"),
            Self::DivergentLedger { heads } => write!(f, "migration ledger has {heads} heads"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_id: EntityDefId,
    pub entity_name: String,
    pub status: EntityStatus,
    pub stored_table: String,
    pub resolved_table: Option<ResolvedTable>,
    pub declared_primary_key: String,
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub repaired: bool,
}

impl AuditEntry {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn has_prefix_drift(&self) -> bool {
        self.problems
            .iter()
            .any(|p| matches!(p, Problem::PrefixDrift { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub mode: AuditMode,
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn problem_count(&self) -> usize {
        self.entries.iter().map(|e| e.problems.len()).sum()
    }

    pub fn repaired_count(&self) -> usize {
        self.entries.iter().filter(|e| e.repaired).count()
    }

    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(AuditEntry::is_clean)
    }
}

fn declared_primary_key(fields: &[FieldDefinition]) -> String {
    fields
        .iter()
        .find(|f| f.spec.maps_to_primary_key())
        .map(|f| f.name().to_string())
        .unwrap_or_else(|| SYSTEM_KEY.to_string())
}

/// Read-only inspection of one entity.
pub fn inspect(
    conn: &Connection,
    dialect: &dyn Dialect,
    entity: &EntityDefinition,
) -> EngineResult<AuditEntry> {
    let module = entity
        .module_id
        .map(|id| modules::require_module(conn, id))
        .transpose()?;
    let live_fields = fields::list_fields(conn, entity.id)?;
    let mut entry = AuditEntry {
        entity_id: entity.id,
        entity_name: entity.name.clone(),
        status: entity.status,
        stored_table: entity.table_name.clone(),
        resolved_table: None,
        declared_primary_key: declared_primary_key(&live_fields),
        problems: Vec::new(),
        repaired: false,
    };

    let resolved = match resolve_entity_table(entity, module.as_ref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            entry.problems.push(Problem::InvalidTableName {
                message: e.to_string(),
            });
            return Ok(entry);
        }
    };
    if resolved.table != entity.table_name {
        entry.problems.push(Problem::PrefixDrift {
            stored: entity.table_name.clone(),
            resolved: resolved.table.clone(),
        });
    }
    entry.resolved_table = Some(resolved.clone());
    if !entity.is_published() {
        return Ok(entry);
    }

    let graph = LedgerGraph::new(ledger::records_for(conn, entity.id)?);
    let heads = graph.heads();
    match heads.len() {
        0 => entry.problems.push(Problem::EmptyLedger),
        1 => {}
        n => entry.problems.push(Problem::DivergentLedger { heads: n }),
    }
    if let [head] = heads.as_slice() {
        if let Some(recorded) = &head.shape {
            match compile_shape(entity, &resolved, &live_fields) {
                Ok(declared) => {
                    let ops: Vec<String> = diff(Some(recorded), &declared)
                        .iter()
                        .map(|step| step.op.to_string())
                        .collect();
                    if !ops.is_empty() {
                        entry.problems.push(Problem::PendingMigration { ops });
                    }
                }
                Err(e) => entry.problems.push(Problem::InvalidDeclaration {
                    message: e.to_string(),
                }),
            }
        }
    }

    let Some(live) = dialect.introspect(conn, &resolved.schema, &resolved.table)? else {
        let legacy = resolved.table != entity.table_name
            && dialect
                .introspect(conn, &resolved.schema, &entity.table_name)?
                .is_some();
        entry.problems.push(if legacy {
            Problem::LegacyTable {
                table: entity.table_name.clone(),
            }
        } else {
            Problem::MissingTable {
                table: resolved.table.clone(),
            }
        });
        return Ok(entry);
    };

    if let [head] = heads.as_slice() {
        if let Some(recorded) = &head.shape {
            let differences = recorded.differences(&live);
            if !differences.is_empty() {
                entry.problems.push(Problem::ShapeDrift { differences });
            }
        }
    }
    match live.primary_key() {
        None => entry.problems.push(Problem::MissingPrimaryKey),
        Some(pk) if pk.name != entry.declared_primary_key => {
            entry.problems.push(Problem::PrimaryKeyMismatch {
                declared: entry.declared_primary_key.clone(),
                actual: pk.name.clone(),
            })
        }
        Some(_) => {}
    }
    Ok(entry)
}

/// Persists the resolved table name so stored and resolved names agree.
/// Returns the updated entity, or `None` when there was nothing to fix.
pub fn repair_prefix(conn: &Connection, entity_id: EntityDefId) -> EngineResult<Option<EntityDefinition>> {
    let entity = entities::require_entity(conn, entity_id)?;
    let module = entity
        .module_id
        .map(|id| modules::require_module(conn, id))
        .transpose()?;
    let resolved = resolve_table_name(&entity.table_name, module.as_ref());
    if resolved == entity.table_name {
        return Ok(None);
    }
    let updated = entities::set_table_name(conn, entity_id, &resolved, entity.version, now_ms())?;
    info!(entity_id = %entity_id, from = %entity.table_name, to = %resolved, "table name repaired");
    Ok(Some(updated))
}
