//! Physical table name resolution.
//!
//! An entity's table is `{prefix}_{table_name}` when its module declares a
//! prefix and the stored name does not already carry it. Resolution never
//! writes the prefixed name back; the prefix repair in the auditor is the
//! only place that persists it.

use metaschema_model::{EntityDefinition, Module, check_resolved_table_len};
use metaschema_store::{entities, modules};
use metaschema_types::{EntityDefId, ModuleId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::trace;

use crate::cache::{CacheStats, TtlCache};
use crate::error::EngineResult;

/// A schema-qualified physical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTable {
    pub schema: String,
    pub table: String,
}

impl ResolvedTable {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted `"schema"."table"` for use in SQL.
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }
}

impl fmt::Display for ResolvedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Applies the module prefix rule to a stored table name.
pub fn resolve_table_name(table_name: &str, module: Option<&Module>) -> String {
    match module.and_then(Module::prefix_with_separator) {
        Some(prefix) if !table_name.starts_with(&prefix) => format!("{prefix}{table_name}"),
        _ => table_name.to_string(),
    }
}

/// Resolves an entity's table, checking the result is still a legal identifier.
pub fn resolve_entity_table(
    entity: &EntityDefinition,
    module: Option<&Module>,
) -> EngineResult<ResolvedTable> {
    let table = resolve_table_name(&entity.table_name, module);
    check_resolved_table_len(&table)?;
    Ok(ResolvedTable::new(&entity.schema_name, &table))
}

struct CachedTable {
    resolved: ResolvedTable,
    module_id: Option<ModuleId>,
}

/// Caching resolver keyed by entity id.
pub struct TableResolver {
    cache: TtlCache<EntityDefId, CachedTable>,
}

impl TableResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    /// Resolves a live entity's table. Deleted entities are not found.
    pub fn resolve(&self, conn: &Connection, entity_id: EntityDefId) -> EngineResult<ResolvedTable> {
        if let Some(hit) = self.cache.get(&entity_id) {
            return Ok(hit.resolved.clone());
        }
        let entity = entities::require_entity(conn, entity_id)?;
        let module = entity
            .module_id
            .map(|id| modules::require_module(conn, id))
            .transpose()?;
        let resolved = resolve_entity_table(&entity, module.as_ref())?;
        trace!(entity_id = %entity_id, table = %resolved, "resolved table");
        self.cache.insert(
            entity_id,
            CachedTable {
                resolved: resolved.clone(),
                module_id: entity.module_id,
            },
        );
        Ok(resolved)
    }

    pub fn invalidate_entity(&self, entity_id: EntityDefId) {
        self.cache.invalidate(&entity_id);
    }

    pub fn invalidate_module(&self, module_id: ModuleId) {
        self.cache
            .invalidate_where(|cached| cached.module_id == Some(module_id));
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
