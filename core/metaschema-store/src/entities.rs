//! Entity definition records.
//!
//! Every write to an entity, its fields or its groups bumps the entity's
//! `version`; callers pass the version they read and get
//! [`StoreError::VersionConflict`] when someone else wrote in between.

use metaschema_model::{EntityDefinition, EntityStatus, NewEntity};
use metaschema_types::{EntityDefId, ModuleId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{parse_column, parse_optional_column, version_column};
use crate::error::{StoreError, StoreResult};

const COLUMNS: &str = "id, tenant_id, module_id, name, table_name, schema_name, status, \
                       data_scope, version, created_at, updated_at, deleted_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<EntityDefinition> {
    Ok(EntityDefinition {
        id: parse_column(row, 0)?,
        tenant_id: parse_optional_column(row, 1)?,
        module_id: parse_optional_column(row, 2)?,
        name: row.get(3)?,
        table_name: row.get(4)?,
        schema_name: row.get(5)?,
        status: parse_column(row, 6)?,
        data_scope: parse_column(row, 7)?,
        version: version_column(row, 8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        deleted_at: row.get(11)?,
    })
}

pub fn insert_entity(conn: &Connection, new: &NewEntity, now: i64) -> StoreResult<EntityDefinition> {
    new.validate()?;
    let entity = EntityDefinition {
        id: EntityDefId::new(),
        tenant_id: new.tenant_id,
        module_id: new.module_id,
        name: new.name.clone(),
        table_name: new.table_name.clone(),
        schema_name: new.schema_or_default().to_string(),
        status: EntityStatus::Draft,
        data_scope: new.data_scope,
        version: 1,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    conn.execute(
        &format!(
            "INSERT INTO meta_entities ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)"
        ),
        params![
            entity.id.to_string(),
            entity.tenant_id.map(|t| t.to_string()),
            entity.module_id.map(|m| m.to_string()),
            entity.name,
            entity.table_name,
            entity.schema_name,
            entity.status.as_str(),
            entity.data_scope.as_str(),
            entity.version as i64,
            entity.created_at,
            entity.updated_at,
        ],
    )?;
    debug!(entity_id = %entity.id, name = %entity.name, "entity created");
    Ok(entity)
}

/// Loads an entity, including soft-deleted ones.
pub fn get_entity(conn: &Connection, id: EntityDefId) -> StoreResult<Option<EntityDefinition>> {
    let entity = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM meta_entities WHERE id = ?1"),
            [id.to_string()],
            from_row,
        )
        .optional()?;
    Ok(entity)
}

/// Loads a live (not deleted) entity.
pub fn require_entity(conn: &Connection, id: EntityDefId) -> StoreResult<EntityDefinition> {
    match get_entity(conn, id)? {
        Some(entity) if !entity.is_deleted() => Ok(entity),
        _ => Err(StoreError::not_found("entity", id)),
    }
}

pub fn list_entities(conn: &Connection, include_deleted: bool) -> StoreResult<Vec<EntityDefinition>> {
    let filter = if include_deleted { "" } else { "WHERE deleted_at IS NULL" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM meta_entities {filter} ORDER BY created_at, id"
    ))?;
    let entities = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

pub fn list_module_entities(conn: &Connection, module_id: ModuleId) -> StoreResult<Vec<EntityDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM meta_entities
         WHERE module_id = ?1 AND deleted_at IS NULL ORDER BY created_at, id"
    ))?;
    let entities = stmt
        .query_map([module_id.to_string()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

/// Fails with a version conflict (or not found) when `changed == 0`.
fn check_changed(
    conn: &Connection,
    id: EntityDefId,
    changed: usize,
    expected_version: u64,
) -> StoreResult<()> {
    if changed > 0 {
        return Ok(());
    }
    let current = require_entity(conn, id)?;
    Err(StoreError::VersionConflict {
        kind: "entity",
        id: id.to_string(),
        expected: expected_version,
        actual: current.version,
    })
}

/// Full replace of the declarative attributes; status is kept.
pub fn update_entity(
    conn: &Connection,
    id: EntityDefId,
    update: &NewEntity,
    expected_version: u64,
    now: i64,
) -> StoreResult<EntityDefinition> {
    update.validate()?;
    let changed = conn.execute(
        "UPDATE meta_entities SET tenant_id = ?1, module_id = ?2, name = ?3, table_name = ?4,
             schema_name = ?5, data_scope = ?6, version = version + 1, updated_at = ?7
         WHERE id = ?8 AND version = ?9 AND deleted_at IS NULL",
        params![
            update.tenant_id.map(|t| t.to_string()),
            update.module_id.map(|m| m.to_string()),
            update.name,
            update.table_name,
            update.schema_or_default(),
            update.data_scope.as_str(),
            now,
            id.to_string(),
            expected_version as i64,
        ],
    )?;
    check_changed(conn, id, changed, expected_version)?;
    require_entity(conn, id)
}

pub fn set_status(
    conn: &Connection,
    id: EntityDefId,
    status: EntityStatus,
    expected_version: u64,
    now: i64,
) -> StoreResult<EntityDefinition> {
    let changed = conn.execute(
        "UPDATE meta_entities SET status = ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND version = ?4 AND deleted_at IS NULL",
        params![status.as_str(), now, id.to_string(), expected_version as i64],
    )?;
    check_changed(conn, id, changed, expected_version)?;
    debug!(entity_id = %id, status = %status, "entity status changed");
    require_entity(conn, id)
}

/// Persists a corrected table name (used by prefix repair).
pub fn set_table_name(
    conn: &Connection,
    id: EntityDefId,
    table_name: &str,
    expected_version: u64,
    now: i64,
) -> StoreResult<EntityDefinition> {
    let changed = conn.execute(
        "UPDATE meta_entities SET table_name = ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND version = ?4 AND deleted_at IS NULL",
        params![table_name, now, id.to_string(), expected_version as i64],
    )?;
    check_changed(conn, id, changed, expected_version)?;
    require_entity(conn, id)
}

/// Bumps the version for a child (field or group) write. Returns the new version.
pub fn touch_entity(
    conn: &Connection,
    id: EntityDefId,
    expected_version: u64,
    now: i64,
) -> StoreResult<u64> {
    let changed = conn.execute(
        "UPDATE meta_entities SET version = version + 1, updated_at = ?1
         WHERE id = ?2 AND version = ?3 AND deleted_at IS NULL",
        params![now, id.to_string(), expected_version as i64],
    )?;
    check_changed(conn, id, changed, expected_version)?;
    Ok(expected_version + 1)
}

/// Soft delete; the physical table is left in place.
pub fn soft_delete_entity(
    conn: &Connection,
    id: EntityDefId,
    expected_version: u64,
    now: i64,
) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE meta_entities SET deleted_at = ?1, version = version + 1, updated_at = ?1
         WHERE id = ?2 AND version = ?3 AND deleted_at IS NULL",
        params![now, id.to_string(), expected_version as i64],
    )?;
    check_changed(conn, id, changed, expected_version)?;
    debug!(entity_id = %id, "entity soft-deleted");
    Ok(())
}
