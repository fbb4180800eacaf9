//! Field definition and field group records.
//!
//! The declarative part of a field is stored as JSON; `name`, `data_type`
//! and `display_order` are duplicated into columns for indexing and ordering.

use metaschema_model::{FieldDefinition, FieldGroup, FieldSpec, NewFieldGroup, ValidationErrors};
use metaschema_types::{EntityDefId, FieldGroupId, FieldId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{json_column, parse_column};
use crate::error::{StoreError, StoreResult};

const FIELD_COLUMNS: &str = "id, entity_id, definition, created_at, updated_at, deleted_at";

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<FieldDefinition> {
    Ok(FieldDefinition {
        id: parse_column(row, 0)?,
        entity_id: parse_column(row, 1)?,
        spec: json_column(row, 2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn duplicate_name(err: StoreError, name: &str) -> StoreError {
    if err.is_constraint_violation() {
        return ValidationErrors::single("name", format!("field '{name}' already exists")).into();
    }
    err
}

pub fn insert_field(
    conn: &Connection,
    entity_id: EntityDefId,
    spec: &FieldSpec,
    now: i64,
) -> StoreResult<FieldDefinition> {
    spec.validate()?;
    let field = FieldDefinition {
        id: FieldId::new(),
        entity_id,
        spec: spec.clone(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    conn.execute(
        "INSERT INTO meta_fields
             (id, entity_id, name, data_type, definition, display_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            field.id.to_string(),
            entity_id.to_string(),
            spec.name,
            spec.data_type.as_str(),
            serde_json::to_string(spec)?,
            spec.display_order,
            now,
            now,
        ],
    )
    .map_err(|e| duplicate_name(e.into(), &spec.name))?;
    debug!(entity_id = %entity_id, field = %spec.name, "field created");
    Ok(field)
}

pub fn get_field(conn: &Connection, id: FieldId) -> StoreResult<Option<FieldDefinition>> {
    let field = conn
        .query_row(
            &format!("SELECT {FIELD_COLUMNS} FROM meta_fields WHERE id = ?1"),
            [id.to_string()],
            field_from_row,
        )
        .optional()?;
    Ok(field)
}

pub fn require_field(conn: &Connection, id: FieldId) -> StoreResult<FieldDefinition> {
    match get_field(conn, id)? {
        Some(field) if !field.is_deleted() => Ok(field),
        _ => Err(StoreError::not_found("field", id)),
    }
}

/// Live fields of an entity by display order, then creation order.
pub fn list_fields(conn: &Connection, entity_id: EntityDefId) -> StoreResult<Vec<FieldDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FIELD_COLUMNS} FROM meta_fields
         WHERE entity_id = ?1 AND deleted_at IS NULL
         ORDER BY display_order, created_at, id"
    ))?;
    let fields = stmt
        .query_map([entity_id.to_string()], field_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fields)
}

/// Live reference fields of any entity that point at `table`.
pub fn list_referencing_fields(conn: &Connection, table: &str) -> StoreResult<Vec<FieldDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FIELD_COLUMNS} FROM meta_fields
         WHERE deleted_at IS NULL AND data_type = 'reference'
           AND json_extract(definition, '$.reference_table_name') = ?1
         ORDER BY created_at, id"
    ))?;
    let fields = stmt
        .query_map([table], field_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fields)
}

/// Full replace of a field's declarative attributes.
pub fn update_field(
    conn: &Connection,
    id: FieldId,
    spec: &FieldSpec,
    now: i64,
) -> StoreResult<FieldDefinition> {
    spec.validate()?;
    let changed = conn
        .execute(
            "UPDATE meta_fields SET name = ?1, data_type = ?2, definition = ?3,
                 display_order = ?4, updated_at = ?5
             WHERE id = ?6 AND deleted_at IS NULL",
            params![
                spec.name,
                spec.data_type.as_str(),
                serde_json::to_string(spec)?,
                spec.display_order,
                now,
                id.to_string(),
            ],
        )
        .map_err(|e| duplicate_name(e.into(), &spec.name))?;
    if changed == 0 {
        return Err(StoreError::not_found("field", id));
    }
    require_field(conn, id)
}

pub fn soft_delete_field(conn: &Connection, id: FieldId, now: i64) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE meta_fields SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now, id.to_string()],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("field", id));
    }
    Ok(())
}

// ── Field groups ─────────────────────────────────────────────────

const GROUP_COLUMNS: &str = "id, entity_id, name, label_i18n, display_order, collapsible, \
                             collapsed_by_default, created_at, updated_at";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<FieldGroup> {
    Ok(FieldGroup {
        id: parse_column(row, 0)?,
        entity_id: parse_column(row, 1)?,
        name: row.get(2)?,
        label_i18n: json_column(row, 3)?,
        display_order: row.get(4)?,
        collapsible: row.get(5)?,
        collapsed_by_default: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn insert_group(
    conn: &Connection,
    entity_id: EntityDefId,
    new: &NewFieldGroup,
    now: i64,
) -> StoreResult<FieldGroup> {
    new.validate()?;
    let group = FieldGroup {
        id: FieldGroupId::new(),
        entity_id,
        name: new.name.clone(),
        label_i18n: new.label_i18n.clone(),
        display_order: new.display_order,
        collapsible: new.collapsible,
        collapsed_by_default: new.collapsed_by_default,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!(
            "INSERT INTO meta_field_groups ({GROUP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            group.id.to_string(),
            entity_id.to_string(),
            group.name,
            serde_json::to_string(&group.label_i18n)?,
            group.display_order,
            group.collapsible,
            group.collapsed_by_default,
            now,
            now,
        ],
    )?;
    Ok(group)
}

pub fn get_group(conn: &Connection, id: FieldGroupId) -> StoreResult<Option<FieldGroup>> {
    let group = conn
        .query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM meta_field_groups WHERE id = ?1"),
            [id.to_string()],
            group_from_row,
        )
        .optional()?;
    Ok(group)
}

/// Groups of an entity; stable by display order, then creation order.
pub fn list_groups(conn: &Connection, entity_id: EntityDefId) -> StoreResult<Vec<FieldGroup>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLUMNS} FROM meta_field_groups
         WHERE entity_id = ?1 ORDER BY display_order, created_at, id"
    ))?;
    let groups = stmt
        .query_map([entity_id.to_string()], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

pub fn update_group(
    conn: &Connection,
    id: FieldGroupId,
    update: &NewFieldGroup,
    now: i64,
) -> StoreResult<FieldGroup> {
    update.validate()?;
    let changed = conn.execute(
        "UPDATE meta_field_groups SET name = ?1, label_i18n = ?2, display_order = ?3,
             collapsible = ?4, collapsed_by_default = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            update.name,
            serde_json::to_string(&update.label_i18n)?,
            update.display_order,
            update.collapsible,
            update.collapsed_by_default,
            now,
            id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("field group", id));
    }
    get_group(conn, id)?.ok_or_else(|| StoreError::not_found("field group", id))
}

/// Deletes a group; its fields become ungrouped.
pub fn delete_group(conn: &Connection, id: FieldGroupId, now: i64) -> StoreResult<()> {
    let group = get_group(conn, id)?.ok_or_else(|| StoreError::not_found("field group", id))?;
    for mut field in list_fields(conn, group.entity_id)? {
        if field.spec.field_group_id == Some(id) {
            field.spec.field_group_id = None;
            update_field(conn, field.id, &field.spec, now)?;
        }
    }
    conn.execute("DELETE FROM meta_field_groups WHERE id = ?1", [id.to_string()])?;
    Ok(())
}
