//! Versioned edits of an entity's fields and groups.
//!
//! Each edit bumps the owning entity's version first (failing on a stale
//! `expected_version`), applies the change, then re-validates the resulting
//! field set. Callers run these inside one transaction so a failed check
//! leaves nothing behind; the engine composes them with DDL.

use metaschema_model::{FieldDefinition, FieldGroup, FieldSpec, NewFieldGroup, ValidationErrors, validate_field_set};
use metaschema_types::{EntityDefId, FieldGroupId, FieldId};
use rusqlite::Connection;

use crate::entities::touch_entity;
use crate::error::{StoreError, StoreResult};
use crate::{fields, lookups};

/// Result of an edit: the touched record and the entity's new version.
#[derive(Debug, Clone, PartialEq)]
pub struct Edited<T> {
    pub record: T,
    pub entity_version: u64,
}

fn check_references(conn: &Connection, entity_id: EntityDefId, spec: &FieldSpec) -> StoreResult<()> {
    let mut errors = ValidationErrors::new();
    if let Some(group_id) = spec.field_group_id {
        match fields::get_group(conn, group_id)? {
            Some(group) if group.entity_id == entity_id => {}
            _ => errors.push("field_group_id", "no such group on this entity"),
        }
    }
    if let Some(lookup_id) = spec.lookup_id {
        if lookups::get_lookup(conn, lookup_id)?.is_none() {
            errors.push("lookup_id", "no such lookup");
        }
    }
    Ok(errors.into_result()?)
}

fn check_field_set(conn: &Connection, entity_id: EntityDefId) -> StoreResult<()> {
    let live = fields::list_fields(conn, entity_id)?;
    let specs: Vec<&FieldSpec> = live.iter().map(|f| &f.spec).collect();
    Ok(validate_field_set(&specs)?)
}

pub fn add_field(
    conn: &Connection,
    entity_id: EntityDefId,
    spec: &FieldSpec,
    expected_version: u64,
    now: i64,
) -> StoreResult<Edited<FieldDefinition>> {
    let entity_version = touch_entity(conn, entity_id, expected_version, now)?;
    check_references(conn, entity_id, spec)?;
    let record = fields::insert_field(conn, entity_id, spec, now)?;
    check_field_set(conn, entity_id)?;
    Ok(Edited {
        record,
        entity_version,
    })
}

pub fn update_field(
    conn: &Connection,
    field_id: FieldId,
    spec: &FieldSpec,
    expected_version: u64,
    now: i64,
) -> StoreResult<Edited<FieldDefinition>> {
    let current = fields::require_field(conn, field_id)?;
    let entity_version = touch_entity(conn, current.entity_id, expected_version, now)?;
    check_references(conn, current.entity_id, spec)?;
    let record = fields::update_field(conn, field_id, spec, now)?;
    check_field_set(conn, current.entity_id)?;
    Ok(Edited {
        record,
        entity_version,
    })
}

/// Soft-deletes a field. Fails when another field still depends on it.
pub fn remove_field(
    conn: &Connection,
    field_id: FieldId,
    expected_version: u64,
    now: i64,
) -> StoreResult<Edited<FieldDefinition>> {
    let current = fields::require_field(conn, field_id)?;
    let entity_version = touch_entity(conn, current.entity_id, expected_version, now)?;
    let dependents: Vec<String> = fields::list_fields(conn, current.entity_id)?
        .into_iter()
        .filter(|f| f.spec.depends_on_field.as_deref() == Some(current.name()))
        .map(|f| f.spec.name)
        .collect();
    if !dependents.is_empty() {
        return Err(ValidationErrors::single(
            "depends_on_field",
            format!("fields {} depend on '{}'", dependents.join(", "), current.name()),
        )
        .into());
    }
    fields::soft_delete_field(conn, field_id, now)?;
    let mut record = current;
    record.deleted_at = Some(now);
    Ok(Edited {
        record,
        entity_version,
    })
}

pub fn add_group(
    conn: &Connection,
    entity_id: EntityDefId,
    new: &NewFieldGroup,
    expected_version: u64,
    now: i64,
) -> StoreResult<Edited<FieldGroup>> {
    let entity_version = touch_entity(conn, entity_id, expected_version, now)?;
    let record = fields::insert_group(conn, entity_id, new, now)?;
    Ok(Edited {
        record,
        entity_version,
    })
}

pub fn update_group(
    conn: &Connection,
    group_id: FieldGroupId,
    update: &NewFieldGroup,
    expected_version: u64,
    now: i64,
) -> StoreResult<Edited<FieldGroup>> {
    let current =
        fields::get_group(conn, group_id)?.ok_or_else(|| StoreError::not_found("field group", group_id))?;
    let entity_version = touch_entity(conn, current.entity_id, expected_version, now)?;
    let record = fields::update_group(conn, group_id, update, now)?;
    Ok(Edited {
        record,
        entity_version,
    })
}

pub fn delete_group(
    conn: &Connection,
    group_id: FieldGroupId,
    expected_version: u64,
    now: i64,
) -> StoreResult<u64> {
    let current =
        fields::get_group(conn, group_id)?.ok_or_else(|| StoreError::not_found("field group", group_id))?;
    let entity_version = touch_entity(conn, current.entity_id, expected_version, now)?;
    fields::delete_group(conn, group_id, now)?;
    Ok(entity_version)
}
