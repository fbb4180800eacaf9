//! Lookup configurations and cascading rules.

use metaschema_model::{CascadingLookupRule, LookupConfiguration, LookupSpec, ValidationErrors};
use metaschema_types::{LookupId, RuleId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{json_column, parse_column};
use crate::error::{StoreError, StoreResult};

fn lookup_from_row(row: &Row<'_>) -> rusqlite::Result<LookupConfiguration> {
    Ok(LookupConfiguration {
        id: parse_column(row, 0)?,
        spec: json_column(row, 1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

pub fn insert_lookup(conn: &Connection, spec: &LookupSpec, now: i64) -> StoreResult<LookupConfiguration> {
    spec.validate()?;
    let lookup = LookupConfiguration {
        id: LookupId::new(),
        spec: spec.clone(),
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO meta_lookups (id, name, tenant_id, definition, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            lookup.id.to_string(),
            spec.name,
            spec.tenant_id.map(|t| t.to_string()),
            serde_json::to_string(spec)?,
            now,
            now,
        ],
    )?;
    debug!(lookup_id = %lookup.id, name = %spec.name, "lookup created");
    Ok(lookup)
}

pub fn get_lookup(conn: &Connection, id: LookupId) -> StoreResult<Option<LookupConfiguration>> {
    let lookup = conn
        .query_row(
            "SELECT id, definition, created_at, updated_at FROM meta_lookups WHERE id = ?1",
            [id.to_string()],
            lookup_from_row,
        )
        .optional()?;
    Ok(lookup)
}

pub fn require_lookup(conn: &Connection, id: LookupId) -> StoreResult<LookupConfiguration> {
    get_lookup(conn, id)?.ok_or_else(|| StoreError::not_found("lookup", id))
}

pub fn list_lookups(conn: &Connection) -> StoreResult<Vec<LookupConfiguration>> {
    let mut stmt = conn.prepare(
        "SELECT id, definition, created_at, updated_at FROM meta_lookups ORDER BY name, created_at",
    )?;
    let lookups = stmt
        .query_map([], lookup_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lookups)
}

pub fn update_lookup(
    conn: &Connection,
    id: LookupId,
    spec: &LookupSpec,
    now: i64,
) -> StoreResult<LookupConfiguration> {
    spec.validate()?;
    let changed = conn.execute(
        "UPDATE meta_lookups SET name = ?1, tenant_id = ?2, definition = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            spec.name,
            spec.tenant_id.map(|t| t.to_string()),
            serde_json::to_string(spec)?,
            now,
            id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("lookup", id));
    }
    require_lookup(conn, id)
}

/// Deletes a lookup and every rule touching it.
pub fn delete_lookup(conn: &Connection, id: LookupId) -> StoreResult<()> {
    let changed = conn.execute("DELETE FROM meta_lookups WHERE id = ?1", [id.to_string()])?;
    if changed == 0 {
        return Err(StoreError::not_found("lookup", id));
    }
    Ok(())
}

// ── Cascading rules ──────────────────────────────────────────────

const RULE_COLUMNS: &str = "id, parent_lookup_id, child_lookup_id, filter_expression, created_at";

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<CascadingLookupRule> {
    Ok(CascadingLookupRule {
        id: parse_column(row, 0)?,
        parent_lookup_id: parse_column(row, 1)?,
        child_lookup_id: parse_column(row, 2)?,
        filter_expression: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Inserts an edge. Acyclicity is checked by the caller in the same transaction.
pub fn insert_rule(
    conn: &Connection,
    parent: LookupId,
    child: LookupId,
    filter_expression: &str,
    now: i64,
) -> StoreResult<CascadingLookupRule> {
    let rule = CascadingLookupRule {
        id: RuleId::new(),
        parent_lookup_id: parent,
        child_lookup_id: child,
        filter_expression: filter_expression.to_string(),
        created_at: now,
    };
    conn.execute(
        &format!("INSERT INTO meta_cascading_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            rule.id.to_string(),
            parent.to_string(),
            child.to_string(),
            rule.filter_expression,
            now,
        ],
    )
    .map_err(|e| {
        let err = StoreError::from(e);
        if err.is_constraint_violation() {
            ValidationErrors::single("child_lookup_id", "a rule between these lookups already exists")
                .into()
        } else {
            err
        }
    })?;
    Ok(rule)
}

pub fn list_rules(conn: &Connection) -> StoreResult<Vec<CascadingLookupRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM meta_cascading_rules ORDER BY created_at, id"
    ))?;
    let rules = stmt
        .query_map([], rule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Rules whose child is `lookup`.
pub fn rules_for_child(conn: &Connection, lookup: LookupId) -> StoreResult<Vec<CascadingLookupRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM meta_cascading_rules
         WHERE child_lookup_id = ?1 ORDER BY created_at, id"
    ))?;
    let rules = stmt
        .query_map([lookup.to_string()], rule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn delete_rule(conn: &Connection, id: RuleId) -> StoreResult<CascadingLookupRule> {
    let rule = conn
        .query_row(
            &format!("SELECT {RULE_COLUMNS} FROM meta_cascading_rules WHERE id = ?1"),
            [id.to_string()],
            rule_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("cascading rule", id))?;
    conn.execute("DELETE FROM meta_cascading_rules WHERE id = ?1", [id.to_string()])?;
    Ok(rule)
}
