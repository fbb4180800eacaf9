//! Module records.

use metaschema_model::{Module, NewModule, ValidationErrors};
use metaschema_types::ModuleId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{parse_column, version_column};
use crate::error::{StoreError, StoreResult};

const COLUMNS: &str = "id, name, table_prefix, version, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Module> {
    Ok(Module {
        id: parse_column(row, 0)?,
        name: row.get(1)?,
        table_prefix: row.get(2)?,
        version: version_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn prefix_taken(err: StoreError, prefix: Option<&str>) -> StoreError {
    if err.is_constraint_violation() {
        let prefix = prefix.unwrap_or_default();
        return ValidationErrors::single(
            "table_prefix",
            format!("prefix '{prefix}' is already used by another module"),
        )
        .into();
    }
    err
}

pub fn insert_module(conn: &Connection, new: &NewModule, now: i64) -> StoreResult<Module> {
    new.validate()?;
    let module = Module {
        id: ModuleId::new(),
        name: new.name.clone(),
        table_prefix: new.table_prefix.clone(),
        version: 1,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!("INSERT INTO meta_modules ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            module.id.to_string(),
            module.name,
            module.table_prefix,
            module.version as i64,
            module.created_at,
            module.updated_at,
        ],
    )
    .map_err(|e| prefix_taken(e.into(), new.table_prefix.as_deref()))?;
    debug!(module_id = %module.id, name = %module.name, "module created");
    Ok(module)
}

pub fn get_module(conn: &Connection, id: ModuleId) -> StoreResult<Option<Module>> {
    let module = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM meta_modules WHERE id = ?1"),
            [id.to_string()],
            from_row,
        )
        .optional()?;
    Ok(module)
}

pub fn require_module(conn: &Connection, id: ModuleId) -> StoreResult<Module> {
    get_module(conn, id)?.ok_or_else(|| StoreError::not_found("module", id))
}

pub fn list_modules(conn: &Connection) -> StoreResult<Vec<Module>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM meta_modules ORDER BY name, created_at"
    ))?;
    let modules = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(modules)
}

/// Full replace of a module's name and prefix, guarded by its version.
pub fn update_module(
    conn: &Connection,
    id: ModuleId,
    update: &NewModule,
    expected_version: u64,
    now: i64,
) -> StoreResult<Module> {
    update.validate()?;
    let changed = conn
        .execute(
            "UPDATE meta_modules SET name = ?1, table_prefix = ?2, version = version + 1,
                 updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                update.name,
                update.table_prefix,
                now,
                id.to_string(),
                expected_version as i64
            ],
        )
        .map_err(|e| prefix_taken(e.into(), update.table_prefix.as_deref()))?;
    if changed == 0 {
        let current = require_module(conn, id)?;
        return Err(StoreError::VersionConflict {
            kind: "module",
            id: id.to_string(),
            expected: expected_version,
            actual: current.version,
        });
    }
    debug!(module_id = %id, "module updated");
    require_module(conn, id)
}
