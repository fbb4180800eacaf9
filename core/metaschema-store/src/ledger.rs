//! Append-only migration ledger.
//!
//! Records are only ever inserted; triggers on `meta_migrations` abort any
//! UPDATE or DELETE.

use metaschema_model::MigrationRecord;
use metaschema_types::{EntityDefId, MigrationId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{json_column, parse_column};
use crate::error::StoreResult;

const COLUMNS: &str =
    "id, entity_id, parents, kind, upgrade, downgrade, shape, commit_message, applied_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<MigrationRecord> {
    let shape: Option<String> = row.get(6)?;
    let shape = shape
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(MigrationRecord {
        id: parse_column(row, 0)?,
        entity_id: parse_column(row, 1)?,
        parents: json_column(row, 2)?,
        kind: parse_column(row, 3)?,
        upgrade: json_column(row, 4)?,
        downgrade: json_column(row, 5)?,
        shape,
        commit_message: row.get(7)?,
        applied_at: row.get(8)?,
    })
}

pub fn append(conn: &Connection, record: &MigrationRecord) -> StoreResult<()> {
    let shape = record.shape.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO meta_migrations ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            record.id.to_string(),
            record.entity_id.to_string(),
            serde_json::to_string(&record.parents)?,
            record.kind.as_str(),
            serde_json::to_string(&record.upgrade)?,
            serde_json::to_string(&record.downgrade)?,
            shape,
            record.commit_message,
            record.applied_at,
        ],
    )?;
    debug!(
        migration_id = %record.id,
        entity_id = %record.entity_id,
        kind = record.kind.as_str(),
        ops = record.upgrade.len(),
        "ledger record appended"
    );
    Ok(())
}

/// Records of one entity in insertion order.
pub fn records_for(conn: &Connection, entity_id: EntityDefId) -> StoreResult<Vec<MigrationRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM meta_migrations WHERE entity_id = ?1 ORDER BY seq"
    ))?;
    let records = stmt
        .query_map([entity_id.to_string()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn get_record(conn: &Connection, id: MigrationId) -> StoreResult<Option<MigrationRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM meta_migrations WHERE id = ?1"),
            [id.to_string()],
            from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn count_for(conn: &Connection, entity_id: EntityDefId) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM meta_migrations WHERE entity_id = ?1",
        [entity_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
