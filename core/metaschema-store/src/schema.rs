//! Metadata table definitions.

use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreResult;

/// Bumped whenever the metadata tables change shape.
pub const SCHEMA_VERSION: i64 = 1;

const METADATA_DDL: &str = "
    CREATE TABLE IF NOT EXISTS meta_modules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        table_prefix TEXT,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS meta_modules_prefix
        ON meta_modules(table_prefix) WHERE table_prefix IS NOT NULL;

    CREATE TABLE IF NOT EXISTS meta_entities (
        id TEXT PRIMARY KEY,
        tenant_id TEXT,
        module_id TEXT REFERENCES meta_modules(id),
        name TEXT NOT NULL,
        table_name TEXT NOT NULL,
        schema_name TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('draft', 'published')),
        data_scope TEXT NOT NULL
            CHECK (data_scope IN ('platform', 'tenant', 'company', 'branch', 'department')),
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS meta_entities_module ON meta_entities(module_id);

    CREATE TABLE IF NOT EXISTS meta_fields (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL REFERENCES meta_entities(id),
        name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        definition TEXT NOT NULL,
        display_order INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE UNIQUE INDEX IF NOT EXISTS meta_fields_live_name
        ON meta_fields(entity_id, name) WHERE deleted_at IS NULL;

    CREATE TABLE IF NOT EXISTS meta_field_groups (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL REFERENCES meta_entities(id),
        name TEXT NOT NULL,
        label_i18n TEXT NOT NULL,
        display_order INTEGER NOT NULL,
        collapsible INTEGER NOT NULL,
        collapsed_by_default INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS meta_field_groups_entity ON meta_field_groups(entity_id);

    CREATE TABLE IF NOT EXISTS meta_lookups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        tenant_id TEXT,
        definition TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS meta_cascading_rules (
        id TEXT PRIMARY KEY,
        parent_lookup_id TEXT NOT NULL REFERENCES meta_lookups(id) ON DELETE CASCADE,
        child_lookup_id TEXT NOT NULL REFERENCES meta_lookups(id) ON DELETE CASCADE,
        filter_expression TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(parent_lookup_id, child_lookup_id)
    );

    CREATE TABLE IF NOT EXISTS meta_migrations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        entity_id TEXT NOT NULL,
        parents TEXT NOT NULL,
        kind TEXT NOT NULL,
        upgrade TEXT NOT NULL,
        downgrade TEXT NOT NULL,
        shape TEXT,
        commit_message TEXT,
        applied_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS meta_migrations_entity ON meta_migrations(entity_id, seq);

    CREATE TRIGGER IF NOT EXISTS meta_migrations_no_update
        BEFORE UPDATE ON meta_migrations
        BEGIN SELECT RAISE(ABORT, 'migration ledger is append-only'); END;
    CREATE TRIGGER IF NOT EXISTS meta_migrations_no_delete
        BEFORE DELETE ON meta_migrations
        BEGIN SELECT RAISE(ABORT, 'migration ledger is append-only'); END;
";

/// Creates the metadata tables if they do not exist yet.
pub fn init(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(METADATA_DDL)?;
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(from = current, to = SCHEMA_VERSION, "metadata schema initialized");
    }
    Ok(())
}

/// Non-default schemas referenced by entities or table lookups; re-attached on open.
pub fn known_schemas(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT schema_name FROM meta_entities WHERE schema_name NOT IN ('main', 'temp')
         UNION
         SELECT DISTINCT json_extract(definition, '$.schema') FROM meta_lookups
             WHERE json_extract(definition, '$.schema') IS NOT NULL
               AND json_extract(definition, '$.schema') NOT IN ('main', 'temp')",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// True if `schema.table` exists as a table.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> StoreResult<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM \"{schema}\".sqlite_master WHERE type = 'table' AND name = ?1"
    );
    let count: i64 = conn.query_row(&sql, [table], |row| row.get(0))?;
    Ok(count > 0)
}
