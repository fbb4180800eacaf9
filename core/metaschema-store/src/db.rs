//! Shared SQLite handle.
//!
//! Metadata tables and synthesized entity tables live in one database so a
//! metadata edit and the DDL it triggers commit together. Schemas other than
//! `main` are attached databases stored next to the main file.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema;

/// Busy timeout used when the caller does not pick one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A cloneable handle to the metaschema database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens a database file with an explicit busy timeout for cross-process writers.
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened database");
        Self::init(conn, Some(path))
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::init(&conn)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        for name in db.read(|conn| schema::known_schemas(conn))? {
            db.ensure_schema(&name)?;
        }
        Ok(db)
    }

    /// Path of the main database file; `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Makes `schema` addressable, attaching its database file if needed.
    ///
    /// Attaching is not allowed inside a transaction, so callers resolve
    /// schemas before opening a write.
    pub fn ensure_schema(&self, schema: &str) -> StoreResult<()> {
        if schema == "main" || schema == "temp" {
            return Ok(());
        }
        if !metaschema_model::is_identifier(schema) {
            return Err(StoreError::InvalidData(format!("invalid schema name '{schema}'")));
        }
        let conn = self.lock()?;
        if attached_schemas(&conn)?.iter().any(|s| s == schema) {
            return Ok(());
        }
        let file = match &self.path {
            Some(main) => attached_path(main, schema).to_string_lossy().into_owned(),
            None => ":memory:".to_string(),
        };
        conn.execute(&format!("ATTACH DATABASE ?1 AS \"{schema}\""), [&file])?;
        info!(schema, file = %file, "attached schema");
        Ok(())
    }

    /// Runs `f` with shared access to the connection.
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction; commits on `Ok`.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        run_immediate(&mut conn, f)
    }

    /// Like [`write`](Self::write), with foreign key enforcement suspended so
    /// tables can be rebuilt. Integrity is verified with
    /// `PRAGMA foreign_key_check` before commit.
    pub fn write_ddl<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        conn.pragma_update(None, "foreign_keys", false)
            .map_err(StoreError::from)?;
        let result: Result<T, E> = run_immediate(&mut conn, |tx| {
            let value = f(tx)?;
            check_foreign_keys(tx)?;
            Ok(value)
        });
        let restored = conn.pragma_update(None, "foreign_keys", true);
        let value = result?;
        restored.map_err(StoreError::from)?;
        Ok(value)
    }
}

fn run_immediate<T, E>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    // dropping `tx` on error rolls back
    let value = f(&tx)?;
    tx.commit().map_err(StoreError::from)?;
    Ok(value)
}

/// Names of all databases visible on the connection (`main`, `temp`, attached).
pub fn attached_schemas(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn check_foreign_keys(conn: &Connection) -> StoreResult<()> {
    for schema in attached_schemas(conn)? {
        if schema == "temp" {
            continue;
        }
        let mut stmt = conn.prepare(&format!("PRAGMA \"{schema}\".foreign_key_check"))?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let table: String = row.get(0)?;
            return Err(StoreError::ForeignKeyViolation { table });
        }
    }
    Ok(())
}

/// File backing an attached schema: `<stem>.<schema>.db` next to the main file.
fn attached_path(main: &Path, schema: &str) -> PathBuf {
    let stem = main
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "metaschema".into());
    main.with_file_name(format!("{stem}.{schema}.db"))
}
