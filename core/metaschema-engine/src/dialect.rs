//! SQL dialects.
//!
//! A [`Dialect`] turns migration ops into DDL and reads the live shape of a
//! table back. The engine ships the SQLite dialect; SQLite cannot alter
//! column types or constraints in place, so those ops rebuild the table
//! (create a copy with the new shape, move the rows, swap names).

use metaschema_model::{ColumnDef, ForeignKeyDef, IndexDef, MigrationOp, TableShape};
use metaschema_store::table_exists;
use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};

/// Storage class a declared type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Statements that take the table from `before` to `after` by way of `op`.
    fn render(
        &self,
        before: Option<&TableShape>,
        op: &MigrationOp,
        after: Option<&TableShape>,
    ) -> EngineResult<Vec<String>>;

    /// Shape of an existing table, or `None` if there is no such table.
    fn introspect(
        &self,
        conn: &Connection,
        schema: &str,
        table: &str,
    ) -> EngineResult<Option<TableShape>>;

    /// True if values stored under `existing` can be read back as `requested`.
    fn types_compatible(&self, existing: &str, requested: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

/// SQLite's type affinity rules, applied to a declared type.
pub fn affinity(declared: &str) -> Affinity {
    let t = declared.to_ascii_uppercase();
    if t.contains("INT") {
        Affinity::Integer
    } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
        Affinity::Text
    } else if t.contains("BLOB") || t.trim().is_empty() {
        Affinity::Blob
    } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Numeric
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn qualified(schema: &str, table: &str) -> String {
    format!("\"{schema}\".\"{table}\"")
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.sql_type);
    if !column.nullable || column.primary_key {
        sql.push_str(" NOT NULL");
    }
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn foreign_key_sql(fk: &ForeignKeyDef) -> String {
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        quote(&fk.name()),
        quote(&fk.column),
        quote(&fk.ref_table),
        quote(&fk.ref_column),
        fk.on_delete.as_sql(),
        fk.on_update.as_sql()
    )
}

fn create_table_sql(shape: &TableShape, table: &str) -> String {
    let mut parts: Vec<String> = shape.columns.iter().map(column_sql).collect();
    parts.extend(shape.foreign_keys.iter().map(foreign_key_sql));
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualified(&shape.schema, table),
        parts.join(",\n    ")
    )
}

fn create_index_sql(schema: &str, table: &str, index: &IndexDef) -> String {
    let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        qualified(schema, &index.name),
        quote(table),
        columns.join(", ")
    )
}

/// Copy-and-swap for changes SQLite cannot make with `ALTER TABLE`.
fn rebuild(before: &TableShape, after: &TableShape) -> Vec<String> {
    let scratch = format!("{}__rebuild", after.table);
    let mut out = vec![create_table_sql(after, &scratch)];
    let common: Vec<String> = after
        .columns
        .iter()
        .filter(|c| before.has_column(&c.name))
        .map(|c| quote(&c.name))
        .collect();
    if !common.is_empty() {
        let columns = common.join(", ");
        out.push(format!(
            "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
            qualified(&after.schema, &scratch),
            qualified(&before.schema, &before.table)
        ));
    }
    out.push(format!("DROP TABLE {}", qualified(&before.schema, &before.table)));
    out.push(format!(
        "ALTER TABLE {} RENAME TO {}",
        qualified(&after.schema, &scratch),
        quote(&after.table)
    ));
    out.extend(
        after
            .indexes
            .iter()
            .map(|index| create_index_sql(&after.schema, &after.table, index)),
    );
    out
}

fn can_add_in_place(column: &ColumnDef) -> bool {
    !column.primary_key && !column.unique && (column.nullable || column.default.is_some())
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn render(
        &self,
        before: Option<&TableShape>,
        op: &MigrationOp,
        after: Option<&TableShape>,
    ) -> EngineResult<Vec<String>> {
        if let MigrationOp::CreateTable { shape } = op {
            let mut out = vec![create_table_sql(shape, &shape.table)];
            out.extend(
                shape
                    .indexes
                    .iter()
                    .map(|index| create_index_sql(&shape.schema, &shape.table, index)),
            );
            return Ok(out);
        }
        let Some(before) = before else {
            return Err(EngineError::internal(format!("cannot render {op} without a table")));
        };
        let table = qualified(&before.schema, &before.table);
        let statements = match op {
            MigrationOp::CreateTable { .. } => Vec::new(),
            MigrationOp::DropTable { .. } => vec![format!("DROP TABLE {table}")],
            MigrationOp::RenameTable { to, .. } => {
                vec![format!("ALTER TABLE {table} RENAME TO {}", quote(to))]
            }
            MigrationOp::AddColumn { column } if can_add_in_place(column) => {
                vec![format!("ALTER TABLE {table} ADD COLUMN {}", column_sql(column))]
            }
            MigrationOp::DropColumn { column } if !column.primary_key && !column.unique => {
                vec![format!("ALTER TABLE {table} DROP COLUMN {}", quote(&column.name))]
            }
            MigrationOp::AddIndex { index } => {
                vec![create_index_sql(&before.schema, &before.table, index)]
            }
            MigrationOp::DropIndex { index } => {
                vec![format!("DROP INDEX {}", qualified(&before.schema, &index.name))]
            }
            _ => {
                let Some(after) = after else {
                    return Err(EngineError::internal(format!(
                        "cannot rebuild for {op} without a target shape"
                    )));
                };
                rebuild(before, after)
            }
        };
        Ok(statements)
    }

    fn introspect(
        &self,
        conn: &Connection,
        schema: &str,
        table: &str,
    ) -> EngineResult<Option<TableShape>> {
        if !table_exists(conn, schema, table)? {
            return Ok(None);
        }
        let mut shape = TableShape::new(schema, table);

        let mut stmt = conn.prepare(&format!("PRAGMA {}.table_info({})", quote(schema), quote(table)))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let default: Option<String> = row.get(4)?;
            let pk: i64 = row.get(5)?;
            let mut column = ColumnDef::new(&name, &declared);
            column.primary_key = pk > 0;
            column.nullable = not_null == 0 && pk == 0;
            column.default = default;
            shape.columns.push(column);
        }

        let mut stmt = conn.prepare(&format!(
            "PRAGMA {}.foreign_key_list({})",
            quote(schema),
            quote(table)
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let on_update: String = row.get(5)?;
            let on_delete: String = row.get(6)?;
            let ref_column: Option<String> = row.get(4)?;
            shape.foreign_keys.push(ForeignKeyDef {
                column: row.get(3)?,
                ref_table: row.get(2)?,
                ref_column: ref_column.unwrap_or_else(|| "id".into()),
                on_delete: on_delete.parse().map_err(EngineError::internal)?,
                on_update: on_update.parse().map_err(EngineError::internal)?,
            });
        }

        let mut stmt = conn.prepare(&format!("PRAGMA {}.index_list({})", quote(schema), quote(table)))?;
        let listed = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (name, unique, origin) in listed {
            let mut stmt =
                conn.prepare(&format!("PRAGMA {}.index_info({})", quote(schema), quote(&name)))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<Result<Vec<_>, _>>()?;
            match origin.as_str() {
                "pk" => {}
                "u" => {
                    if let [only] = columns.as_slice() {
                        if let Some(column) = shape.columns.iter_mut().find(|c| c.name == *only) {
                            column.unique = true;
                        }
                    }
                }
                _ => shape.indexes.push(IndexDef {
                    name,
                    columns,
                    unique: unique != 0,
                }),
            }
        }
        Ok(Some(shape))
    }

    fn types_compatible(&self, existing: &str, requested: &str) -> bool {
        affinity(existing) == affinity(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaschema_model::{ReferentialAction, apply_op};

    fn invoices() -> TableShape {
        let mut shape = TableShape::new("main", "fin_invoices");
        shape.columns.push(ColumnDef::new("id", "TEXT").primary_key());
        shape.columns.push(ColumnDef::new("number", "VARCHAR(32)").not_null().unique());
        shape.columns.push(ColumnDef::new("status", "VARCHAR(16)").with_default("'open'"));
        shape.indexes.push(IndexDef {
            name: "idx_fin_invoices_status".into(),
            columns: vec!["status".into()],
            unique: false,
        });
        shape
    }

    fn execute(conn: &Connection, before: Option<&TableShape>, op: &MigrationOp) -> Option<TableShape> {
        let after = apply_op(before.cloned(), op).unwrap();
        for sql in SqliteDialect.render(before, op, after.as_ref()).unwrap() {
            conn.execute_batch(&sql).unwrap();
        }
        after
    }

    #[test]
    fn affinity_rules() {
        assert_eq!(affinity("VARCHAR(255)"), Affinity::Text);
        assert_eq!(affinity("BIGINT"), Affinity::Integer);
        assert_eq!(affinity("NUMERIC(18,2)"), Affinity::Numeric);
        assert_eq!(affinity("BOOLEAN"), Affinity::Numeric);
        assert_eq!(affinity("REAL"), Affinity::Real);
        assert!(SqliteDialect.types_compatible("TEXT", "VARCHAR(64)"));
        assert!(!SqliteDialect.types_compatible("INTEGER", "VARCHAR(64)"));
    }

    #[test]
    fn created_table_introspects_to_the_same_shape() {
        let conn = Connection::open_in_memory().unwrap();
        let shape = invoices();
        execute(&conn, None, &MigrationOp::CreateTable { shape: shape.clone() });
        let live = SqliteDialect.introspect(&conn, "main", "fin_invoices").unwrap().unwrap();
        assert!(shape.structurally_eq(&live), "{:?}", shape.differences(&live));
    }

    #[test]
    fn missing_table_introspects_to_none() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(SqliteDialect.introspect(&conn, "main", "nope").unwrap().is_none());
    }

    #[test]
    fn nullable_add_is_a_single_alter() {
        let statements = SqliteDialect
            .render(
                Some(&invoices()),
                &MigrationOp::AddColumn {
                    column: ColumnDef::new("due_date", "DATE"),
                },
                None,
            )
            .unwrap();
        assert_eq!(
            statements,
            vec!["ALTER TABLE \"main\".\"fin_invoices\" ADD COLUMN \"due_date\" DATE".to_string()]
        );
    }

    #[test]
    fn foreign_key_add_rebuilds_and_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE crm_customers (id TEXT PRIMARY KEY)").unwrap();
        let mut shape = invoices();
        shape.columns.push(ColumnDef::new("customer_id", "TEXT"));
        let shape = execute(&conn, None, &MigrationOp::CreateTable { shape }).unwrap();
        conn.execute_batch(
            "INSERT INTO crm_customers VALUES ('c1');
             INSERT INTO fin_invoices (id, number, customer_id) VALUES ('i1', 'INV-1', 'c1');",
        )
        .unwrap();

        let fk = ForeignKeyDef {
            column: "customer_id".into(),
            ref_table: "crm_customers".into(),
            ref_column: "id".into(),
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        };
        let after = execute(&conn, Some(&shape), &MigrationOp::AddForeignKey { foreign_key: fk }).unwrap();

        let live = SqliteDialect.introspect(&conn, "main", "fin_invoices").unwrap().unwrap();
        assert!(after.structurally_eq(&live), "{:?}", after.differences(&live));
        let status: String = conn
            .query_row("SELECT status FROM fin_invoices WHERE id = 'i1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "open");
    }

    #[test]
    fn not_null_add_without_default_fails_on_existing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let shape = execute(&conn, None, &MigrationOp::CreateTable { shape: invoices() }).unwrap();
        conn.execute_batch("INSERT INTO fin_invoices (id, number) VALUES ('i1', 'INV-1')")
            .unwrap();
        let op = MigrationOp::AddColumn {
            column: ColumnDef::new("total", "NUMERIC(18,2)").not_null(),
        };
        let after = apply_op(Some(shape.clone()), &op).unwrap();
        let statements = SqliteDialect.render(Some(&shape), &op, after.as_ref()).unwrap();
        assert!(statements[0].contains("fin_invoices__rebuild"));
        let failed = statements.iter().any(|sql| conn.execute_batch(sql).is_err());
        assert!(failed);
    }
}
