//! Shape diffing.
//!
//! Ops are ordered so every intermediate shape is valid: rename first, then
//! foreign keys and indexes that are going away, then columns, then new
//! foreign keys and indexes. Applying the result to `from` with
//! [`apply_op`](metaschema_model::apply_op) yields a shape structurally equal
//! to `to`, and diffing that against `to` yields nothing.

use metaschema_model::{MigrationOp, MigrationStep, TableShape};

pub fn diff(from: Option<&TableShape>, to: &TableShape) -> Vec<MigrationStep> {
    let Some(from) = from else {
        return vec![MigrationStep::new(MigrationOp::CreateTable { shape: to.clone() })];
    };
    let mut ops = Vec::new();

    if from.table != to.table {
        ops.push(MigrationOp::RenameTable {
            schema: to.schema.clone(),
            from: from.table.clone(),
            to: to.table.clone(),
        });
    }

    for fk in &from.foreign_keys {
        if to.foreign_key(&fk.column) != Some(fk) {
            ops.push(MigrationOp::DropForeignKey {
                foreign_key: fk.clone(),
            });
        }
    }
    for index in &from.indexes {
        if to.index(&index.name) != Some(index) {
            ops.push(MigrationOp::DropIndex {
                index: index.clone(),
            });
        }
    }

    for column in &from.columns {
        if !to.has_column(&column.name) {
            ops.push(MigrationOp::DropColumn {
                column: column.clone(),
            });
        }
    }
    for column in &to.columns {
        match from.column(&column.name) {
            None => ops.push(MigrationOp::AddColumn {
                column: column.clone(),
            }),
            Some(existing) if existing != column => ops.push(MigrationOp::AlterType {
                from: existing.clone(),
                to: column.clone(),
            }),
            Some(_) => {}
        }
    }

    for fk in &to.foreign_keys {
        if from.foreign_key(&fk.column) != Some(fk) {
            ops.push(MigrationOp::AddForeignKey {
                foreign_key: fk.clone(),
            });
        }
    }
    for index in &to.indexes {
        if from.index(&index.name) != Some(index) {
            ops.push(MigrationOp::AddIndex {
                index: index.clone(),
            });
        }
    }

    ops.into_iter().map(MigrationStep::new).collect()
}
