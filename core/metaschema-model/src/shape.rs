//! Structural description of one physical table.
//!
//! A [`TableShape`] is what the migration engine diffs: the desired shape is
//! compiled from field definitions, the baseline is the shape recorded by the
//! latest ledger record, and the live shape is introspected from the database.
//! Column order is not significant; two shapes are equal when they have the
//! same columns, foreign keys and indexes by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::field::ReferentialAction;
use crate::migration::MigrationOp;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared SQL type, upper case (e.g. `VARCHAR(255)`).
    pub sql_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Default as a rendered SQL literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.to_ascii_uppercase(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, literal: &str) -> Self {
        self.default = Some(literal.into());
        self
    }

    /// True when every attribute other than the type matches.
    pub fn same_constraints(&self, other: &ColumnDef) -> bool {
        self.nullable == other.nullable
            && self.primary_key == other.primary_key
            && self.unique == other.unique
            && self.default == other.default
    }
}

/// A single-column foreign key. Its constraint name is `fk_{column}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl ForeignKeyDef {
    pub fn name(&self) -> String {
        format!("fk_{}", self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

/// One structural difference between two shapes, reported by [`TableShape::differences`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeDifference {
    MissingColumn { column: String },
    ExtraColumn { column: String },
    TypeMismatch { column: String, expected: String, actual: String },
    ConstraintMismatch { column: String },
    MissingForeignKey { column: String },
    ExtraForeignKey { column: String },
    MissingIndex { index: String },
    ExtraIndex { index: String },
}

impl fmt::Display for ShapeDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn { column } => write!(f, "column '{column}' is missing"),
            Self::ExtraColumn { column } => write!(f, "unexpected column '{column}'"),
            Self::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(f, "column '{column}' is {actual}, expected {expected}"),
            Self::ConstraintMismatch { column } => {
                write!(f, "column '{column}' has different constraints")
            }
            Self::MissingForeignKey { column } => write!(f, "foreign key on '{column}' is missing"),
            Self::ExtraForeignKey { column } => write!(f, "unexpected foreign key on '{column}'"),
            Self::MissingIndex { index } => write!(f, "index '{index}' is missing"),
            Self::ExtraIndex { index } => write!(f, "unexpected index '{index}'"),
        }
    }
}

impl TableShape {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyDef> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Equality ignoring the order of columns, foreign keys and indexes.
    pub fn structurally_eq(&self, other: &TableShape) -> bool {
        self.schema == other.schema && self.table == other.table && self.differences(other).is_empty()
    }

    /// Differences of `actual` relative to `self` (the expected shape).
    /// Table identity is not compared.
    pub fn differences(&self, actual: &TableShape) -> Vec<ShapeDifference> {
        let mut out = Vec::new();
        let expected_cols: BTreeMap<&str, &ColumnDef> =
            self.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let actual_cols: BTreeMap<&str, &ColumnDef> =
            actual.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        for (name, want) in &expected_cols {
            match actual_cols.get(name) {
                None => out.push(ShapeDifference::MissingColumn {
                    column: name.to_string(),
                }),
                Some(have) if !have.sql_type.eq_ignore_ascii_case(&want.sql_type) => {
                    out.push(ShapeDifference::TypeMismatch {
                        column: name.to_string(),
                        expected: want.sql_type.clone(),
                        actual: have.sql_type.clone(),
                    })
                }
                Some(have) if !have.same_constraints(want) => {
                    out.push(ShapeDifference::ConstraintMismatch {
                        column: name.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        for name in actual_cols.keys() {
            if !expected_cols.contains_key(name) {
                out.push(ShapeDifference::ExtraColumn {
                    column: name.to_string(),
                });
            }
        }

        for fk in &self.foreign_keys {
            if actual.foreign_key(&fk.column) != Some(fk) {
                out.push(ShapeDifference::MissingForeignKey {
                    column: fk.column.clone(),
                });
            }
        }
        for fk in &actual.foreign_keys {
            if self.foreign_key(&fk.column).is_none() {
                out.push(ShapeDifference::ExtraForeignKey {
                    column: fk.column.clone(),
                });
            }
        }

        for index in &self.indexes {
            match actual.index(&index.name) {
                Some(have) if have.columns == index.columns && have.unique == index.unique => {}
                _ => out.push(ShapeDifference::MissingIndex {
                    index: index.name.clone(),
                }),
            }
        }
        for index in &actual.indexes {
            if self.index(&index.name).is_none() {
                out.push(ShapeDifference::ExtraIndex {
                    index: index.name.clone(),
                });
            }
        }
        out
    }
}

/// Applies one op to a shape, returning the resulting shape.
///
/// `None` stands for "no table". Errors describe why the op does not fit the
/// shape; they indicate a corrupt plan or ledger rather than a user mistake.
pub fn apply_op(shape: Option<TableShape>, op: &MigrationOp) -> Result<Option<TableShape>, String> {
    match (shape, op) {
        (None, MigrationOp::CreateTable { shape }) => Ok(Some(shape.clone())),
        (Some(current), MigrationOp::CreateTable { shape }) => Err(format!(
            "cannot create table '{}': '{}' already exists",
            shape.table, current.table
        )),
        (None, other) => Err(format!("cannot {} without a table", other.kind())),
        (Some(current), MigrationOp::DropTable { shape }) => {
            if current.table != shape.table {
                return Err(format!(
                    "cannot drop table '{}': current table is '{}'",
                    shape.table, current.table
                ));
            }
            Ok(None)
        }
        (Some(mut current), op) => {
            apply_to_existing(&mut current, op)?;
            Ok(Some(current))
        }
    }
}

fn apply_to_existing(shape: &mut TableShape, op: &MigrationOp) -> Result<(), String> {
    match op {
        MigrationOp::CreateTable { .. } | MigrationOp::DropTable { .. } => {
            return Err(format!("{} is a table-level op", op.kind()));
        }
        MigrationOp::RenameTable { from, to, .. } => {
            if shape.table != *from {
                return Err(format!("cannot rename '{from}': current table is '{}'", shape.table));
            }
            shape.table = to.clone();
        }
        MigrationOp::AddColumn { column } => {
            if shape.has_column(&column.name) {
                return Err(format!("column '{}' already exists", column.name));
            }
            shape.columns.push(column.clone());
        }
        MigrationOp::DropColumn { column } => {
            if !shape.has_column(&column.name) {
                return Err(format!("column '{}' does not exist", column.name));
            }
            if shape.foreign_key(&column.name).is_some() {
                return Err(format!("column '{}' still has a foreign key", column.name));
            }
            if let Some(index) = shape.indexes.iter().find(|i| i.columns.contains(&column.name)) {
                return Err(format!(
                    "column '{}' is still used by index '{}'",
                    column.name, index.name
                ));
            }
            shape.columns.retain(|c| c.name != column.name);
        }
        MigrationOp::AlterType { from, to } => {
            if from.name != to.name {
                return Err(format!("cannot alter '{}' into '{}'", from.name, to.name));
            }
            let slot = shape
                .columns
                .iter_mut()
                .find(|c| c.name == from.name)
                .ok_or_else(|| format!("column '{}' does not exist", from.name))?;
            *slot = to.clone();
        }
        MigrationOp::AddForeignKey { foreign_key } => {
            if !shape.has_column(&foreign_key.column) {
                return Err(format!("column '{}' does not exist", foreign_key.column));
            }
            if shape.foreign_key(&foreign_key.column).is_some() {
                return Err(format!("'{}' already has a foreign key", foreign_key.column));
            }
            shape.foreign_keys.push(foreign_key.clone());
        }
        MigrationOp::DropForeignKey { foreign_key } => {
            let before = shape.foreign_keys.len();
            shape.foreign_keys.retain(|fk| fk.column != foreign_key.column);
            if shape.foreign_keys.len() == before {
                return Err(format!("no foreign key on '{}'", foreign_key.column));
            }
        }
        MigrationOp::AddIndex { index } => {
            if shape.index(&index.name).is_some() {
                return Err(format!("index '{}' already exists", index.name));
            }
            if let Some(missing) = index.columns.iter().find(|c| !shape.has_column(c)) {
                return Err(format!("index '{}' uses unknown column '{missing}'", index.name));
            }
            shape.indexes.push(index.clone());
        }
        MigrationOp::DropIndex { index } => {
            let before = shape.indexes.len();
            shape.indexes.retain(|i| i.name != index.name);
            if shape.indexes.len() == before {
                return Err(format!("index '{}' does not exist", index.name));
            }
        }
    }
    Ok(())
}
