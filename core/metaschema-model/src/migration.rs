use metaschema_types::{EntityDefId, MigrationId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shape::{ColumnDef, ForeignKeyDef, IndexDef, TableShape};

/// One physical schema operation. Ops act on the table described by the
/// shape they are applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOp {
    CreateTable { shape: TableShape },
    /// Only produced as the rollback of `CreateTable`; carries the shape so
    /// its own inverse is complete.
    DropTable { shape: TableShape },
    RenameTable { schema: String, from: String, to: String },
    AddColumn { column: ColumnDef },
    DropColumn { column: ColumnDef },
    AlterType { from: ColumnDef, to: ColumnDef },
    AddForeignKey { foreign_key: ForeignKeyDef },
    DropForeignKey { foreign_key: ForeignKeyDef },
    AddIndex { index: IndexDef },
    DropIndex { index: IndexDef },
}

impl MigrationOp {
    /// The op that undoes this one.
    pub fn inverse(&self) -> MigrationOp {
        match self {
            Self::CreateTable { shape } => Self::DropTable {
                shape: shape.clone(),
            },
            Self::DropTable { shape } => Self::CreateTable {
                shape: shape.clone(),
            },
            Self::RenameTable { schema, from, to } => Self::RenameTable {
                schema: schema.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddColumn { column } => Self::DropColumn {
                column: column.clone(),
            },
            Self::DropColumn { column } => Self::AddColumn {
                column: column.clone(),
            },
            Self::AlterType { from, to } => Self::AlterType {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddForeignKey { foreign_key } => Self::DropForeignKey {
                foreign_key: foreign_key.clone(),
            },
            Self::DropForeignKey { foreign_key } => Self::AddForeignKey {
                foreign_key: foreign_key.clone(),
            },
            Self::AddIndex { index } => Self::DropIndex {
                index: index.clone(),
            },
            Self::DropIndex { index } => Self::AddIndex {
                index: index.clone(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::RenameTable { .. } => "rename_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::AlterType { .. } => "alter_type",
            Self::AddForeignKey { .. } => "add_foreign_key",
            Self::DropForeignKey { .. } => "drop_foreign_key",
            Self::AddIndex { .. } => "add_index",
            Self::DropIndex { .. } => "drop_index",
        }
    }
}

impl fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { shape } => write!(
                f,
                "create_table {}.{} ({} columns)",
                shape.schema,
                shape.table,
                shape.columns.len()
            ),
            Self::DropTable { shape } => write!(f, "drop_table {}.{}", shape.schema, shape.table),
            Self::RenameTable { schema, from, to } => {
                write!(f, "rename_table {schema}.{from} -> {to}")
            }
            Self::AddColumn { column } => write!(f, "add_column {} {}", column.name, column.sql_type),
            Self::DropColumn { column } => write!(f, "drop_column {}", column.name),
            Self::AlterType { from, to } => {
                write!(f, "alter_type {} {} -> {}", from.name, from.sql_type, to.sql_type)
            }
            Self::AddForeignKey { foreign_key } => write!(
                f,
                "add_foreign_key {} -> {}({})",
                foreign_key.column, foreign_key.ref_table, foreign_key.ref_column
            ),
            Self::DropForeignKey { foreign_key } => {
                write!(f, "drop_foreign_key {}", foreign_key.column)
            }
            Self::AddIndex { index } => {
                write!(f, "add_index {} ({})", index.name, index.columns.join(", "))
            }
            Self::DropIndex { index } => write!(f, "drop_index {}", index.name),
        }
    }
}

/// An op paired with the op that undoes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub op: MigrationOp,
    pub rollback: MigrationOp,
}

impl MigrationStep {
    pub fn new(op: MigrationOp) -> Self {
        let rollback = op.inverse();
        Self { op, rollback }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    /// Schema change derived from a metadata diff.
    Schema,
    /// No-op join node unifying several heads.
    Merge,
    /// Applies the downgrade of an earlier record.
    Revert,
}

impl MigrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Merge => "merge",
            Self::Revert => "revert",
        }
    }
}

impl std::str::FromStr for MigrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema" => Ok(Self::Schema),
            "merge" => Ok(Self::Merge),
            "revert" => Ok(Self::Revert),
            _ => Err(format!("unknown migration kind '{s}'")),
        }
    }
}

/// An append-only ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: MigrationId,
    pub entity_id: EntityDefId,
    /// Predecessors; empty for the first record, several for a merge node.
    pub parents: Vec<MigrationId>,
    pub kind: MigrationKind,
    pub upgrade: Vec<MigrationOp>,
    /// Rollback ops in the order they must run.
    pub downgrade: Vec<MigrationOp>,
    /// Table shape after `upgrade`; `None` once the table is gone.
    pub shape: Option<TableShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub applied_at: i64,
}

impl MigrationRecord {
    /// Splits steps into upgrade ops and reversed rollbacks.
    pub fn split_steps(steps: &[MigrationStep]) -> (Vec<MigrationOp>, Vec<MigrationOp>) {
        let upgrade = steps.iter().map(|s| s.op.clone()).collect();
        let downgrade = steps.iter().rev().map(|s| s.rollback.clone()).collect();
        (upgrade, downgrade)
    }

    pub fn is_merge(&self) -> bool {
        self.kind == MigrationKind::Merge
    }
}
