//! Plans and applies schema migrations.
//!
//! A plan diffs the shape recorded by the ledger head against the shape
//! compiled from the current fields. Applying runs each op's DDL through the
//! dialect and appends one ledger record, all on the caller's transaction,
//! so a failing statement leaves neither the table nor the ledger changed.

use metaschema_model::{
    EntityDefinition, FieldDefinition, MigrationKind, MigrationOp, MigrationRecord, MigrationStep,
    Module, TableShape, ValidationErrors, apply_op,
};
use metaschema_store::{entities, ledger, now_ms, table_exists};
use metaschema_types::{EntityDefId, MigrationId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compile::compile_shape;
use crate::dialect::Dialect;
use crate::diff::diff;
use crate::error::{EngineError, EngineResult};
use crate::ledger::LedgerGraph;
use crate::resolver::resolve_entity_table;

/// Ops that take an entity's table from its recorded shape to its declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub entity_id: EntityDefId,
    /// Ledger head the plan was computed against.
    pub base_head: Option<MigrationId>,
    pub from: Option<TableShape>,
    pub to: TableShape,
    pub steps: Vec<MigrationStep>,
    /// Columns that already existed physically and are taken over as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adopted: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub struct Migrator {
    dialect: Box<dyn Dialect>,
    timeout: Duration,
}

impl Migrator {
    pub fn new(dialect: Box<dyn Dialect>, timeout: Duration) -> Self {
        Self { dialect, timeout }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn plan(
        &self,
        conn: &Connection,
        entity: &EntityDefinition,
        module: Option<&Module>,
        fields: &[FieldDefinition],
    ) -> EngineResult<MigrationPlan> {
        let graph = LedgerGraph::new(ledger::records_for(conn, entity.id)?);
        let head = graph.single_head()?;
        let target = resolve_entity_table(entity, module)?;
        let to = compile_shape(entity, &target, fields)?;

        let (mut from, adopting) = match head {
            Some(head) => (head.shape.clone(), false),
            None => match self.dialect.introspect(conn, &to.schema, &to.table)? {
                Some(live) => {
                    warn!(
                        entity_id = %entity.id,
                        table = %target,
                        "table exists without ledger history; adopting it"
                    );
                    (Some(live), true)
                }
                None => (None, false),
            },
        };

        if let Some(base) = &from {
            if base.schema != to.schema {
                return Err(EngineError::validation(
                    "schema_name",
                    "a synthesized table cannot move to another schema",
                ));
            }
        }
        self.check_references(conn, from.as_ref(), &to)?;

        let mut adopted = Vec::new();
        if let (Some(base), false) = (from.as_mut(), adopting) {
            if let Some(live) = self.dialect.introspect(conn, &base.schema, &base.table)? {
                for column in &to.columns {
                    if base.has_column(&column.name) {
                        continue;
                    }
                    let Some(existing) = live.column(&column.name) else {
                        continue;
                    };
                    if !self
                        .dialect
                        .types_compatible(&existing.sql_type, &column.sql_type)
                    {
                        return Err(schema_conflict(
                            &base.table,
                            &column.name,
                            &existing.sql_type,
                            &column.sql_type,
                        ));
                    }
                    info!(table = %base.table, column = %column.name, "adopting existing column");
                    base.columns.push(column.clone());
                    adopted.push(column.name.clone());
                }
            }
        }

        let steps = diff(from.as_ref(), &to);
        if adopting {
            for step in &steps {
                match &step.op {
                    MigrationOp::DropColumn { column } => {
                        return Err(schema_conflict(&to.table, &column.name, &column.sql_type, "(none)"));
                    }
                    MigrationOp::AlterType { from: have, to: want }
                        if !self.dialect.types_compatible(&have.sql_type, &want.sql_type) =>
                    {
                        return Err(schema_conflict(
                            &to.table,
                            &have.name,
                            &have.sql_type,
                            &want.sql_type,
                        ));
                    }
                    _ => {}
                }
            }
        }

        debug!(entity_id = %entity.id, steps = steps.len(), "migration planned");
        Ok(MigrationPlan {
            entity_id: entity.id,
            base_head: head.map(|h| h.id),
            from,
            to,
            steps,
            adopted,
        })
    }

    /// Foreign key targets must exist in the table's schema.
    fn check_references(
        &self,
        conn: &Connection,
        from: Option<&TableShape>,
        to: &TableShape,
    ) -> EngineResult<()> {
        let mut errors = ValidationErrors::new();
        for fk in &to.foreign_keys {
            let known = from.and_then(|f| f.foreign_key(&fk.column)) == Some(fk);
            if known || fk.ref_table == to.table {
                continue;
            }
            if !table_exists(conn, &to.schema, &fk.ref_table)? {
                errors.push(
                    format!("fields.{}.reference_table_name", fk.column),
                    format!("no table '{}' in schema '{}'", fk.ref_table, to.schema),
                );
            }
        }
        Ok(errors.into_result()?)
    }

    /// Runs the plan and appends its record. An empty plan records nothing.
    pub fn apply(
        &self,
        conn: &Connection,
        plan: &MigrationPlan,
        commit_message: Option<&str>,
    ) -> EngineResult<Option<MigrationRecord>> {
        let graph = LedgerGraph::new(ledger::records_for(conn, plan.entity_id)?);
        let head = graph.single_head()?.map(|h| h.id);
        if head != plan.base_head {
            return Err(EngineError::Conflict(
                "the migration ledger moved since this plan was computed".into(),
            ));
        }
        if plan.steps.is_empty() {
            return Ok(None);
        }

        let ops: Vec<MigrationOp> = plan.steps.iter().map(|s| s.op.clone()).collect();
        let shape = self.execute(conn, plan.from.clone(), &ops)?;
        let (upgrade, downgrade) = MigrationRecord::split_steps(&plan.steps);
        let record = MigrationRecord {
            id: MigrationId::new(),
            entity_id: plan.entity_id,
            parents: plan.base_head.into_iter().collect(),
            kind: MigrationKind::Schema,
            upgrade,
            downgrade,
            shape,
            commit_message: commit_message.map(String::from),
            applied_at: now_ms(),
        };
        ledger::append(conn, &record)?;
        info!(
            entity_id = %plan.entity_id,
            migration_id = %record.id,
            ops = record.upgrade.len(),
            dialect = self.dialect.name(),
            "migration applied"
        );
        Ok(Some(record))
    }

    /// Applies the head's downgrade as a new revert record.
    pub fn revert_last(
        &self,
        conn: &Connection,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<MigrationRecord> {
        let graph = LedgerGraph::new(ledger::records_for(conn, entity_id)?);
        let head = graph
            .single_head()?
            .ok_or_else(|| EngineError::validation("ledger", "nothing to revert"))?;
        if head.downgrade.is_empty() {
            return Err(EngineError::validation(
                "ledger",
                format!("{} record {} has no schema change to revert", head.kind.as_str(), head.id),
            ));
        }

        let shape = self.execute(conn, head.shape.clone(), &head.downgrade)?;
        let steps: Vec<MigrationStep> = head.downgrade.iter().cloned().map(MigrationStep::new).collect();
        let (upgrade, downgrade) = MigrationRecord::split_steps(&steps);
        let record = MigrationRecord {
            id: MigrationId::new(),
            entity_id,
            parents: vec![head.id],
            kind: MigrationKind::Revert,
            upgrade,
            downgrade,
            shape,
            commit_message: Some(
                commit_message
                    .map(String::from)
                    .unwrap_or_else(|| format!("revert {}", head.id)),
            ),
            applied_at: now_ms(),
        };
        ledger::append(conn, &record)?;
        info!(entity_id = %entity_id, reverted = %head.id, migration_id = %record.id, "migration reverted");
        Ok(record)
    }

    /// Joins every head under one merge record. The physical table is left
    /// alone; the merged shape is that of the most recent head.
    pub fn merge_heads(
        &self,
        conn: &Connection,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<MigrationRecord> {
        let graph = LedgerGraph::new(ledger::records_for(conn, entity_id)?);
        let heads = graph.heads();
        let Some(latest) = heads.last().filter(|_| heads.len() > 1) else {
            return Err(EngineError::validation("ledger", "there is only one head"));
        };
        let diverged = heads.iter().any(|h| match (&h.shape, &latest.shape) {
            (Some(a), Some(b)) => !a.structurally_eq(b),
            (None, None) => false,
            _ => true,
        });
        if diverged {
            warn!(entity_id = %entity_id, heads = heads.len(), "merging heads with different shapes");
        }
        let record = MigrationRecord {
            id: MigrationId::new(),
            entity_id,
            parents: heads.iter().map(|h| h.id).collect(),
            kind: MigrationKind::Merge,
            upgrade: Vec::new(),
            downgrade: Vec::new(),
            shape: latest.shape.clone(),
            commit_message: commit_message.map(String::from),
            applied_at: now_ms(),
        };
        ledger::append(conn, &record)?;
        info!(entity_id = %entity_id, migration_id = %record.id, "heads merged");
        Ok(record)
    }

    /// Appends a record produced elsewhere without running its ops.
    pub fn import(&self, conn: &Connection, record: &MigrationRecord) -> EngineResult<()> {
        entities::require_entity(conn, record.entity_id)?;
        let graph = LedgerGraph::new(ledger::records_for(conn, record.entity_id)?);
        let mut errors = ValidationErrors::new();
        if ledger::get_record(conn, record.id)?.is_some() {
            errors.push("id", "record is already in the ledger");
        }
        if record.parents.is_empty() && !graph.is_empty() {
            errors.push("parents", "only the first record of a ledger may have no parents");
        }
        for parent in &record.parents {
            if !graph.contains(*parent) {
                errors.push("parents", format!("unknown parent {parent}"));
            }
        }
        errors.into_result()?;
        ledger::append(conn, record)?;
        info!(entity_id = %record.entity_id, migration_id = %record.id, "migration record imported");
        Ok(())
    }

    /// Executes ops in order, checking the deadline before each statement.
    fn execute(
        &self,
        conn: &Connection,
        from: Option<TableShape>,
        ops: &[MigrationOp],
    ) -> EngineResult<Option<TableShape>> {
        let started = Instant::now();
        let mut shape = from;
        for (step, op) in ops.iter().enumerate() {
            let after = apply_op(shape.clone(), op)
                .map_err(|e| EngineError::internal(format!("invalid op {op}: {e}")))?;
            for sql in self.dialect.render(shape.as_ref(), op, after.as_ref())? {
                if started.elapsed() >= self.timeout {
                    return Err(migration_failed(
                        step,
                        op,
                        format!("timed out after {} ms", started.elapsed().as_millis()),
                    ));
                }
                debug!(step, sql = %sql, "executing");
                conn.execute_batch(&sql)
                    .map_err(|e| migration_failed(step, op, e))?;
            }
            shape = after;
        }
        Ok(shape)
    }
}

fn migration_failed(step: usize, op: &MigrationOp, cause: impl std::fmt::Display) -> EngineError {
    let correlation_id = Uuid::new_v4();
    error!(%correlation_id, step, op = %op, "migration failed: {cause}");
    EngineError::Migration {
        step,
        op: op.kind().to_string(),
        correlation_id,
    }
}

fn schema_conflict(table: &str, column: &str, existing: &str, requested: &str) -> EngineError {
    let correlation_id = Uuid::new_v4();
    error!(
        %correlation_id,
        table,
        column,
        existing,
        requested,
        "column already exists with an incompatible type"
    );
    EngineError::SchemaConflict {
        table: table.into(),
        column: column.into(),
        existing: existing.into(),
        requested: requested.into(),
        correlation_id,
    }
}
