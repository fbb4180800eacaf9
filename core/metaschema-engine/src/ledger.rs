//! Graph view over an entity's migration ledger.
//!
//! Records form a DAG through their `parents`. A head is a record no other
//! record names as a parent. Applying a migration requires exactly one head;
//! divergent chains (for example after importing records from another
//! deployment) are joined with a merge record first.

use metaschema_model::MigrationRecord;
use metaschema_types::MigrationId;
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct LedgerGraph {
    records: Vec<MigrationRecord>,
}

impl LedgerGraph {
    /// `records` must be in append order.
    pub fn new(records: Vec<MigrationRecord>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: MigrationId) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Heads in append order.
    pub fn heads(&self) -> Vec<&MigrationRecord> {
        let referenced: HashSet<MigrationId> = self
            .records
            .iter()
            .flat_map(|r| r.parents.iter().copied())
            .collect();
        self.records
            .iter()
            .filter(|r| !referenced.contains(&r.id))
            .collect()
    }

    /// The only head, `None` for an empty ledger; several heads are a conflict.
    pub fn single_head(&self) -> EngineResult<Option<&MigrationRecord>> {
        let heads = self.heads();
        match heads.as_slice() {
            [] => Ok(None),
            [head] => Ok(Some(head)),
            many => Err(EngineError::Conflict(format!(
                "migration ledger has {} heads; merge them before migrating",
                many.len()
            ))),
        }
    }

}
