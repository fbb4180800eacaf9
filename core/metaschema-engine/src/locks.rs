//! Per-entity write leases.
//!
//! Only one schema-affecting operation may run per entity definition at a
//! time. A second writer fails fast with a conflict instead of queueing
//! behind the first; SQLite's own write lock serializes the rest.

use metaschema_types::EntityDefId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Default)]
pub struct EntityLocks {
    held: Arc<Mutex<HashSet<EntityDefId>>>,
}

/// Releases its entities when dropped.
pub struct EntityLease {
    held: Arc<Mutex<HashSet<EntityDefId>>>,
    ids: Vec<EntityDefId>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<EntityDefId>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn acquire(&self, id: EntityDefId) -> EngineResult<EntityLease> {
        self.acquire_all(&[id])
    }

    /// Leases every id or none of them.
    pub fn acquire_all(&self, ids: &[EntityDefId]) -> EngineResult<EntityLease> {
        let mut held = self.held();
        if let Some(busy) = ids.iter().find(|id| held.contains(id)) {
            return Err(EngineError::Conflict(format!(
                "entity {busy} is being migrated by another operation"
            )));
        }
        held.extend(ids.iter().copied());
        debug!(count = ids.len(), "entity lease acquired");
        Ok(EntityLease {
            held: Arc::clone(&self.held),
            ids: ids.to_vec(),
        })
    }
}

impl Drop for EntityLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in &self.ids {
            held.remove(id);
        }
    }
}
