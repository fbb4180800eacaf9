//! Transaction-per-call facade over the record modules.

use metaschema_model::{
    CascadingLookupRule, EntityDefinition, FieldDefinition, FieldGroup, FieldSpec,
    LookupConfiguration, LookupSpec, MigrationRecord, Module, NewEntity, NewFieldGroup, NewModule,
    ValidationErrors,
};
use metaschema_types::{EntityDefId, FieldGroupId, FieldId, LookupId, ModuleId};
use rusqlite::Connection;

use crate::codec::now_ms;
use crate::db::Database;
use crate::edits::{self, Edited};
use crate::error::StoreResult;
use crate::{entities, fields, ledger, lookups, modules};

/// Metadata store backed by the shared [`Database`].
///
/// Each method runs in its own transaction. Writes that must commit together
/// with DDL go through the connection-level functions instead.
#[derive(Clone)]
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        self.db.read(f)
    }

    // ── Modules ──────────────────────────────────────────────────

    pub fn create_module(&self, new: &NewModule) -> StoreResult<Module> {
        self.db.write(|tx| modules::insert_module(tx, new, now_ms()))
    }

    pub fn module(&self, id: ModuleId) -> StoreResult<Module> {
        self.read(|conn| modules::require_module(conn, id))
    }

    pub fn modules(&self) -> StoreResult<Vec<Module>> {
        self.read(modules::list_modules)
    }

    // ── Entities ─────────────────────────────────────────────────

    pub fn create_entity(&self, new: &NewEntity) -> StoreResult<EntityDefinition> {
        self.db.ensure_schema(new.schema_or_default())?;
        self.db.write(|tx| {
            if let Some(module_id) = new.module_id {
                if modules::get_module(tx, module_id)?.is_none() {
                    return Err(ValidationErrors::single("module_id", "no such module").into());
                }
            }
            entities::insert_entity(tx, new, now_ms())
        })
    }

    pub fn entity(&self, id: EntityDefId) -> StoreResult<EntityDefinition> {
        self.read(|conn| entities::require_entity(conn, id))
    }

    /// Live entities, or every entity when `include_deleted`.
    pub fn entities(&self, include_deleted: bool) -> StoreResult<Vec<EntityDefinition>> {
        self.read(|conn| entities::list_entities(conn, include_deleted))
    }

    pub fn module_entities(&self, module_id: ModuleId) -> StoreResult<Vec<EntityDefinition>> {
        self.read(|conn| entities::list_module_entities(conn, module_id))
    }

    // ── Fields and groups ────────────────────────────────────────

    pub fn field(&self, id: FieldId) -> StoreResult<FieldDefinition> {
        self.read(|conn| fields::require_field(conn, id))
    }

    pub fn fields(&self, entity_id: EntityDefId) -> StoreResult<Vec<FieldDefinition>> {
        self.read(|conn| fields::list_fields(conn, entity_id))
    }

    pub fn groups(&self, entity_id: EntityDefId) -> StoreResult<Vec<FieldGroup>> {
        self.read(|conn| fields::list_groups(conn, entity_id))
    }

    pub fn add_group(
        &self,
        entity_id: EntityDefId,
        new: &NewFieldGroup,
        expected_version: u64,
    ) -> StoreResult<Edited<FieldGroup>> {
        self.db
            .write(|tx| edits::add_group(tx, entity_id, new, expected_version, now_ms()))
    }

    pub fn update_group(
        &self,
        group_id: FieldGroupId,
        update: &NewFieldGroup,
        expected_version: u64,
    ) -> StoreResult<Edited<FieldGroup>> {
        self.db
            .write(|tx| edits::update_group(tx, group_id, update, expected_version, now_ms()))
    }

    pub fn delete_group(&self, group_id: FieldGroupId, expected_version: u64) -> StoreResult<u64> {
        self.db
            .write(|tx| edits::delete_group(tx, group_id, expected_version, now_ms()))
    }

    /// Field edit without DDL; only valid while the entity is a draft. The
    /// engine routes edits of published entities through its migrator.
    pub fn add_draft_field(
        &self,
        entity_id: EntityDefId,
        spec: &FieldSpec,
        expected_version: u64,
    ) -> StoreResult<Edited<FieldDefinition>> {
        self.db.write(|tx| {
            require_draft(tx, entity_id)?;
            edits::add_field(tx, entity_id, spec, expected_version, now_ms())
        })
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn lookup(&self, id: LookupId) -> StoreResult<LookupConfiguration> {
        self.read(|conn| lookups::require_lookup(conn, id))
    }

    pub fn lookups(&self) -> StoreResult<Vec<LookupConfiguration>> {
        self.read(lookups::list_lookups)
    }

    pub fn rules(&self) -> StoreResult<Vec<CascadingLookupRule>> {
        self.read(lookups::list_rules)
    }

    pub fn rules_for_child(&self, lookup: LookupId) -> StoreResult<Vec<CascadingLookupRule>> {
        self.read(|conn| lookups::rules_for_child(conn, lookup))
    }

    pub fn create_lookup(&self, spec: &LookupSpec) -> StoreResult<LookupConfiguration> {
        if let Some(schema) = lookup_schema(spec) {
            self.db.ensure_schema(schema)?;
        }
        self.db.write(|tx| lookups::insert_lookup(tx, spec, now_ms()))
    }

    pub fn update_lookup(&self, id: LookupId, spec: &LookupSpec) -> StoreResult<LookupConfiguration> {
        if let Some(schema) = lookup_schema(spec) {
            self.db.ensure_schema(schema)?;
        }
        self.db.write(|tx| lookups::update_lookup(tx, id, spec, now_ms()))
    }

    pub fn delete_lookup(&self, id: LookupId) -> StoreResult<()> {
        self.db.write(|tx| lookups::delete_lookup(tx, id))
    }

    // ── Ledger ───────────────────────────────────────────────────

    pub fn ledger(&self, entity_id: EntityDefId) -> StoreResult<Vec<MigrationRecord>> {
        self.read(|conn| ledger::records_for(conn, entity_id))
    }
}

fn lookup_schema(spec: &LookupSpec) -> Option<&str> {
    match &spec.source {
        metaschema_model::LookupSource::Table { schema, .. } => schema.as_deref(),
        metaschema_model::LookupSource::Entity { .. } => None,
    }
}

fn require_draft(conn: &Connection, entity_id: EntityDefId) -> StoreResult<()> {
    let entity = entities::require_entity(conn, entity_id)?;
    if entity.is_published() {
        return Err(ValidationErrors::single(
            "status",
            "published entities are edited through the migration engine",
        )
        .into());
    }
    Ok(())
}
