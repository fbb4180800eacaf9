//! The engine facade.
//!
//! Every schema-affecting operation takes the entity's lease, then runs the
//! metadata write and the DDL it implies in one transaction. Reads go
//! through the caches; writes invalidate what they change.

use metaschema_model::{
    CallerScope, CascadingLookupRule, EntityDefinition, EntityStatus, FieldDefinition, FieldSpec,
    LookupConfiguration, LookupSource, LookupSpec, MigrationOp, MigrationRecord, Module, NewEntity,
    NewModule, validate_rule,
};
use metaschema_store::{
    Database, MetadataStore, edits, entities, fields, lookups, modules, now_ms,
};
use metaschema_types::{EntityDefId, FieldId, LookupId, ModuleId, RuleId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use tracing::{info, warn};

use crate::audit::{self, AuditMode, AuditReport};
use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::dialect::SqliteDialect;
use crate::error::{EngineError, EngineResult};
use crate::locks::{EntityLease, EntityLocks};
use crate::lookup::{LookupPage, LookupResolver, OptionsRequest, RuleGraph};
use crate::migrator::{MigrationPlan, Migrator};
use crate::resolver::{ResolvedTable, TableResolver, resolve_entity_table};
use crate::scope::{ScopeDecision, check_scope};

/// Outcome of an entity-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity: EntityDefinition,
    /// Ledger record for the DDL the change required, if any.
    pub migration: Option<MigrationRecord>,
    /// Records of entities whose reference fields followed a table rename.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referrers: Vec<MigrationRecord>,
}

/// Outcome of a field edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: FieldDefinition,
    pub entity_version: u64,
    pub migration: Option<MigrationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleChange {
    pub module: Module,
    /// One record per published entity whose table was renamed, followed by
    /// the records of entities whose references followed the rename.
    pub migrations: Vec<MigrationRecord>,
}

/// Schema synthesis engine over one database.
pub struct SchemaEngine {
    /// Shared connection handle.
    db: Database,
    /// Transaction-per-call metadata access for plain reads and writes.
    store: MetadataStore,
    config: EngineConfig,
    /// Cached entity → table resolution.
    resolver: TableResolver,
    migrator: Migrator,
    /// Compiled lookups and recent selections.
    lookups: LookupResolver,
    /// One schema-affecting operation per entity at a time.
    locks: EntityLocks,
}

impl SchemaEngine {
    pub fn new(db: Database, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            store: MetadataStore::new(db.clone()),
            db,
            resolver: TableResolver::new(config.resolver_ttl()),
            migrator: Migrator::new(Box::new(SqliteDialect), config.migration_timeout()),
            lookups: LookupResolver::new(&config),
            locks: EntityLocks::new(),
            config,
        })
    }

    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        let db = Database::open_with_timeout(path, config.busy_timeout())?;
        Self::new(db, config)
    }

    /// Opens an engine over an in-memory database (for testing).
    pub fn open_in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::new(Database::open_in_memory()?, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Modules ──────────────────────────────────────────────────

    pub fn create_module(&self, new: &NewModule) -> EngineResult<Module> {
        Ok(self.store.create_module(new)?)
    }

    /// Renames the tables of published member entities when the prefix changes.
    pub fn update_module(
        &self,
        module_id: ModuleId,
        update: &NewModule,
        expected_version: u64,
    ) -> EngineResult<ModuleChange> {
        let members = self.store.module_entities(module_id)?;
        let ids: Vec<EntityDefId> = members.iter().map(|e| e.id).collect();
        let _lease = self.locks.acquire_all(&ids)?;
        for entity in &members {
            self.db.ensure_schema(&entity.schema_name)?;
        }
        let change = self.db.write_ddl(|tx| {
            let module = modules::update_module(tx, module_id, update, expected_version, now_ms())?;
            let mut migrations = Vec::new();
            for entity in entities::list_module_entities(tx, module_id)? {
                resolve_entity_table(&entity, Some(&module))?;
                check_table_unique(tx, &entity, Some(&module))?;
                migrations.extend(self.migrate_with_referrers(tx, entity.id, None, &ids)?);
            }
            Ok::<_, EngineError>(ModuleChange { module, migrations })
        })?;
        self.resolver.invalidate_module(module_id);
        self.lookups.invalidate_all();
        info!(module_id = %module_id, renamed = change.migrations.len(), "module updated");
        Ok(change)
    }

    // ── Entities ─────────────────────────────────────────────────

    pub fn create_entity(&self, new: &NewEntity) -> EngineResult<EntityDefinition> {
        new.validate()?;
        self.db.ensure_schema(new.schema_or_default())?;
        let entity = self.db.write(|tx| {
            if let Some(module_id) = new.module_id {
                if modules::get_module(tx, module_id)?.is_none() {
                    return Err(EngineError::validation("module_id", "no such module"));
                }
            }
            let entity = entities::insert_entity(tx, new, now_ms())?;
            let module = module_of(tx, &entity)?;
            resolve_entity_table(&entity, module.as_ref())?;
            check_table_unique(tx, &entity, module.as_ref())?;
            Ok::<_, EngineError>(entity)
        })?;
        info!(entity_id = %entity.id, name = %entity.name, "entity created");
        Ok(entity)
    }

    pub fn entity(&self, entity_id: EntityDefId) -> EngineResult<EntityDefinition> {
        Ok(self.store.entity(entity_id)?)
    }

    /// Replaces an entity's declarative attributes, migrating its table when
    /// published (a new table name is a rename, a finer scope adds columns).
    pub fn update_entity(
        &self,
        entity_id: EntityDefId,
        update: &NewEntity,
        expected_version: u64,
    ) -> EngineResult<EntityChange> {
        update.validate()?;
        let _lease = self.locks.acquire(entity_id)?;
        self.db.ensure_schema(update.schema_or_default())?;
        let change = self.db.write_ddl(|tx| {
            if let Some(module_id) = update.module_id {
                if modules::get_module(tx, module_id)?.is_none() {
                    return Err(EngineError::validation("module_id", "no such module"));
                }
            }
            let entity = entities::update_entity(tx, entity_id, update, expected_version, now_ms())?;
            let module = module_of(tx, &entity)?;
            resolve_entity_table(&entity, module.as_ref())?;
            check_table_unique(tx, &entity, module.as_ref())?;
            let mut records = self
                .migrate_with_referrers(tx, entity_id, None, &[entity_id])?
                .into_iter();
            let migration = records.next();
            // a self-reference bumps the entity again
            let entity = entities::require_entity(tx, entity_id)?;
            Ok::<_, EngineError>(EntityChange {
                entity,
                migration,
                referrers: records.collect(),
            })
        })?;
        self.resolver.invalidate_entity(entity_id);
        self.lookups.invalidate_all();
        Ok(change)
    }

    /// Soft delete. The physical table is kept.
    pub fn delete_entity(&self, entity_id: EntityDefId, expected_version: u64) -> EngineResult<()> {
        let _lease = self.locks.acquire(entity_id)?;
        self.db.write(|tx| {
            entities::soft_delete_entity(tx, entity_id, expected_version, now_ms())
        })?;
        self.resolver.invalidate_entity(entity_id);
        self.lookups.invalidate_all();
        info!(entity_id = %entity_id, "entity deleted");
        Ok(())
    }

    /// Creates the entity's table and marks it published.
    pub fn publish_entity(
        &self,
        entity_id: EntityDefId,
        expected_version: u64,
        commit_message: Option<&str>,
    ) -> EngineResult<EntityChange> {
        let _lease = self.locks.acquire(entity_id)?;
        let current = self.store.entity(entity_id)?;
        self.db.ensure_schema(&current.schema_name)?;
        let change = self.db.write_ddl(|tx| {
            let entity = entities::require_entity(tx, entity_id)?;
            if entity.version != expected_version {
                return Err(EngineError::Conflict(format!(
                    "entity {entity_id} is at version {}, expected {expected_version}",
                    entity.version
                )));
            }
            if entity.is_published() {
                return Err(EngineError::validation("status", "entity is already published"));
            }
            let module = module_of(tx, &entity)?;
            check_table_unique(tx, &entity, module.as_ref())?;
            let migration = self.migrate_in(tx, &entity, commit_message)?;
            let entity = entities::set_status(
                tx,
                entity_id,
                EntityStatus::Published,
                expected_version,
                now_ms(),
            )?;
            Ok::<_, EngineError>(EntityChange {
                entity,
                migration,
                referrers: Vec::new(),
            })
        })?;
        self.resolver.invalidate_entity(entity_id);
        self.lookups.invalidate_all();
        info!(entity_id = %entity_id, "entity published");
        Ok(change)
    }

    // ── Fields ───────────────────────────────────────────────────

    pub fn fields(&self, entity_id: EntityDefId) -> EngineResult<Vec<FieldDefinition>> {
        Ok(self.store.fields(entity_id)?)
    }

    pub fn add_field(
        &self,
        entity_id: EntityDefId,
        spec: &FieldSpec,
        expected_version: u64,
    ) -> EngineResult<FieldChange> {
        self.field_edit(entity_id, |tx| {
            edits::add_field(tx, entity_id, spec, expected_version, now_ms())
        })
    }

    pub fn update_field(
        &self,
        field_id: FieldId,
        spec: &FieldSpec,
        expected_version: u64,
    ) -> EngineResult<FieldChange> {
        let entity_id = self.store.field(field_id)?.entity_id;
        self.field_edit(entity_id, |tx| {
            edits::update_field(tx, field_id, spec, expected_version, now_ms())
        })
    }

    /// Soft-deletes the field; on a published entity its column is dropped.
    pub fn remove_field(&self, field_id: FieldId, expected_version: u64) -> EngineResult<FieldChange> {
        let entity_id = self.store.field(field_id)?.entity_id;
        self.field_edit(entity_id, |tx| {
            edits::remove_field(tx, field_id, expected_version, now_ms())
        })
    }

    fn field_edit(
        &self,
        entity_id: EntityDefId,
        edit: impl FnOnce(&Connection) -> metaschema_store::StoreResult<edits::Edited<FieldDefinition>>,
    ) -> EngineResult<FieldChange> {
        let _lease = self.locks.acquire(entity_id)?;
        let entity = self.store.entity(entity_id)?;
        self.db.ensure_schema(&entity.schema_name)?;
        self.db.write_ddl(|tx| {
            let edited = edit(tx)?;
            let migration = self.migrate_if_published(tx, entity_id, None)?;
            Ok(FieldChange {
                field: edited.record,
                entity_version: edited.entity_version,
                migration,
            })
        })
    }

    // ── Resolution and scope ─────────────────────────────────────

    pub fn resolve_table(&self, entity_id: EntityDefId) -> EngineResult<ResolvedTable> {
        self.db.read(|conn| self.resolver.resolve(conn, entity_id))
    }

    pub fn check_scope(
        &self,
        entity_id: EntityDefId,
        caller: &CallerScope,
    ) -> EngineResult<ScopeDecision> {
        let entity = self.store.entity(entity_id)?;
        Ok(check_scope(&entity, caller))
    }

    // ── Migrations ───────────────────────────────────────────────

    /// Plans without applying; works for drafts too as a preview.
    pub fn plan_migration(&self, entity_id: EntityDefId) -> EngineResult<MigrationPlan> {
        let entity = self.store.entity(entity_id)?;
        self.db.ensure_schema(&entity.schema_name)?;
        self.db.read(|conn| {
            let entity = entities::require_entity(conn, entity_id)?;
            let module = module_of(conn, &entity)?;
            let live_fields = fields::list_fields(conn, entity_id)?;
            self.migrator.plan(conn, &entity, module.as_ref(), &live_fields)
        })
    }

    /// Applies a plan made by [`plan_migration`](Self::plan_migration). Fails
    /// with a conflict if the ledger moved in between.
    pub fn apply_migration(
        &self,
        plan: &MigrationPlan,
        commit_message: Option<&str>,
    ) -> EngineResult<Option<MigrationRecord>> {
        let _lease = self.locks.acquire(plan.entity_id)?;
        self.db.ensure_schema(&plan.to.schema)?;
        self.db.write_ddl(|tx| {
            let entity = entities::require_entity(tx, plan.entity_id)?;
            if !entity.is_published() {
                return Err(EngineError::validation(
                    "status",
                    "draft entities are migrated by publishing them",
                ));
            }
            self.migrator.apply(tx, plan, commit_message)
        })
    }

    /// Plans and applies in one transaction.
    pub fn migrate(
        &self,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<Option<MigrationRecord>> {
        let _lease = self.locks.acquire(entity_id)?;
        let entity = self.store.entity(entity_id)?;
        self.db.ensure_schema(&entity.schema_name)?;
        self.db
            .write_ddl(|tx| self.migrate_if_published(tx, entity_id, commit_message))
    }

    /// Applies the head record's downgrade as a new ledger record. Reverting
    /// the table's creation returns the entity to draft.
    pub fn revert_last_migration(
        &self,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<MigrationRecord> {
        let _lease = self.locks.acquire(entity_id)?;
        let entity = self.store.entity(entity_id)?;
        self.db.ensure_schema(&entity.schema_name)?;
        let record = self.db.write_ddl(|tx| {
            let record = self.migrator.revert_last(tx, entity_id, commit_message)?;
            if record.shape.is_none() {
                let entity = entities::require_entity(tx, entity_id)?;
                if entity.is_published() {
                    warn!(entity_id = %entity_id, "table reverted away; entity back to draft");
                    entities::set_status(tx, entity_id, EntityStatus::Draft, entity.version, now_ms())?;
                }
            }
            Ok::<_, EngineError>(record)
        })?;
        self.resolver.invalidate_entity(entity_id);
        self.lookups.invalidate_all();
        Ok(record)
    }

    pub fn merge_heads(
        &self,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<MigrationRecord> {
        let _lease = self.locks.acquire(entity_id)?;
        self.db
            .write(|tx| self.migrator.merge_heads(tx, entity_id, commit_message))
    }

    /// Appends a record exported from another deployment.
    pub fn import_migration(&self, record: &MigrationRecord) -> EngineResult<()> {
        let _lease = self.locks.acquire(record.entity_id)?;
        self.db.write(|tx| self.migrator.import(tx, record))
    }

    pub fn ledger(&self, entity_id: EntityDefId) -> EngineResult<Vec<MigrationRecord>> {
        Ok(self.store.ledger(entity_id)?)
    }

    fn migrate_in(
        &self,
        conn: &Connection,
        entity: &EntityDefinition,
        commit_message: Option<&str>,
    ) -> EngineResult<Option<MigrationRecord>> {
        let module = module_of(conn, entity)?;
        let live_fields = fields::list_fields(conn, entity.id)?;
        let plan = self.migrator.plan(conn, entity, module.as_ref(), &live_fields)?;
        self.migrator.apply(conn, &plan, commit_message)
    }

    /// Migrates `entity_id` and, for every table rename that produces, the
    /// entities whose reference fields named the old table. Those fields are
    /// retargeted and their tables migrated in the same transaction; `held`
    /// lists entities the caller has already leased.
    fn migrate_with_referrers(
        &self,
        conn: &Connection,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
        held: &[EntityDefId],
    ) -> EngineResult<Vec<MigrationRecord>> {
        let mut leased: HashSet<EntityDefId> = held.iter().copied().collect();
        let mut leases: Vec<EntityLease> = Vec::new();
        let mut records = Vec::new();
        let mut queue = VecDeque::from([(entity_id, commit_message.map(String::from))]);
        while let Some((id, message)) = queue.pop_front() {
            let Some(record) = self.migrate_if_published(conn, id, message.as_deref())? else {
                continue;
            };
            for op in &record.upgrade {
                let MigrationOp::RenameTable { schema, from, to } = op else {
                    continue;
                };
                for referrer in retarget_references(conn, schema, from, to)? {
                    if leased.insert(referrer) {
                        leases.push(self.locks.acquire(referrer)?);
                    }
                    let message = format!("follow rename of {from} to {to}");
                    queue.push_back((referrer, Some(message)));
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    fn migrate_if_published(
        &self,
        conn: &Connection,
        entity_id: EntityDefId,
        commit_message: Option<&str>,
    ) -> EngineResult<Option<MigrationRecord>> {
        let entity = entities::require_entity(conn, entity_id)?;
        if !entity.is_published() {
            return Ok(None);
        }
        self.migrate_in(conn, &entity, commit_message)
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn create_lookup(&self, spec: &LookupSpec) -> EngineResult<LookupConfiguration> {
        self.check_lookup_source(spec)?;
        Ok(self.store.create_lookup(spec)?)
    }

    pub fn update_lookup(&self, lookup_id: LookupId, spec: &LookupSpec) -> EngineResult<LookupConfiguration> {
        self.check_lookup_source(spec)?;
        let lookup = self.store.update_lookup(lookup_id, spec)?;
        self.lookups.invalidate(lookup_id);
        Ok(lookup)
    }

    /// Deletes a lookup and every rule touching it.
    pub fn delete_lookup(&self, lookup_id: LookupId) -> EngineResult<()> {
        self.store.delete_lookup(lookup_id)?;
        self.lookups.forget(lookup_id);
        self.lookups.invalidate_all();
        Ok(())
    }

    fn check_lookup_source(&self, spec: &LookupSpec) -> EngineResult<()> {
        if let LookupSource::Entity { entity_id } = &spec.source {
            if self.store.entity(*entity_id).is_err() {
                return Err(EngineError::validation("entity_id", "no such entity"));
            }
        }
        Ok(())
    }

    /// Adds a parent → child rule. The cycle check and the insert share one
    /// immediate transaction, so concurrent rules cannot close a cycle.
    pub fn create_cascading_rule(
        &self,
        parent: LookupId,
        child: LookupId,
        filter_expression: &str,
    ) -> EngineResult<CascadingLookupRule> {
        validate_rule(parent, child, filter_expression)?;
        let rule = self.db.write(|tx| {
            lookups::require_lookup(tx, parent)?;
            lookups::require_lookup(tx, child)?;
            let graph = RuleGraph::from_rules(&lookups::list_rules(tx)?);
            if graph.would_cycle(parent, child) {
                return Err(EngineError::CyclicRule {
                    parent: parent.to_string(),
                    child: child.to_string(),
                });
            }
            Ok::<_, EngineError>(lookups::insert_rule(tx, parent, child, filter_expression, now_ms())?)
        })?;
        self.lookups.invalidate(child);
        info!(rule_id = %rule.id, parent = %parent, child = %child, "cascading rule created");
        Ok(rule)
    }

    pub fn delete_cascading_rule(&self, rule_id: RuleId) -> EngineResult<()> {
        let rule = self.db.write(|tx| lookups::delete_rule(tx, rule_id))?;
        self.lookups.invalidate(rule.child_lookup_id);
        Ok(())
    }

    pub fn resolve_options(
        &self,
        lookup_id: LookupId,
        request: &OptionsRequest,
    ) -> EngineResult<LookupPage> {
        self.db
            .read(|conn| self.lookups.resolve_options(conn, &self.config, lookup_id, request))
    }

    pub fn record_selection(&self, lookup_id: LookupId, session: &str, value: &str) -> EngineResult<()> {
        self.db
            .read(|conn| self.lookups.record_selection(conn, lookup_id, session, value))
    }

    /// Display labels for stored values of a reference field.
    pub fn resolve_display(
        &self,
        field_id: FieldId,
        values: &[String],
        caller: &CallerScope,
    ) -> EngineResult<BTreeMap<String, String>> {
        self.db.read(|conn| {
            let field = fields::require_field(conn, field_id)?;
            let entity = entities::require_entity(conn, field.entity_id)?;
            self.lookups
                .resolve_display(conn, &field, &entity.schema_name, values, caller)
        })
    }

    /// Lookups that cascade, directly or transitively, from `lookup_id`.
    pub fn dependents(&self, lookup_id: LookupId) -> EngineResult<Vec<LookupId>> {
        self.store.lookup(lookup_id)?;
        let graph = RuleGraph::from_rules(&self.store.rules()?);
        Ok(graph.descendants(lookup_id))
    }

    // ── Caches ───────────────────────────────────────────────────

    /// Counters of the entity → table cache.
    pub fn table_cache_stats(&self) -> CacheStats {
        self.resolver.stats()
    }

    /// Counters of the compiled-lookup cache.
    pub fn lookup_cache_stats(&self) -> CacheStats {
        self.lookups.stats()
    }

    /// Drops every cached resolution, e.g. after another process changed the
    /// metadata.
    pub fn clear_caches(&self) {
        self.resolver.clear();
        self.lookups.invalidate_all();
    }

    // ── Audit ────────────────────────────────────────────────────

    /// Audits one entity or all live entities.
    pub fn audit(&self, mode: AuditMode, only: Option<EntityDefId>) -> EngineResult<AuditReport> {
        let targets = match only {
            Some(id) => vec![self.store.entity(id)?],
            None => self.store.entities(false)?,
        };
        let mut entries = Vec::with_capacity(targets.len());
        for entity in targets {
            self.db.ensure_schema(&entity.schema_name)?;
            let mut entry = self
                .db
                .read(|conn| audit::inspect(conn, self.migrator.dialect(), &entity))?;
            if mode == AuditMode::Apply && entry.has_prefix_drift() {
                let _lease = self.locks.acquire(entity.id)?;
                let repaired = self.db.write(|tx| audit::repair_prefix(tx, entity.id))?;
                entry.repaired = repaired.is_some();
                self.resolver.invalidate_entity(entity.id);
            }
            entries.push(entry);
        }
        let report = AuditReport { mode, entries };
        info!(
            mode = ?mode,
            entities = report.entries.len(),
            problems = report.problem_count(),
            repaired = report.repaired_count(),
            "audit finished"
        );
        Ok(report)
    }
}

/// Points live reference fields in `schema` at `to` instead of `from`,
/// bumping each owning entity once. Returns the owning entities.
fn retarget_references(
    conn: &Connection,
    schema: &str,
    from: &str,
    to: &str,
) -> EngineResult<Vec<EntityDefId>> {
    let now = now_ms();
    let mut touched = Vec::new();
    for field in fields::list_referencing_fields(conn, from)? {
        let entity = match entities::get_entity(conn, field.entity_id)? {
            Some(entity) if !entity.is_deleted() && entity.schema_name == schema => entity,
            _ => continue,
        };
        let mut spec = field.spec.clone();
        spec.reference_table_name = Some(to.to_string());
        fields::update_field(conn, field.id, &spec, now)?;
        if !touched.contains(&entity.id) {
            entities::touch_entity(conn, entity.id, entity.version, now)?;
            touched.push(entity.id);
        }
        info!(entity_id = %entity.id, field = %spec.name, from, to, "reference retargeted");
    }
    Ok(touched)
}

fn module_of(conn: &Connection, entity: &EntityDefinition) -> EngineResult<Option<Module>> {
    Ok(entity
        .module_id
        .map(|id| modules::require_module(conn, id))
        .transpose()?)
}

/// No two live entities may resolve to the same physical table.
fn check_table_unique(
    conn: &Connection,
    entity: &EntityDefinition,
    module: Option<&Module>,
) -> EngineResult<()> {
    let mine = resolve_entity_table(entity, module)?;
    for other in entities::list_entities(conn, false)? {
        if other.id == entity.id {
            continue;
        }
        let other_module = module_of(conn, &other)?;
        let Ok(theirs) = resolve_entity_table(&other, other_module.as_ref()) else {
            continue;
        };
        if theirs == mine {
            return Err(EngineError::validation(
                "table_name",
                format!("table {mine} is already used by entity '{}'", other.name),
            ));
        }
    }
    Ok(())
}
