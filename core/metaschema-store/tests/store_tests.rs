mod common;

use metaschema_model::{
    ColumnDef, DataScope, EntityStatus, FieldSpec, LookupSpec, MigrationKind, MigrationOp,
    MigrationRecord, MigrationStep, NewEntity, NewFieldGroup, NewModule, TableShape,
};
use metaschema_store::{Database, MetadataStore, StoreError, edits, entities, ledger, lookups, now_ms};
use metaschema_types::{EntityDefId, MigrationId, ModuleId};
use pretty_assertions::assert_eq;

// ── Modules ──────────────────────────────────────────────────────

#[test]
fn module_roundtrip() {
    let store = common::store();
    let module = common::finance_module(&store);
    assert_eq!(store.module(module.id).unwrap(), module);
    assert_eq!(store.modules().unwrap().len(), 1);
}

#[test]
fn module_prefix_is_unique() {
    let store = common::store();
    common::finance_module(&store);
    let err = store
        .create_module(&NewModule::new("Fin 2").with_prefix("fin"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn stale_module_update_conflicts() {
    let store = common::store();
    let module = common::finance_module(&store);
    let db = store.database();
    let renamed = db
        .write(|tx| {
            metaschema_store::modules::update_module(
                tx,
                module.id,
                &NewModule::new("Accounting").with_prefix("acc"),
                module.version,
                now_ms(),
            )
        })
        .unwrap();
    assert_eq!(renamed.version, module.version + 1);
    let err = db
        .write(|tx| {
            metaschema_store::modules::update_module(
                tx,
                module.id,
                &NewModule::new("Again"),
                module.version,
                now_ms(),
            )
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
}

// ── Entities ─────────────────────────────────────────────────────

#[test]
fn entity_starts_as_draft() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    assert_eq!(entity.status, EntityStatus::Draft);
    assert_eq!(entity.schema_name, "main");
    assert_eq!(entity.version, 1);
    assert_eq!(store.entity(entity.id).unwrap(), entity);
}

#[test]
fn entity_requires_existing_module() {
    let store = common::store();
    let err = store
        .create_entity(&NewEntity::new("X", "xs", DataScope::Tenant).in_module(ModuleId::new()))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn soft_deleted_entity_is_hidden() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    store
        .database()
        .write(|tx| entities::soft_delete_entity(tx, entity.id, entity.version, now_ms()))
        .unwrap();
    assert!(matches!(store.entity(entity.id), Err(StoreError::NotFound { .. })));
    assert!(store.entities(false).unwrap().is_empty());
    assert_eq!(store.entities(true).unwrap().len(), 1);
}

#[test]
fn missing_entity_is_not_found() {
    let store = common::store();
    assert!(matches!(store.entity(EntityDefId::new()), Err(StoreError::NotFound { .. })));
}

#[test]
fn entity_in_other_schema_attaches_it() {
    let store = common::store();
    let entity = store
        .create_entity(&NewEntity::new("Lead", "leads", DataScope::Tenant).in_schema("crm"))
        .unwrap();
    assert_eq!(entity.schema_name, "crm");
    let attached = store
        .database()
        .read(|conn| metaschema_store::attached_schemas(conn))
        .unwrap();
    assert!(attached.contains(&"crm".to_string()));
}

// ── Fields ───────────────────────────────────────────────────────

#[test]
fn field_edits_bump_entity_version() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);

    let added = store
        .add_draft_field(entity.id, &FieldSpec::string("number", 32).required(), entity.version)
        .unwrap();
    assert_eq!(added.entity_version, entity.version + 1);
    assert_eq!(store.entity(entity.id).unwrap().version, added.entity_version);

    let err = store
        .add_draft_field(entity.id, &FieldSpec::date("due_date"), entity.version)
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
    assert_eq!(store.fields(entity.id).unwrap().len(), 1);
}

#[test]
fn duplicate_field_name_is_a_validation_error() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    let first = store
        .add_draft_field(entity.id, &FieldSpec::string("number", 32), entity.version)
        .unwrap();
    let err = store
        .add_draft_field(entity.id, &FieldSpec::integer("number"), first.entity_version)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    // rolled back: version unchanged
    assert_eq!(store.entity(entity.id).unwrap().version, first.entity_version);
}

#[test]
fn removed_field_name_can_be_reused() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    let added = store
        .add_draft_field(entity.id, &FieldSpec::string("number", 32), entity.version)
        .unwrap();
    let removed = store
        .database()
        .write(|tx| edits::remove_field(tx, added.record.id, added.entity_version, now_ms()))
        .unwrap();
    assert!(store.fields(entity.id).unwrap().is_empty());
    store
        .add_draft_field(entity.id, &FieldSpec::integer("number"), removed.entity_version)
        .unwrap();
}

#[test]
fn dependency_blocks_removal() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    let country = store
        .add_draft_field(entity.id, &FieldSpec::reference("country", "countries"), entity.version)
        .unwrap();
    let state = store
        .add_draft_field(
            entity.id,
            &FieldSpec::reference("state", "states").depends_on("country", "country_code = '{country}'"),
            country.entity_version,
        )
        .unwrap();
    let err = store
        .database()
        .write(|tx| edits::remove_field(tx, country.record.id, state.entity_version, now_ms()))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn fields_are_ordered_by_display_order() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    let a = store
        .add_draft_field(entity.id, &FieldSpec::text("memo").ordered(5), entity.version)
        .unwrap();
    store
        .add_draft_field(entity.id, &FieldSpec::string("number", 32).ordered(1), a.entity_version)
        .unwrap();
    let names: Vec<String> = store
        .fields(entity.id)
        .unwrap()
        .into_iter()
        .map(|f| f.spec.name)
        .collect();
    assert_eq!(names, vec!["number", "memo"]);
}

#[test]
fn group_must_belong_to_entity() {
    let store = common::store();
    let module = common::finance_module(&store);
    let invoice = common::invoice(&store, &module);
    let other = store
        .create_entity(&NewEntity::new("Payment", "payments", DataScope::Tenant))
        .unwrap();
    let group = store
        .add_group(other.id, &NewFieldGroup::new("General", 0), other.version)
        .unwrap();
    let err = store
        .add_draft_field(
            invoice.id,
            &FieldSpec::text("memo").in_group(group.record.id),
            invoice.version,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn deleting_group_ungroups_fields() {
    let store = common::store();
    let module = common::finance_module(&store);
    let entity = common::invoice(&store, &module);
    let group = store
        .add_group(entity.id, &NewFieldGroup::new("Billing", 1).collapsible(false), entity.version)
        .unwrap();
    let field = store
        .add_draft_field(entity.id, &FieldSpec::text("memo").in_group(group.record.id), group.entity_version)
        .unwrap();
    store.delete_group(group.record.id, field.entity_version).unwrap();
    assert!(store.groups(entity.id).unwrap().is_empty());
    assert_eq!(store.field(field.record.id).unwrap().spec.field_group_id, None);
}

// ── Lookups ──────────────────────────────────────────────────────

#[test]
fn duplicate_rule_is_rejected() {
    let store = common::store();
    let country = store
        .create_lookup(&LookupSpec::for_table("Countries", "countries", "{name}"))
        .unwrap();
    let state = store
        .create_lookup(&LookupSpec::for_table("States", "states", "{name}"))
        .unwrap();
    let db = store.database();
    db.write(|tx| lookups::insert_rule(tx, country.id, state.id, "country_code = {country}", now_ms()))
        .unwrap();
    let err = db
        .write(|tx| lookups::insert_rule(tx, country.id, state.id, "x = {y}", now_ms()))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.rules_for_child(state.id).unwrap().len(), 1);
}

#[test]
fn deleting_lookup_drops_its_rules() {
    let store = common::store();
    let country = store
        .create_lookup(&LookupSpec::for_table("Countries", "countries", "{name}"))
        .unwrap();
    let state = store
        .create_lookup(&LookupSpec::for_table("States", "states", "{name}"))
        .unwrap();
    store
        .database()
        .write(|tx| lookups::insert_rule(tx, country.id, state.id, "country_code = {country}", now_ms()))
        .unwrap();
    store.delete_lookup(country.id).unwrap();
    assert!(store.rules().unwrap().is_empty());
}

// ── Ledger ───────────────────────────────────────────────────────

fn record(entity_id: EntityDefId, parents: Vec<MigrationId>) -> MigrationRecord {
    let mut shape = TableShape::new("main", "fin_invoices");
    shape.columns.push(ColumnDef::new("id", "TEXT").primary_key());
    let steps = vec![MigrationStep::new(MigrationOp::CreateTable { shape: shape.clone() })];
    let (upgrade, downgrade) = MigrationRecord::split_steps(&steps);
    MigrationRecord {
        id: MigrationId::new(),
        entity_id,
        parents,
        kind: MigrationKind::Schema,
        upgrade,
        downgrade,
        shape: Some(shape),
        commit_message: Some("initial".into()),
        applied_at: now_ms(),
    }
}

#[test]
fn ledger_preserves_order_and_content() {
    let store = common::store();
    let entity_id = EntityDefId::new();
    let first = record(entity_id, vec![]);
    let second = record(entity_id, vec![first.id]);
    let db = store.database();
    db.write(|tx| ledger::append(tx, &first)).unwrap();
    db.write(|tx| ledger::append(tx, &second)).unwrap();
    assert_eq!(store.ledger(entity_id).unwrap(), vec![first.clone(), second]);
    assert_eq!(db.read(|conn| ledger::get_record(conn, first.id)).unwrap(), Some(first));
}

#[test]
fn ledger_is_append_only() {
    let store = common::store();
    let entry = record(EntityDefId::new(), vec![]);
    let db = store.database();
    db.write(|tx| ledger::append(tx, &entry)).unwrap();
    let update = db.write(|tx| {
        tx.execute("UPDATE meta_migrations SET commit_message = 'edited'", [])
            .map_err(StoreError::from)
    });
    assert!(update.is_err());
    let delete = db.write(|tx| {
        tx.execute("DELETE FROM meta_migrations", [])
            .map_err(StoreError::from)
    });
    assert!(delete.is_err());
    assert_eq!(store.ledger(entry.entity_id).unwrap().len(), 1);
}

// ── Files ────────────────────────────────────────────────────────

#[test]
fn file_database_reattaches_schemas() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.db");
    {
        let store = MetadataStore::new(Database::open(&path).unwrap());
        store
            .create_entity(&NewEntity::new("Lead", "leads", DataScope::Tenant).in_schema("crm"))
            .unwrap();
    }
    let db = Database::open(&path).unwrap();
    let attached = db.read(|conn| metaschema_store::attached_schemas(conn)).unwrap();
    assert!(attached.contains(&"crm".to_string()));
}
