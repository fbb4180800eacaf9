mod common;

use metaschema_engine::{
    AuditMode, DenialReason, EngineConfig, EngineError, OptionsRequest, Problem, ResolvedTable,
    ScopeDecision,
};
use metaschema_model::{
    CallerScope, DataScope, EntityStatus, FieldSpec, LookupSpec, MigrationKind, MigrationOp,
    MigrationRecord, NewEntity, NewModule,
};
use metaschema_store::StoreError;
use metaschema_types::{MigrationId, TenantId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

// ── Table resolution ─────────────────────────────────────────────

#[test]
fn module_prefix_is_applied_to_the_physical_table() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let resolved = engine.resolve_table(invoice.id).unwrap();
    assert_eq!(resolved, ResolvedTable::new("main", "fin_invoices"));
    assert_eq!(resolved.to_string(), "main.fin_invoices");
    assert_eq!(
        common::columns(&engine, "fin_invoices"),
        ["id", "tenant_id", "number", "amount"]
    );
}

#[test]
fn changing_the_module_prefix_renames_published_tables() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    assert_eq!(engine.resolve_table(invoice.id).unwrap().table, "fin_invoices");

    let change = engine
        .update_module(module.id, &NewModule::new("Accounting").with_prefix("acc"), module.version)
        .unwrap();
    assert_eq!(change.module.table_prefix.as_deref(), Some("acc"));
    assert_eq!(change.migrations.len(), 1);
    assert!(matches!(
        &change.migrations[0].upgrade[0],
        MigrationOp::RenameTable { from, to, .. } if from == "fin_invoices" && to == "acc_invoices"
    ));

    assert_eq!(engine.resolve_table(invoice.id).unwrap().table, "acc_invoices");
    assert!(common::columns(&engine, "fin_invoices").is_empty());
    assert_eq!(common::columns(&engine, "acc_invoices").len(), 4);
}

#[test]
fn renaming_a_referenced_table_retargets_its_references() {
    let engine = common::engine();
    let customers = common::published(
        &engine,
        &NewEntity::new("Customer", "customers", DataScope::Platform),
        &[FieldSpec::string("name", 80).required()],
    );
    let orders = common::published(
        &engine,
        &NewEntity::new("Order", "orders", DataScope::Platform),
        &[FieldSpec::reference("customer_id", "customers"), FieldSpec::integer("qty")],
    );

    let change = engine
        .update_entity(
            customers.id,
            &NewEntity::new("Customer", "clients", DataScope::Platform),
            customers.version,
        )
        .unwrap();
    assert!(matches!(
        &change.migration.as_ref().unwrap().upgrade[0],
        MigrationOp::RenameTable { from, to, .. } if from == "customers" && to == "clients"
    ));
    assert_eq!(change.referrers.len(), 1);
    assert_eq!(change.referrers[0].entity_id, orders.id);

    let fields = engine.fields(orders.id).unwrap();
    let customer_id = fields.iter().find(|f| f.name() == "customer_id").unwrap();
    assert_eq!(customer_id.spec.reference_table_name.as_deref(), Some("clients"));
    let orders_now = engine.entity(orders.id).unwrap();
    assert_eq!(orders_now.version, orders.version + 1);
    assert!(engine.audit(AuditMode::DryRun, None).unwrap().is_clean());

    // a later rebuild of orders keeps a working foreign key
    let qty = fields.iter().find(|f| f.name() == "qty").unwrap();
    engine
        .update_field(
            qty.id,
            &FieldSpec::integer("qty").required().with_default(json!(1)),
            orders_now.version,
        )
        .unwrap();
    common::exec(
        &engine,
        "INSERT INTO clients (id, name) VALUES ('c1', 'Acme');
         INSERT INTO orders (id, customer_id, qty) VALUES ('o1', 'c1', 2);",
    );
    assert_eq!(common::count(&engine, "SELECT COUNT(*) FROM orders"), 1);
    assert!(engine.audit(AuditMode::DryRun, None).unwrap().is_clean());
}

#[test]
fn module_rename_retargets_references_from_other_modules() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let payments = common::published(
        &engine,
        &NewEntity::new("Payment", "payments", DataScope::Tenant),
        &[FieldSpec::reference("invoice_id", "fin_invoices")],
    );

    let change = engine
        .update_module(module.id, &NewModule::new("Accounting").with_prefix("acc"), module.version)
        .unwrap();
    assert_eq!(change.migrations.len(), 2);
    assert_eq!(change.migrations[0].entity_id, invoice.id);
    assert_eq!(change.migrations[1].entity_id, payments.id);

    let field = engine.fields(payments.id).unwrap().remove(0);
    assert_eq!(field.spec.reference_table_name.as_deref(), Some("acc_invoices"));
}

#[test]
fn two_entities_cannot_share_a_table() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    common::draft_invoice(&engine, &module);

    // "fin_invoices" already carries the prefix, so it resolves to the same table
    let err = engine
        .create_entity(
            &NewEntity::new("Invoice copy", "fin_invoices", DataScope::Tenant).in_module(module.id),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
}

#[test]
fn unknown_module_is_a_validation_error() {
    let engine = common::engine();
    let err = engine
        .create_entity(
            &NewEntity::new("Invoice", "invoices", DataScope::Tenant)
                .in_module(metaschema_types::ModuleId::new()),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Publishing and migrations ────────────────────────────────────

#[test]
fn adding_a_field_migrates_with_one_add_column() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let change = engine
        .add_field(invoice.id, &FieldSpec::date("due_date"), invoice.version)
        .unwrap();
    assert_eq!(change.entity_version, invoice.version + 1);
    let record = change.migration.expect("published entity migrates");
    assert_eq!(record.kind, MigrationKind::Schema);
    assert_eq!(record.upgrade.len(), 1);
    assert!(matches!(
        &record.upgrade[0],
        MigrationOp::AddColumn { column } if column.name == "due_date" && column.sql_type == "DATE"
    ));
    assert!(common::columns(&engine, "fin_invoices").contains(&"due_date".to_string()));

    // converged: nothing left to do
    assert!(engine.plan_migration(invoice.id).unwrap().is_empty());
    assert_eq!(engine.migrate(invoice.id, None).unwrap(), None);
    assert_eq!(engine.ledger(invoice.id).unwrap().len(), 2);
}

#[test]
fn draft_edits_do_not_touch_the_database() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let draft = common::draft_invoice(&engine, &module);

    let change = engine
        .add_field(draft.id, &FieldSpec::date("due_date"), draft.version)
        .unwrap();
    assert_eq!(change.migration, None);
    assert!(common::columns(&engine, "fin_invoices").is_empty());
    assert!(engine.ledger(draft.id).unwrap().is_empty());

    // the plan is still available as a preview
    let plan = engine.plan_migration(draft.id).unwrap();
    assert!(matches!(plan.steps[0].op, MigrationOp::CreateTable { .. }));
}

#[test]
fn publishing_without_fields_fails_and_records_nothing() {
    let engine = common::engine();
    let entity = engine
        .create_entity(&NewEntity::new("Empty", "empties", DataScope::Tenant))
        .unwrap();

    let err = engine.publish_entity(entity.id, entity.version, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
    assert!(engine.ledger(entity.id).unwrap().is_empty());
    assert_eq!(engine.entity(entity.id).unwrap().status, EntityStatus::Draft);
    assert!(common::columns(&engine, "empties").is_empty());
}

#[test]
fn publishing_twice_is_rejected() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let err = engine
        .publish_entity(invoice.id, invoice.version, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn stale_version_is_a_conflict() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let err = engine
        .add_field(invoice.id, &FieldSpec::text("notes"), invoice.version - 1)
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");

    let update = NewEntity::new("Invoice", "invoices", DataScope::Company).in_module(module.id);
    let err = engine
        .update_entity(invoice.id, &update, invoice.version - 1)
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(engine.fields(invoice.id).unwrap().len(), 2);
}

#[test]
fn finer_scope_adds_partition_columns() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let update = NewEntity::new("Invoice", "invoices", DataScope::Company).in_module(module.id);
    let change = engine.update_entity(invoice.id, &update, invoice.version).unwrap();
    assert_eq!(change.entity.data_scope, DataScope::Company);
    assert!(change.migration.is_some());
    assert!(common::columns(&engine, "fin_invoices").contains(&"company_id".to_string()));
}

#[test]
fn removing_a_field_drops_its_column() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let amount = engine
        .fields(invoice.id)
        .unwrap()
        .into_iter()
        .find(|f| f.name() == "amount")
        .unwrap();

    let change = engine.remove_field(amount.id, invoice.version).unwrap();
    assert!(change.field.is_deleted());
    assert!(matches!(
        &change.migration.unwrap().upgrade[0],
        MigrationOp::DropColumn { column } if column.name == "amount"
    ));
    assert_eq!(common::columns(&engine, "fin_invoices"), ["id", "tenant_id", "number"]);
}

// ── Existing columns ─────────────────────────────────────────────

#[test]
fn incompatible_existing_column_is_a_schema_conflict() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    common::exec(&engine, "ALTER TABLE fin_invoices ADD COLUMN due_date INTEGER");

    let err = engine
        .add_field(invoice.id, &FieldSpec::date("due_date"), invoice.version)
        .unwrap_err();
    match &err {
        EngineError::SchemaConflict { table, column, .. } => {
            assert_eq!(table, "fin_invoices");
            assert_eq!(column, "due_date");
        }
        other => panic!("expected a schema conflict, got {other:?}"),
    }
    let reference = err.correlation_id().unwrap().to_string();
    assert!(err.user_message().contains(&reference));
    assert!(!err.user_message().contains("due_date"));

    // the field edit rolled back with the DDL
    assert_eq!(engine.fields(invoice.id).unwrap().len(), 2);
    assert_eq!(engine.ledger(invoice.id).unwrap().len(), 1);
}

#[test]
fn compatible_existing_column_is_adopted() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    common::exec(&engine, "ALTER TABLE fin_invoices ADD COLUMN notes TEXT");

    let change = engine
        .add_field(invoice.id, &FieldSpec::text("notes"), invoice.version)
        .unwrap();
    assert_eq!(change.migration, None);
    assert_eq!(change.field.name(), "notes");
}

#[test]
fn existing_table_without_history_is_adopted_on_publish() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    common::exec(
        &engine,
        "CREATE TABLE fin_invoices (id TEXT PRIMARY KEY, tenant_id TEXT NOT NULL,
             number VARCHAR(32) NOT NULL, amount TEXT)",
    );
    let draft = common::draft_invoice(&engine, &module);

    let err = engine.publish_entity(draft.id, draft.version, None).unwrap_err();
    assert!(
        matches!(&err, EngineError::SchemaConflict { column, .. } if column == "amount"),
        "{err:?}"
    );
    assert_eq!(engine.entity(draft.id).unwrap().status, EntityStatus::Draft);
}

// ── Failure atomicity ────────────────────────────────────────────

#[test]
fn timed_out_publish_leaves_nothing_behind() {
    let config = EngineConfig {
        migration_timeout_ms: 0,
        ..EngineConfig::default()
    };
    let engine = common::engine_with(config);
    let module = common::finance_module(&engine);
    let draft = common::draft_invoice(&engine, &module);

    let err = engine.publish_entity(draft.id, draft.version, None).unwrap_err();
    match err {
        EngineError::Migration { step, ref op, .. } => {
            assert_eq!(step, 0);
            assert_eq!(op, "create_table");
        }
        other => panic!("expected a migration error, got {other:?}"),
    }
    assert!(common::columns(&engine, "fin_invoices").is_empty());
    assert!(engine.ledger(draft.id).unwrap().is_empty());
    assert_eq!(engine.entity(draft.id).unwrap().version, draft.version);
}

#[test]
fn failing_rebuild_rolls_back_field_and_table() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    common::exec(
        &engine,
        "INSERT INTO fin_invoices (id, tenant_id, number, amount) VALUES ('i1', 't1', 'INV-1', 10.5)",
    );

    // NOT NULL without a default cannot be filled for the existing row
    let err = engine
        .add_field(invoice.id, &FieldSpec::string("customer_code", 16).required(), invoice.version)
        .unwrap_err();
    assert!(matches!(err, EngineError::Migration { .. }), "{err:?}");

    assert_eq!(engine.fields(invoice.id).unwrap().len(), 2);
    assert_eq!(engine.entity(invoice.id).unwrap().version, invoice.version);
    assert_eq!(common::columns(&engine, "fin_invoices"), ["id", "tenant_id", "number", "amount"]);
    assert_eq!(common::count(&engine, "SELECT COUNT(*) FROM fin_invoices"), 1);
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn second_writer_on_a_busy_entity_conflicts() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::draft_invoice(&engine, &module);
    let engine = &engine;
    let (parked_tx, parked) = mpsc::channel::<()>();
    let (release, released) = mpsc::channel::<()>();

    thread::scope(|s| {
        // hold the database so the next writer waits while owning its lease
        s.spawn(move || {
            engine
                .database()
                .write(|_| {
                    parked_tx.send(()).unwrap();
                    let _ = released.recv_timeout(Duration::from_secs(5));
                    Ok::<_, StoreError>(())
                })
                .unwrap();
        });
        parked.recv().unwrap();
        let writer = s.spawn(move || {
            engine.add_field(invoice.id, &FieldSpec::date("due_date"), invoice.version)
        });
        thread::sleep(Duration::from_millis(200));

        let err = engine
            .publish_entity(invoice.id, invoice.version, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");
        release.send(()).unwrap();

        let change = writer.join().unwrap().unwrap();
        assert_eq!(change.field.name(), "due_date");
    });

    // the lease is released once the writer finishes
    let entity = engine.entity(invoice.id).unwrap();
    engine.publish_entity(entity.id, entity.version, None).unwrap();
}

// ── Ledger ───────────────────────────────────────────────────────

#[test]
fn revert_applies_the_head_downgrade() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    engine
        .add_field(invoice.id, &FieldSpec::date("due_date"), invoice.version)
        .unwrap();

    let record = engine.revert_last_migration(invoice.id, None).unwrap();
    assert_eq!(record.kind, MigrationKind::Revert);
    assert!(matches!(
        &record.upgrade[0],
        MigrationOp::DropColumn { column } if column.name == "due_date"
    ));
    assert!(!common::columns(&engine, "fin_invoices").contains(&"due_date".to_string()));
    assert_eq!(engine.ledger(invoice.id).unwrap().len(), 3);
}

#[test]
fn reverting_the_create_returns_the_entity_to_draft() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let record = engine.revert_last_migration(invoice.id, Some("undo publish")).unwrap();
    assert_eq!(record.shape, None);
    assert_eq!(record.commit_message.as_deref(), Some("undo publish"));
    assert!(common::columns(&engine, "fin_invoices").is_empty());

    let entity = engine.entity(invoice.id).unwrap();
    assert_eq!(entity.status, EntityStatus::Draft);

    // publishing again recreates the table on top of the revert
    engine.publish_entity(entity.id, entity.version, None).unwrap();
    assert_eq!(common::columns(&engine, "fin_invoices").len(), 4);
    assert_eq!(engine.ledger(invoice.id).unwrap().len(), 3);
}

#[test]
fn divergent_heads_block_planning_until_merged() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let created = engine.ledger(invoice.id).unwrap().remove(0);
    engine
        .add_field(invoice.id, &FieldSpec::date("due_date"), invoice.version)
        .unwrap();

    // a sibling of the second record, as produced by another deployment
    let sibling = MigrationRecord {
        id: MigrationId::new(),
        entity_id: invoice.id,
        parents: vec![created.id],
        kind: MigrationKind::Schema,
        upgrade: Vec::new(),
        downgrade: Vec::new(),
        shape: created.shape.clone(),
        commit_message: Some("hotfix".into()),
        applied_at: created.applied_at,
    };
    engine.import_migration(&sibling).unwrap();

    let err = engine.plan_migration(invoice.id).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");

    let merge = engine.merge_heads(invoice.id, Some("merge hotfix")).unwrap();
    assert_eq!(merge.kind, MigrationKind::Merge);
    assert_eq!(merge.parents.len(), 2);
    assert_eq!(merge.parents[1], sibling.id);

    // the merged shape lacks due_date, but the live column is taken over
    let plan = engine.plan_migration(invoice.id).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.adopted, ["due_date"]);
}

#[test]
fn import_rejects_unknown_parents() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let mut record = engine.ledger(invoice.id).unwrap().remove(0);
    record.id = MigrationId::new();
    record.parents = vec![MigrationId::new()];

    let err = engine.import_migration(&record).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn stale_plan_is_refused() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    let plan = engine.plan_migration(invoice.id).unwrap();
    assert!(plan.is_empty());

    // the ledger moves on after the plan was computed
    engine
        .add_field(invoice.id, &FieldSpec::text("notes"), invoice.version)
        .unwrap();
    let err = engine.apply_migration(&plan, None).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");
}

// ── Scope ────────────────────────────────────────────────────────

#[test]
fn platform_entities_are_unrestricted() {
    let engine = common::engine();
    let currency = engine
        .create_entity(&NewEntity::new("Currency", "currencies", DataScope::Platform))
        .unwrap();
    let decision = engine.check_scope(currency.id, &CallerScope::none()).unwrap();
    match decision {
        ScopeDecision::Allowed { predicate } => assert!(predicate.is_unrestricted()),
        denied => panic!("expected access, got {denied:?}"),
    }
}

#[test]
fn department_entities_need_the_full_chain() {
    let engine = common::engine();
    let expense = engine
        .create_entity(&NewEntity::new("Expense", "expenses", DataScope::Department))
        .unwrap();
    let tenant = TenantId::new();

    let partial = CallerScope::tenant(tenant).with_company(metaschema_types::CompanyId::new());
    assert_eq!(
        engine.check_scope(expense.id, &partial).unwrap(),
        ScopeDecision::Denied {
            reason: DenialReason::MissingBranch
        }
    );

    let department = metaschema_types::DepartmentId::new();
    let full = partial
        .with_branch(metaschema_types::BranchId::new())
        .with_department(department);
    let ScopeDecision::Allowed { predicate } = engine.check_scope(expense.id, &full).unwrap() else {
        panic!("full chain should be allowed");
    };
    let (sql, params) = predicate.to_sql(None);
    assert_eq!(sql, "\"tenant_id\" = ? AND \"department_id\" = ?");
    assert_eq!(params.len(), 2);
}

// ── Lookups ──────────────────────────────────────────────────────

fn geography(engine: &metaschema_engine::SchemaEngine) -> (metaschema_types::LookupId, metaschema_types::LookupId) {
    common::seed_geography(engine);
    let countries = engine
        .create_lookup(
            &LookupSpec::for_table("Countries", "countries", "{name}")
                .with_value_field("code")
                .with_recents(2),
        )
        .unwrap();
    let states = engine
        .create_lookup(
            &LookupSpec::for_table("States", "states", "{name}")
                .with_value_field("code")
                .filtered_by("country_code"),
        )
        .unwrap();
    (countries.id, states.id)
}

fn values(page: &metaschema_engine::LookupPage) -> Vec<&str> {
    page.items.iter().map(|o| o.value.as_str()).collect()
}

#[test]
fn cascading_rule_filters_child_options() {
    let engine = common::engine();
    let (countries, states) = geography(&engine);
    engine
        .create_cascading_rule(countries, states, "country_code = '{country}'")
        .unwrap();

    let page = engine
        .resolve_options(states, &OptionsRequest::new(CallerScope::none()).under("US"))
        .unwrap();
    assert_eq!(values(&page), ["US-CA", "US-NY", "US-TX"]);
    assert_eq!(page.total, 3);
    assert_eq!(page.items[1].display, "New York");

    // rows added later still sort into place
    common::exec(&engine, "INSERT INTO states VALUES ('US-AL', 'Alabama', 'US')");
    let page = engine
        .resolve_options(states, &OptionsRequest::new(CallerScope::none()).under("US"))
        .unwrap();
    assert_eq!(values(&page), ["US-AL", "US-CA", "US-NY", "US-TX"]);
}

#[test]
fn filter_field_applies_once_the_rule_is_gone() {
    let engine = common::engine();
    let (countries, states) = geography(&engine);
    let rule = engine
        .create_cascading_rule(countries, states, "country_code = '{country}'")
        .unwrap();
    engine.delete_cascading_rule(rule.id).unwrap();

    let page = engine
        .resolve_options(states, &OptionsRequest::new(CallerScope::none()).under("CA"))
        .unwrap();
    assert_eq!(values(&page), ["CA-ON", "CA-QC"]);
}

#[test]
fn search_matches_template_fields() {
    let engine = common::engine();
    let (_, states) = geography(&engine);
    let page = engine
        .resolve_options(states, &OptionsRequest::new(CallerScope::none()).search("new"))
        .unwrap();
    assert_eq!(values(&page), ["US-NY"]);
    assert_eq!(page.total, 1);
}

#[test]
fn rules_that_close_a_cycle_are_rejected() {
    let engine = common::engine();
    let (countries, states) = geography(&engine);
    common::exec(&engine, "CREATE TABLE cities (code TEXT PRIMARY KEY, name TEXT, state_code TEXT)");
    let cities = engine
        .create_lookup(&LookupSpec::for_table("Cities", "cities", "{name}").with_value_field("code"))
        .unwrap();

    engine
        .create_cascading_rule(countries, states, "country_code = '{country}'")
        .unwrap();
    engine
        .create_cascading_rule(states, cities.id, "state_code = '{state}'")
        .unwrap();
    let err = engine
        .create_cascading_rule(cities.id, countries, "code = '{city}'")
        .unwrap_err();
    assert!(matches!(err, EngineError::CyclicRule { .. }), "{err:?}");

    let err = engine
        .create_cascading_rule(states, states, "code = '{x}'")
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert_eq!(engine.dependents(countries).unwrap(), [states, cities.id]);
}

#[test]
fn recent_selections_come_first() {
    let engine = common::engine();
    let (countries, _) = geography(&engine);
    engine.record_selection(countries, "s1", "FR").unwrap();
    engine.record_selection(countries, "s1", "DE").unwrap();

    let request = OptionsRequest::new(CallerScope::none()).for_session("s1");
    let first = engine
        .resolve_options(countries, &request.clone().page(1, 3))
        .unwrap();
    assert_eq!(values(&first), ["DE", "FR", "BR"]);
    assert!(first.items[0].recent && first.items[1].recent && !first.items[2].recent);
    assert_eq!(first.total, 5);

    let second = engine.resolve_options(countries, &request.page(2, 3)).unwrap();
    assert_eq!(values(&second), ["CA", "US"]);

    // searching hides recents
    let searched = engine
        .resolve_options(
            countries,
            &OptionsRequest::new(CallerScope::none()).for_session("s1").search("an"),
        )
        .unwrap();
    assert!(searched.items.iter().all(|o| !o.recent));
    assert_eq!(values(&searched), ["CA", "FR", "DE"]);
}

#[test]
fn recent_sessions_are_bounded() {
    let engine = common::engine_with(EngineConfig {
        max_recent_sessions: 1,
        ..EngineConfig::default()
    });
    let (countries, _) = geography(&engine);
    engine.record_selection(countries, "s1", "FR").unwrap();
    engine.record_selection(countries, "s2", "DE").unwrap();

    let first = |session: &str| {
        engine
            .resolve_options(countries, &OptionsRequest::new(CallerScope::none()).for_session(session))
            .unwrap()
            .items
            .remove(0)
    };
    assert!(!first("s1").recent);
    let latest = first("s2");
    assert!(latest.recent);
    assert_eq!(latest.value, "DE");
}

#[test]
fn entity_lookups_apply_the_caller_scope() {
    let engine = common::engine();
    let customers = engine
        .create_entity(&NewEntity::new("Customer", "customers", DataScope::Tenant))
        .unwrap();
    let change = engine
        .add_field(customers.id, &FieldSpec::string("name", 80).required(), customers.version)
        .unwrap();
    engine
        .publish_entity(customers.id, change.entity_version, None)
        .unwrap();

    let (ours, theirs) = (TenantId::new(), TenantId::new());
    common::exec(
        &engine,
        &format!(
            "INSERT INTO customers (id, tenant_id, name) VALUES
                 ('c1', '{ours}', 'Acme'), ('c2', '{ours}', 'Globex'), ('c3', '{theirs}', 'Initech')"
        ),
    );
    let lookup = engine
        .create_lookup(&LookupSpec::for_entity("Customers", customers.id, "{name}"))
        .unwrap();

    let page = engine
        .resolve_options(lookup.id, &OptionsRequest::new(CallerScope::tenant(ours)))
        .unwrap();
    assert_eq!(values(&page), ["c1", "c2"]);

    let err = engine
        .resolve_options(lookup.id, &OptionsRequest::new(CallerScope::none()))
        .unwrap_err();
    assert!(matches!(err, EngineError::Denied(DenialReason::MissingTenant)));

    // display labels for a reference field backed by the lookup
    let orders = engine
        .create_entity(&NewEntity::new("Order", "orders", DataScope::Tenant))
        .unwrap();
    let field = engine
        .add_field(
            orders.id,
            &FieldSpec::reference("customer_id", "customers").with_lookup(lookup.id),
            orders.version,
        )
        .unwrap()
        .field;
    let labels = engine
        .resolve_display(
            field.id,
            &["c1".to_string(), "c3".to_string()],
            &CallerScope::tenant(ours),
        )
        .unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels["c1"], "Acme");
}

#[test]
fn reference_labels_without_a_lookup_apply_the_owner_scope() {
    let engine = common::engine();
    common::published(
        &engine,
        &NewEntity::new("Customer", "customers", DataScope::Tenant),
        &[FieldSpec::string("name", 80).required()],
    );
    let (ours, theirs) = (TenantId::new(), TenantId::new());
    common::exec(
        &engine,
        &format!(
            "INSERT INTO customers (id, tenant_id, name) VALUES
                 ('c1', '{ours}', 'Acme'), ('c3', '{theirs}', 'Initech')"
        ),
    );
    let orders = engine
        .create_entity(&NewEntity::new("Order", "orders", DataScope::Tenant))
        .unwrap();
    let field = engine
        .add_field(
            orders.id,
            &FieldSpec::reference("customer_id", "customers").displaying("name"),
            orders.version,
        )
        .unwrap()
        .field;
    let wanted = ["c1".to_string(), "c3".to_string()];

    let labels = engine
        .resolve_display(field.id, &wanted, &CallerScope::tenant(ours))
        .unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels["c1"], "Acme");

    let err = engine
        .resolve_display(field.id, &wanted, &CallerScope::none())
        .unwrap_err();
    assert!(matches!(err, EngineError::Denied(DenialReason::MissingTenant)));
}

#[test]
fn draft_entity_lookup_has_no_options() {
    let engine = common::engine();
    let customers = engine
        .create_entity(&NewEntity::new("Customer", "customers", DataScope::Tenant))
        .unwrap();
    let lookup = engine
        .create_lookup(&LookupSpec::for_entity("Customers", customers.id, "{id}"))
        .unwrap();
    let err = engine
        .resolve_options(lookup.id, &OptionsRequest::new(CallerScope::tenant(TenantId::new())))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Audit ────────────────────────────────────────────────────────

#[test]
fn dry_run_reports_prefix_drift_and_apply_repairs_it() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    let report = engine.audit(AuditMode::DryRun, None).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(
        report.entries[0].problems,
        [Problem::PrefixDrift {
            stored: "invoices".into(),
            resolved: "fin_invoices".into()
        }]
    );
    assert_eq!(report.repaired_count(), 0);
    assert_eq!(engine.entity(invoice.id).unwrap().table_name, "invoices");

    let report = engine.audit(AuditMode::Apply, Some(invoice.id)).unwrap();
    assert_eq!(report.repaired_count(), 1);
    assert_eq!(engine.entity(invoice.id).unwrap().table_name, "fin_invoices");
    assert_eq!(engine.resolve_table(invoice.id).unwrap().table, "fin_invoices");

    assert!(engine.audit(AuditMode::DryRun, None).unwrap().is_clean());
}

#[test]
fn audit_reports_physical_drift() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    engine.audit(AuditMode::Apply, None).unwrap();

    common::exec(&engine, "ALTER TABLE fin_invoices ADD COLUMN rogue TEXT");
    let report = engine.audit(AuditMode::DryRun, Some(invoice.id)).unwrap();
    assert!(matches!(&report.entries[0].problems[..], [Problem::ShapeDrift { .. }]));

    common::exec(&engine, "DROP TABLE fin_invoices");
    let report = engine.audit(AuditMode::DryRun, Some(invoice.id)).unwrap();
    assert_eq!(
        report.entries[0].problems,
        [Problem::MissingTable {
            table: "fin_invoices".into()
        }]
    );
}

#[test]
fn audit_reports_fields_a_revert_left_unmigrated() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);
    engine.audit(AuditMode::Apply, None).unwrap();
    let version = engine.entity(invoice.id).unwrap().version;
    engine
        .add_field(invoice.id, &FieldSpec::date("due_date"), version)
        .unwrap();
    engine.revert_last_migration(invoice.id, None).unwrap();

    let report = engine.audit(AuditMode::DryRun, Some(invoice.id)).unwrap();
    assert_eq!(
        report.entries[0].problems,
        [Problem::PendingMigration {
            ops: vec!["add_column due_date DATE".into()]
        }]
    );

    engine.migrate(invoice.id, None).unwrap();
    assert!(engine.audit(AuditMode::DryRun, None).unwrap().is_clean());
}

// ── Caches ───────────────────────────────────────────────────────

#[test]
fn table_resolution_is_cached_until_cleared() {
    let engine = common::engine();
    let module = common::finance_module(&engine);
    let invoice = common::published_invoice(&engine, &module);

    engine.resolve_table(invoice.id).unwrap();
    let before = engine.table_cache_stats();
    engine.resolve_table(invoice.id).unwrap();
    let after = engine.table_cache_stats();
    assert_eq!(after.hits, before.hits + 1);
    assert_eq!(after.size, 1);

    engine.clear_caches();
    assert_eq!(engine.table_cache_stats().size, 0);
    assert_eq!(engine.lookup_cache_stats().size, 0);
    assert_eq!(engine.resolve_table(invoice.id).unwrap().table, "fin_invoices");
}
