#![allow(dead_code)]

use metaschema_engine::{EngineConfig, SchemaEngine};
use metaschema_model::{DataScope, EntityDefinition, FieldSpec, Module, NewEntity, NewModule};
use metaschema_store::StoreError;

pub fn engine() -> SchemaEngine {
    SchemaEngine::open_in_memory(EngineConfig::default()).unwrap()
}

pub fn engine_with(config: EngineConfig) -> SchemaEngine {
    SchemaEngine::open_in_memory(config).unwrap()
}

pub fn finance_module(engine: &SchemaEngine) -> Module {
    engine
        .create_module(&NewModule::new("Finance").with_prefix("fin"))
        .unwrap()
}

/// Draft `Invoice` in the finance module with a number and an amount.
pub fn draft_invoice(engine: &SchemaEngine, module: &Module) -> EntityDefinition {
    let entity = engine
        .create_entity(&NewEntity::new("Invoice", "invoices", DataScope::Tenant).in_module(module.id))
        .unwrap();
    let change = engine
        .add_field(entity.id, &FieldSpec::string("number", 32).required(), entity.version)
        .unwrap();
    engine
        .add_field(entity.id, &FieldSpec::decimal("amount", 12, 2), change.entity_version)
        .unwrap();
    engine.entity(entity.id).unwrap()
}

/// Creates `new` with `fields` and publishes it.
pub fn published(engine: &SchemaEngine, new: &NewEntity, fields: &[FieldSpec]) -> EntityDefinition {
    let entity = engine.create_entity(new).unwrap();
    let mut version = entity.version;
    for spec in fields {
        version = engine.add_field(entity.id, spec, version).unwrap().entity_version;
    }
    engine.publish_entity(entity.id, version, None).unwrap().entity
}

pub fn published_invoice(engine: &SchemaEngine, module: &Module) -> EntityDefinition {
    let draft = draft_invoice(engine, module);
    engine
        .publish_entity(draft.id, draft.version, Some("initial"))
        .unwrap()
        .entity
}

/// Runs raw SQL against the engine's database.
pub fn exec(engine: &SchemaEngine, sql: &str) {
    engine
        .database()
        .write(|tx| tx.execute_batch(sql).map_err(StoreError::from))
        .unwrap();
}

pub fn count(engine: &SchemaEngine, sql: &str) -> i64 {
    engine
        .database()
        .read(|conn| conn.query_row(sql, [], |row| row.get(0)).map_err(StoreError::from))
        .unwrap()
}

/// Column names of a live table, in declaration order.
pub fn columns(engine: &SchemaEngine, table: &str) -> Vec<String> {
    engine
        .database()
        .read(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(names)
        })
        .unwrap()
}

/// Seeds `countries(code, name)` and `states(code, name, country_code)`.
/// Rows are inserted out of order on purpose.
pub fn seed_geography(engine: &SchemaEngine) {
    exec(
        engine,
        "CREATE TABLE countries (code TEXT PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO countries VALUES
             ('US', 'United States'), ('DE', 'Germany'), ('BR', 'Brazil'), ('FR', 'France'), ('CA', 'Canada');
         CREATE TABLE states (code TEXT PRIMARY KEY, name TEXT NOT NULL, country_code TEXT NOT NULL);
         INSERT INTO states VALUES
             ('US-TX', 'Texas', 'US'), ('CA-QC', 'Quebec', 'CA'), ('US-CA', 'California', 'US'),
             ('CA-ON', 'Ontario', 'CA'), ('US-NY', 'New York', 'US');",
    );
}
