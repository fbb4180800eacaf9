#![allow(dead_code)]

use metaschema_model::{DataScope, EntityDefinition, Module, NewEntity, NewModule};
use metaschema_store::MetadataStore;

pub fn store() -> MetadataStore {
    MetadataStore::open_in_memory().unwrap()
}

pub fn finance_module(store: &MetadataStore) -> Module {
    store
        .create_module(&NewModule::new("Finance").with_prefix("fin"))
        .unwrap()
}

pub fn invoice(store: &MetadataStore, module: &Module) -> EntityDefinition {
    store
        .create_entity(&NewEntity::new("Invoice", "invoices", DataScope::Tenant).in_module(module.id))
        .unwrap()
}
