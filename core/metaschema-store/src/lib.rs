//! SQLite metadata store for metaschema.
//!
//! Persists modules, entity/field definitions, field groups, lookup
//! configurations, cascading rules and the migration ledger in `meta_*`
//! tables of the same database that holds the synthesized entity tables.
//!
//! Record modules ([`modules`], [`entities`], [`fields`], [`lookups`],
//! [`ledger`], [`edits`]) expose functions over a `&Connection` so the engine
//! can compose them with DDL inside one transaction. [`MetadataStore`] wraps
//! the common calls in a transaction each.

mod codec;
mod db;
mod error;
mod schema;
mod store;

pub mod edits;
pub mod entities;
pub mod fields;
pub mod ledger;
pub mod lookups;
pub mod modules;

pub use codec::now_ms;
pub use db::{DEFAULT_BUSY_TIMEOUT, Database, attached_schemas};
pub use edits::Edited;
pub use error::{StoreError, StoreResult};
pub use schema::{SCHEMA_VERSION, known_schemas, table_exists};
pub use store::MetadataStore;
