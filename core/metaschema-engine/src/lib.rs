//! Schema synthesis engine for metaschema.
//!
//! Turns the declared metadata model into physical tables and keeps the two
//! in step:
//! - [`resolver`]: entity → `schema.table`, module prefix applied, cached
//! - [`scope`]: caller partition → row predicate or a denial
//! - [`compile`], [`diff`], [`dialect`], [`migrator`]: shape compilation,
//!   ordered diffing, SQLite DDL and the append-only migration ledger
//! - [`lookup`]: reference-field options with cascading filters, search,
//!   paging and recent selections
//! - [`audit`]: drift between metadata, ledger and live tables
//!
//! [`SchemaEngine`] is the entry point. Each schema-affecting call holds the
//! entity's lease and commits metadata and DDL in one transaction.

pub mod audit;
pub mod cache;
pub mod compile;
pub mod config;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod lookup;
pub mod migrator;
pub mod resolver;
pub mod scope;
mod service;

pub use audit::{AuditEntry, AuditMode, AuditReport, Problem};
pub use cache::CacheStats;
pub use config::EngineConfig;
pub use dialect::{Dialect, SqliteDialect};
pub use error::{EngineError, EngineResult};
pub use lookup::{LookupOption, LookupPage, OptionsRequest};
pub use migrator::MigrationPlan;
pub use resolver::ResolvedTable;
pub use scope::{DenialReason, ScopeDecision, ScopePredicate};
pub use service::{EntityChange, FieldChange, ModuleChange, SchemaEngine};
