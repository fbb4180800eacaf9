//! Metadata model for metaschema.
//!
//! Defines the records operators declare and the engine compiles into tables:
//! - [`Module`], [`EntityDefinition`], [`FieldDefinition`], [`FieldGroup`]: the
//!   declared data model, with server-side validation
//! - [`LookupConfiguration`] and [`CascadingLookupRule`]: reference-field option
//!   sources and the parent → child edges between them
//! - [`DataScope`] and [`CallerScope`]: the organizational partitioning levels
//! - [`TableShape`] and [`MigrationRecord`]: the physical side, as diffed and
//!   recorded by the migration engine
//!
//! Two small languages live here as well: [`FilterExpr`] (cascading filters
//! and visibility rules) and [`DisplayTemplate`] (lookup option labels).
//! Nothing in this crate touches a database.

mod entity;
mod field;
mod filter;
mod group;
mod i18n;
mod lookup;
mod migration;
mod module;
mod scope;
mod shape;
mod template;
mod validate;

pub use entity::{
    DEFAULT_SCHEMA, EntityDefinition, EntityStatus, NewEntity, check_resolved_table_len,
};
pub use field::{
    DataType, FieldDefinition, FieldSpec, FieldVisibility, ReferentialAction, VisibilityRules,
    validate_field_set, visible_fields,
};
pub use filter::{CompareOp, FilterExpr, FilterParseError, Operand, Scalar, Segment};
pub use group::{FieldGroup, FormSection, NewFieldGroup, form_layout};
pub use i18n::I18nText;
pub use lookup::{CascadingLookupRule, LookupConfiguration, LookupSource, LookupSpec, validate_rule};
pub use migration::{MigrationKind, MigrationOp, MigrationRecord, MigrationStep};
pub use module::{Module, NewModule};
pub use scope::{CallerScope, DataScope, PARTITION_COLUMNS};
pub use shape::{ColumnDef, ForeignKeyDef, IndexDef, ShapeDifference, TableShape, apply_op};
pub use template::{DisplayTemplate, TemplateError, TemplatePart};
pub use validate::{
    FieldViolation, MAX_IDENTIFIER_LEN, MAX_NAME_LEN, ValidationErrors, check_identifier,
    is_identifier,
};
