//! Compiles field definitions into the desired [`TableShape`].

use metaschema_model::{
    ColumnDef, DataType, EntityDefinition, FieldDefinition, FieldSpec, ForeignKeyDef, IndexDef,
    TableShape,
};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::resolver::ResolvedTable;

/// Name of the system primary key added when no field maps onto it.
pub const SYSTEM_KEY: &str = "id";

const DEFAULT_STRING_LENGTH: u32 = 255;
const DEFAULT_DECIMAL_PRECISION: u32 = 18;
const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// Declared SQL type for a field.
pub fn sql_type(spec: &FieldSpec) -> String {
    match spec.data_type {
        DataType::String => format!("VARCHAR({})", spec.precision.unwrap_or(DEFAULT_STRING_LENGTH)),
        DataType::Text | DataType::Json | DataType::Reference => "TEXT".into(),
        DataType::Integer => "INTEGER".into(),
        DataType::BigInteger => "BIGINT".into(),
        DataType::Decimal => {
            let precision = spec.precision.unwrap_or(DEFAULT_DECIMAL_PRECISION);
            let scale = spec.scale.unwrap_or(DEFAULT_DECIMAL_SCALE).min(precision);
            format!("NUMERIC({precision},{scale})")
        }
        DataType::Float => "REAL".into(),
        DataType::Boolean => "BOOLEAN".into(),
        DataType::Date => "DATE".into(),
        DataType::DateTime => "TIMESTAMP".into(),
        DataType::Time => "TIME".into(),
        DataType::Uuid => "CHAR(36)".into(),
    }
}

/// Renders a JSON default as a SQL literal. `null` means no default.
pub fn default_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("TRUE".into()),
        Value::Bool(false) => Some("FALSE".into()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(quote_literal(s)),
        other => Some(quote_literal(&other.to_string())),
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn column_for(spec: &FieldSpec) -> ColumnDef {
    let mut column = ColumnDef::new(&spec.name, &sql_type(spec));
    if spec.maps_to_primary_key() {
        column = column.primary_key();
    } else {
        column.nullable = !spec.is_required;
        column.unique = spec.is_unique;
    }
    column.default = spec.default_value.as_ref().and_then(default_literal);
    column
}

/// Desired shape of an entity's table given its live fields.
///
/// Fails when the entity has no live fields.
pub fn compile_shape(
    entity: &EntityDefinition,
    table: &ResolvedTable,
    fields: &[FieldDefinition],
) -> EngineResult<TableShape> {
    let live: Vec<&FieldSpec> = fields
        .iter()
        .filter(|f| !f.is_deleted())
        .map(|f| &f.spec)
        .collect();
    if live.is_empty() {
        return Err(EngineError::validation(
            "fields",
            format!("entity '{}' has no fields to synthesize", entity.name),
        ));
    }

    let mut shape = TableShape::new(&table.schema, &table.table);
    if !live.iter().any(|f| f.maps_to_primary_key()) {
        shape
            .columns
            .push(ColumnDef::new(SYSTEM_KEY, "TEXT").primary_key());
    }
    let partition = entity.data_scope.partition_columns();
    for column in partition {
        shape.columns.push(ColumnDef::new(column, "TEXT").not_null());
    }
    if !partition.is_empty() {
        shape.indexes.push(IndexDef {
            name: format!("idx_{}_scope", table.table),
            columns: partition.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
    }

    for spec in &live {
        let column = column_for(spec);
        let indexed = !column.primary_key
            && !column.unique
            && (spec.is_indexed || spec.data_type.is_reference());
        shape.columns.push(column);
        if spec.data_type.is_reference() {
            if let Some(ref_table) = &spec.reference_table_name {
                shape.foreign_keys.push(ForeignKeyDef {
                    column: spec.name.clone(),
                    ref_table: ref_table.clone(),
                    ref_column: spec.reference_column().to_string(),
                    on_delete: spec.on_delete,
                    on_update: spec.on_update,
                });
            }
        }
        if indexed {
            shape.indexes.push(IndexDef {
                name: format!("idx_{}_{}", table.table, spec.name),
                columns: vec![spec.name.clone()],
                unique: false,
            });
        }
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaschema_model::{DataScope, EntityStatus, FieldSpec};
    use metaschema_types::{EntityDefId, FieldId};
    use serde_json::json;

    fn entity(scope: DataScope) -> EntityDefinition {
        EntityDefinition {
            id: EntityDefId::new(),
            tenant_id: None,
            module_id: None,
            name: "Invoice".into(),
            table_name: "invoices".into(),
            schema_name: "main".into(),
            status: EntityStatus::Draft,
            data_scope: scope,
            version: 1,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    fn field(entity_id: EntityDefId, spec: FieldSpec) -> FieldDefinition {
        FieldDefinition {
            id: FieldId::new(),
            entity_id,
            spec,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    #[test]
    fn type_mapping() {
        assert_eq!(sql_type(&FieldSpec::string("code", 3)), "VARCHAR(3)");
        assert_eq!(sql_type(&FieldSpec::new("name", DataType::String)), "VARCHAR(255)");
        assert_eq!(sql_type(&FieldSpec::decimal("total", 12, 4)), "NUMERIC(12,4)");
        assert_eq!(sql_type(&FieldSpec::new("amount", DataType::Decimal)), "NUMERIC(18,2)");
        assert_eq!(sql_type(&FieldSpec::date_time("posted_at")), "TIMESTAMP");
        assert_eq!(sql_type(&FieldSpec::new("key", DataType::Uuid)), "CHAR(36)");
    }

    #[test]
    fn defaults_render_as_literals() {
        assert_eq!(default_literal(&json!("O'Brien")).as_deref(), Some("'O''Brien'"));
        assert_eq!(default_literal(&json!(42)).as_deref(), Some("42"));
        assert_eq!(default_literal(&json!(false)).as_deref(), Some("FALSE"));
        assert_eq!(default_literal(&json!(null)), None);
        assert_eq!(default_literal(&json!({"a": 1})).as_deref(), Some("'{\"a\":1}'"));
    }

    #[test]
    fn system_key_and_partition_columns() {
        let def = entity(DataScope::Branch);
        let table = ResolvedTable::new("main", "fin_invoices");
        let fields = vec![field(def.id, FieldSpec::string("number", 32).required())];
        let shape = compile_shape(&def, &table, &fields).unwrap();

        let names: Vec<&str> = shape.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "tenant_id", "company_id", "branch_id", "number"]);
        assert!(shape.column("id").unwrap().primary_key);
        assert!(!shape.column("branch_id").unwrap().nullable);
        assert_eq!(shape.indexes[0].name, "idx_fin_invoices_scope");
    }

    #[test]
    fn declared_key_replaces_system_key() {
        let def = entity(DataScope::Platform);
        let table = ResolvedTable::new("main", "countries");
        let fields = vec![
            field(def.id, FieldSpec::string("code", 2).primary_key()),
            field(def.id, FieldSpec::string("name", 64)),
        ];
        let shape = compile_shape(&def, &table, &fields).unwrap();
        assert_eq!(shape.primary_key().unwrap().name, "code");
        assert!(!shape.has_column(SYSTEM_KEY));
        assert!(shape.indexes.is_empty());
    }

    #[test]
    fn references_get_foreign_key_and_index() {
        let def = entity(DataScope::Platform);
        let table = ResolvedTable::new("main", "fin_invoices");
        let fields = vec![field(def.id, FieldSpec::reference("customer_id", "crm_customers"))];
        let shape = compile_shape(&def, &table, &fields).unwrap();
        let fk = shape.foreign_key("customer_id").unwrap();
        assert_eq!((fk.ref_table.as_str(), fk.ref_column.as_str()), ("crm_customers", "id"));
        assert!(shape.index("idx_fin_invoices_customer_id").is_some());
    }

    #[test]
    fn no_fields_is_a_validation_error() {
        let def = entity(DataScope::Tenant);
        let table = ResolvedTable::new("main", "invoices");
        assert!(matches!(
            compile_shape(&def, &table, &[]),
            Err(EngineError::Validation(_))
        ));
    }
}
