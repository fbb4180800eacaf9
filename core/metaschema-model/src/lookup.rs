use metaschema_types::{EntityDefId, LookupId, RuleId, TenantId};
use serde::{Deserialize, Serialize};

use crate::filter::FilterExpr;
use crate::template::DisplayTemplate;
use crate::validate::{ValidationErrors, check_identifier, check_name};

/// Where a lookup reads its options from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum LookupSource {
    /// Rows of a declared entity; the table is resolved and scope applies.
    Entity { entity_id: EntityDefId },
    /// A physical table outside the metadata (e.g. a seeded reference table).
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        reference_table_name: String,
    },
}

/// Declarative part of a lookup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub name: String,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(flatten)]
    pub source: LookupSource,
    /// Column stored in the referencing field.
    #[serde(default = "default_value_field")]
    pub value_field: String,
    pub display_template: String,
    #[serde(default)]
    pub search_fields: Vec<String>,
    /// Column matched against a parent value when no cascading rule applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_field: Option<String>,
    #[serde(default)]
    pub allow_create: bool,
    #[serde(default)]
    pub recent_count: u32,
}

fn default_value_field() -> String {
    "id".into()
}

impl LookupSpec {
    pub fn for_entity(name: &str, entity_id: EntityDefId, display_template: &str) -> Self {
        Self::new(name, LookupSource::Entity { entity_id }, display_template)
    }

    pub fn for_table(name: &str, table: &str, display_template: &str) -> Self {
        Self::new(
            name,
            LookupSource::Table {
                schema: None,
                reference_table_name: table.into(),
            },
            display_template,
        )
    }

    fn new(name: &str, source: LookupSource, display_template: &str) -> Self {
        Self {
            name: name.into(),
            tenant_id: None,
            source,
            value_field: default_value_field(),
            display_template: display_template.into(),
            search_fields: Vec::new(),
            filter_field: None,
            allow_create: false,
            recent_count: 0,
        }
    }

    pub fn with_value_field(mut self, field: &str) -> Self {
        self.value_field = field.into();
        self
    }

    pub fn searching(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filtered_by(mut self, field: &str) -> Self {
        self.filter_field = Some(field.into());
        self
    }

    pub fn with_recents(mut self, count: u32) -> Self {
        self.recent_count = count;
        self
    }

    pub fn template(&self) -> Result<DisplayTemplate, ValidationErrors> {
        DisplayTemplate::parse(&self.display_template)
            .map_err(|e| ValidationErrors::single("display_template", e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, "name", &self.name);
        if let LookupSource::Table {
            schema,
            reference_table_name,
        } = &self.source
        {
            check_identifier(&mut errors, "reference_table_name", reference_table_name);
            if let Some(schema) = schema {
                check_identifier(&mut errors, "schema", schema);
            }
        }
        check_identifier(&mut errors, "value_field", &self.value_field);
        if let Err(e) = DisplayTemplate::parse(&self.display_template) {
            errors.push("display_template", e.to_string());
        }
        for (i, field) in self.search_fields.iter().enumerate() {
            check_identifier(&mut errors, &format!("search_fields[{i}]"), field);
        }
        if let Some(field) = &self.filter_field {
            check_identifier(&mut errors, "filter_field", field);
        }
        if self.recent_count > 100 {
            errors.push("recent_count", "must not exceed 100");
        }
        errors.into_result()
    }
}

/// A stored lookup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupConfiguration {
    pub id: LookupId,
    #[serde(flatten)]
    pub spec: LookupSpec,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A directed parent → child edge between lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadingLookupRule {
    pub id: RuleId,
    pub parent_lookup_id: LookupId,
    pub child_lookup_id: LookupId,
    /// Filter over the child's rows; placeholders bind to the parent value.
    pub filter_expression: String,
    pub created_at: i64,
}

/// Checks a rule before insertion; acyclicity is the engine's concern.
pub fn validate_rule(
    parent: LookupId,
    child: LookupId,
    filter_expression: &str,
) -> Result<FilterExpr, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if parent == child {
        errors.push("child_lookup_id", "a lookup cannot cascade from itself");
    }
    let parsed = match FilterExpr::parse(filter_expression) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            errors.push("filter_expression", e.to_string());
            None
        }
    };
    match parsed {
        Some(parsed) if errors.is_empty() => Ok(parsed),
        _ => Err(errors),
    }
}
