use metaschema_types::{EntityDefId, FieldGroupId, FieldId, LookupId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::filter::FilterExpr;
use crate::i18n::I18nText;
use crate::scope::PARTITION_COLUMNS;
use crate::validate::{ValidationErrors, check_identifier};

/// Declared data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Text,
    Integer,
    BigInteger,
    Decimal,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
    Uuid,
    Json,
    /// Foreign key to another table.
    Reference,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::BigInteger => "big_integer",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Time => "time",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Reference => "reference",
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference)
    }
}

/// Standard SQL referential actions for foreign keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ReferentialAction {
    type Err = String;

    /// Accepts both SQL spelling (`SET NULL`) and snake case (`set_null`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', " ").as_str() {
            "NO ACTION" | "" => Ok(Self::NoAction),
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "SET DEFAULT" => Ok(Self::SetDefault),
            _ => Err(format!("unknown referential action '{s}'")),
        }
    }
}

/// Conditional behaviour of a field, each entry a filter expression over the
/// record being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_when: Option<String>,
}

impl VisibilityRules {
    fn entries(&self) -> [(&'static str, Option<&str>); 3] {
        [
            ("visible_when", self.visible_when.as_deref()),
            ("required_when", self.required_when.as_deref()),
            ("read_only_when", self.read_only_when.as_deref()),
        ]
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for (name, expr) in self.entries() {
            let Some(expr) = expr else { continue };
            match FilterExpr::parse(expr) {
                Ok(parsed) if !parsed.placeholders().is_empty() => {
                    errors.push(name, "visibility expressions cannot use placeholders");
                }
                Ok(_) => {}
                Err(e) => errors.push(name, e.to_string()),
            }
        }
        errors.into_result()
    }
}

/// Evaluated visibility of one field for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVisibility {
    pub visible: bool,
    pub required: bool,
    pub read_only: bool,
}

/// Declarative attributes of a field; the part replaced by a full update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
    /// Length for strings, total digits for decimals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Digits after the decimal point (decimals only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_indexed: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Physical table the foreign key points to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_table_name: Option<String>,
    /// Column the foreign key points to (defaults to `id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_field: Option<String>,
    /// Column shown to users; independent of `reference_field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_id: Option<LookupId>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_rules: Option<VisibilityRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_group_id: Option<FieldGroupId>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default, skip_serializing_if = "I18nText::is_empty")]
    pub label_i18n: I18nText,
    #[serde(default, skip_serializing_if = "I18nText::is_empty")]
    pub help_text_i18n: I18nText,
    #[serde(default, skip_serializing_if = "I18nText::is_empty")]
    pub placeholder_i18n: I18nText,
}

impl FieldSpec {
    /// A nullable field of the given type with every optional attribute unset.
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            precision: None,
            scale: None,
            is_required: false,
            is_unique: false,
            is_indexed: false,
            is_primary_key: false,
            default_value: None,
            reference_table_name: None,
            reference_field: None,
            display_field: None,
            lookup_id: None,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            visibility_rules: None,
            depends_on_field: None,
            filter_expression: None,
            field_group_id: None,
            display_order: 0,
            label_i18n: I18nText::new(),
            help_text_i18n: I18nText::new(),
            placeholder_i18n: I18nText::new(),
        }
    }

    /// Shorthand for a string field with a maximum length.
    pub fn string(name: &str, length: u32) -> Self {
        Self::new(name, DataType::String).with_precision(length)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, DataType::Integer)
    }

    pub fn decimal(name: &str, precision: u32, scale: u32) -> Self {
        let mut spec = Self::new(name, DataType::Decimal).with_precision(precision);
        spec.scale = Some(scale);
        spec
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, DataType::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, DataType::Date)
    }

    pub fn date_time(name: &str) -> Self {
        Self::new(name, DataType::DateTime)
    }

    /// Shorthand for a reference (foreign key) field.
    pub fn reference(name: &str, table: &str) -> Self {
        let mut spec = Self::new(name, DataType::Reference);
        spec.reference_table_name = Some(table.into());
        spec
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.is_indexed = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn referencing_field(mut self, field: &str) -> Self {
        self.reference_field = Some(field.into());
        self
    }

    pub fn displaying(mut self, field: &str) -> Self {
        self.display_field = Some(field.into());
        self
    }

    pub fn with_lookup(mut self, lookup_id: LookupId) -> Self {
        self.lookup_id = Some(lookup_id);
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn visible_when(mut self, expr: &str) -> Self {
        self.visibility_rules
            .get_or_insert_with(VisibilityRules::default)
            .visible_when = Some(expr.into());
        self
    }

    pub fn required_when(mut self, expr: &str) -> Self {
        self.visibility_rules
            .get_or_insert_with(VisibilityRules::default)
            .required_when = Some(expr.into());
        self
    }

    pub fn depends_on(mut self, field: &str, filter_expression: &str) -> Self {
        self.depends_on_field = Some(field.into());
        self.filter_expression = Some(filter_expression.into());
        self
    }

    pub fn in_group(mut self, group: FieldGroupId) -> Self {
        self.field_group_id = Some(group);
        self
    }

    pub fn ordered(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }

    pub fn labelled(mut self, locale: &str, label: &str) -> Self {
        self.label_i18n.set(locale, label);
        self
    }

    /// Column the physical foreign key targets.
    pub fn reference_column(&self) -> &str {
        self.reference_field.as_deref().unwrap_or("id")
    }

    /// Column shown to users for a reference value.
    pub fn effective_display_field(&self) -> &str {
        self.display_field
            .as_deref()
            .unwrap_or_else(|| self.reference_column())
    }

    /// True if this field becomes the table's primary key column.
    pub fn maps_to_primary_key(&self) -> bool {
        self.is_primary_key || self.name == "id"
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_identifier(&mut errors, "name", &self.name);
        if PARTITION_COLUMNS.contains(&self.name.as_str()) {
            errors.push("name", "is reserved for data scope partitioning");
        }

        match self.data_type {
            DataType::Reference => match &self.reference_table_name {
                Some(table) => check_identifier(&mut errors, "reference_table_name", table),
                None => errors.push("reference_table_name", "is required for reference fields"),
            },
            _ => {
                if self.reference_table_name.is_some() || self.reference_field.is_some() {
                    errors.push(
                        "reference_table_name",
                        "only reference fields may declare a foreign key target",
                    );
                }
                if self.on_delete != ReferentialAction::NoAction
                    || self.on_update != ReferentialAction::NoAction
                {
                    errors.push("on_delete", "referential actions apply to reference fields only");
                }
            }
        }
        if let Some(field) = &self.reference_field {
            check_identifier(&mut errors, "reference_field", field);
        }
        if let Some(field) = &self.display_field {
            check_identifier(&mut errors, "display_field", field);
        }
        if self.is_required
            && (self.on_delete == ReferentialAction::SetNull
                || self.on_update == ReferentialAction::SetNull)
        {
            errors.push("on_delete", "SET NULL requires a nullable field");
        }

        match self.data_type {
            DataType::Decimal => {
                if let Some(p) = self.precision {
                    if !(1..=38).contains(&p) {
                        errors.push("precision", "must be between 1 and 38");
                    }
                    if self.scale.is_some_and(|s| s > p) {
                        errors.push("scale", "must not exceed precision");
                    }
                } else if self.scale.is_some() {
                    errors.push("scale", "requires a precision");
                }
            }
            DataType::String => {
                if self.precision.is_some_and(|p| !(1..=65_535).contains(&p)) {
                    errors.push("precision", "string length must be between 1 and 65535");
                }
                if self.scale.is_some() {
                    errors.push("scale", "applies to decimal fields only");
                }
            }
            _ => {
                if self.precision.is_some() || self.scale.is_some() {
                    errors.push("precision", "applies to string and decimal fields only");
                }
            }
        }

        if let Some(default) = &self.default_value {
            if matches!(default, Value::Array(_) | Value::Object(_))
                && self.data_type != DataType::Json
            {
                errors.push("default_value", "must be a scalar");
            }
        }
        if let Some(rules) = &self.visibility_rules {
            if let Err(inner) = rules.validate() {
                errors.extend_prefixed("visibility_rules", inner);
            }
        }
        if let Some(dep) = &self.depends_on_field {
            check_identifier(&mut errors, "depends_on_field", dep);
            if *dep == self.name {
                errors.push("depends_on_field", "a field cannot depend on itself");
            }
        }
        if let Some(expr) = &self.filter_expression {
            if let Err(e) = FilterExpr::parse(expr) {
                errors.push("filter_expression", e.to_string());
            }
        }
        errors.into_result()
    }

    /// Evaluates visibility rules against a record. Expressions that fail to
    /// evaluate fall back to the static attributes.
    pub fn visibility(&self, record: &Map<String, Value>) -> FieldVisibility {
        let eval = |expr: Option<&String>, fallback: bool| -> bool {
            let Some(expr) = expr else { return fallback };
            FilterExpr::parse(expr)
                .ok()
                .and_then(|parsed| parsed.evaluate(record, &|_| None).ok())
                .unwrap_or(fallback)
        };
        match &self.visibility_rules {
            None => FieldVisibility {
                visible: true,
                required: self.is_required,
                read_only: false,
            },
            Some(rules) => {
                let visible = eval(rules.visible_when.as_ref(), true);
                FieldVisibility {
                    visible,
                    required: visible && eval(rules.required_when.as_ref(), self.is_required),
                    read_only: eval(rules.read_only_when.as_ref(), false),
                }
            }
        }
    }
}

/// A declared column of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,
    pub entity_id: EntityDefId,
    #[serde(flatten)]
    pub spec: FieldSpec,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl FieldDefinition {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Cross-field checks over the live fields of one entity.
pub fn validate_field_set(fields: &[&FieldSpec]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let pk_count = fields.iter().filter(|f| f.maps_to_primary_key()).count();
    if pk_count > 1 {
        errors.push("fields", "at most one field may map onto the primary key");
    }
    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|other| other.name == field.name) {
            errors.push(format!("fields.{}", field.name), "duplicate field name");
        }
        if let Some(dep) = &field.depends_on_field {
            if !fields.iter().any(|other| other.name == *dep) {
                errors.push(
                    format!("fields.{}.depends_on_field", field.name),
                    format!("no field named '{dep}'"),
                );
            }
        }
    }
    errors.into_result()
}

/// Fields visible for `record`, in the order given.
pub fn visible_fields<'a>(
    fields: &'a [FieldDefinition],
    record: &Map<String, Value>,
) -> Vec<&'a FieldDefinition> {
    fields
        .iter()
        .filter(|f| !f.is_deleted() && f.spec.visibility(record).visible)
        .collect()
}
