use metaschema_types::{EntityDefId, FieldGroupId};
use serde::{Deserialize, Serialize};

use crate::field::FieldDefinition;
use crate::i18n::I18nText;
use crate::validate::{ValidationErrors, check_name};

/// A named, orderable, collapsible section of one entity's form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub id: FieldGroupId,
    pub entity_id: EntityDefId,
    pub name: String,
    #[serde(default, skip_serializing_if = "I18nText::is_empty")]
    pub label_i18n: I18nText,
    pub display_order: i32,
    pub collapsible: bool,
    pub collapsed_by_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFieldGroup {
    pub name: String,
    #[serde(default)]
    pub label_i18n: I18nText,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub collapsible: bool,
    #[serde(default)]
    pub collapsed_by_default: bool,
}

impl NewFieldGroup {
    pub fn new(name: &str, display_order: i32) -> Self {
        Self {
            name: name.into(),
            label_i18n: I18nText::new(),
            display_order,
            collapsible: false,
            collapsed_by_default: false,
        }
    }

    pub fn collapsible(mut self, collapsed_by_default: bool) -> Self {
        self.collapsible = true;
        self.collapsed_by_default = collapsed_by_default;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, "name", &self.name);
        if self.collapsed_by_default && !self.collapsible {
            errors.push("collapsed_by_default", "requires a collapsible group");
        }
        errors.into_result()
    }
}

/// One section of a rendered form: a group (or the ungrouped fields) and its
/// fields in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct FormSection<'a> {
    pub group: Option<&'a FieldGroup>,
    pub fields: Vec<&'a FieldDefinition>,
}

/// Lays out live fields by group. Ungrouped fields come first, then groups
/// by `display_order`; ties keep input order. Fields pointing at an unknown
/// group are treated as ungrouped. Empty groups are kept so collapsible
/// sections still render.
pub fn form_layout<'a>(
    groups: &'a [FieldGroup],
    fields: &'a [FieldDefinition],
) -> Vec<FormSection<'a>> {
    let mut ordered_groups: Vec<&FieldGroup> = groups.iter().collect();
    ordered_groups.sort_by_key(|g| g.display_order);

    let mut live: Vec<&FieldDefinition> = fields.iter().filter(|f| !f.is_deleted()).collect();
    live.sort_by_key(|f| f.spec.display_order);

    let known = |id: Option<FieldGroupId>| {
        id.is_some_and(|id| ordered_groups.iter().any(|g| g.id == id))
    };

    let ungrouped: Vec<&FieldDefinition> = live
        .iter()
        .copied()
        .filter(|f| !known(f.spec.field_group_id))
        .collect();

    let mut sections = Vec::with_capacity(ordered_groups.len() + 1);
    if !ungrouped.is_empty() {
        sections.push(FormSection {
            group: None,
            fields: ungrouped,
        });
    }
    for group in &ordered_groups {
        sections.push(FormSection {
            group: Some(group),
            fields: live
                .iter()
                .copied()
                .filter(|f| f.spec.field_group_id == Some(group.id))
                .collect(),
        });
    }
    sections
}
