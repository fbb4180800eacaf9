use metaschema_model::{
    CallerScope, CascadingLookupRule, DisplayTemplate, EntityDefinition, FieldDefinition,
    FilterExpr, LookupConfiguration, LookupSource,
};
use metaschema_store::{entities, lookups, modules};
use metaschema_types::LookupId;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::recent::RecentSelections;
use super::sql::{Conditions, contains_pattern, filter_sql, placeholders, quote, text_of};
use crate::cache::{CacheStats, TtlCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::resolver::{ResolvedTable, resolve_entity_table};
use crate::scope::{ScopeDecision, check_scope};

/// A lookup with everything needed to query it.
#[derive(Debug, Clone)]
pub struct CompiledLookup {
    pub config: LookupConfiguration,
    pub table: ResolvedTable,
    pub template: DisplayTemplate,
    pub search_columns: Vec<String>,
    pub rules: Vec<(CascadingLookupRule, FilterExpr)>,
    /// Source entity, when scope applies.
    pub entity: Option<EntityDefinition>,
}

impl CompiledLookup {
    fn value_column(&self) -> &str {
        &self.config.spec.value_field
    }

    /// `SELECT value, template fields...`
    fn select_sql(&self) -> String {
        let mut columns = vec![quote(self.value_column())];
        columns.extend(self.template.fields().into_iter().map(quote));
        format!("SELECT {} FROM {}", columns.join(", "), self.table.qualified())
    }

    fn order_sql(&self) -> String {
        let first = self
            .template
            .fields()
            .first()
            .map(|f| quote(f))
            .unwrap_or_else(|| quote(self.value_column()));
        format!(" ORDER BY {first}, {}", quote(self.value_column()))
    }

    fn option_from_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
        let value = text_of(row.get_ref(0)?);
        let mut labels = HashMap::new();
        for (i, field) in self.template.fields().into_iter().enumerate() {
            labels.insert(field.to_string(), text_of(row.get_ref(i + 1)?));
        }
        Ok((value, self.template.render(&labels)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsRequest {
    #[serde(default)]
    pub search: Option<String>,
    /// Value currently selected in the parent field.
    #[serde(default)]
    pub parent_value: Option<String>,
    /// 1-based; 0 is treated as 1.
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Session whose recent selections are shown first.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub caller: CallerScope,
}

impl OptionsRequest {
    pub fn new(caller: CallerScope) -> Self {
        Self {
            caller,
            page: 1,
            ..Self::default()
        }
    }

    pub fn search(mut self, term: &str) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn under(mut self, parent_value: &str) -> Self {
        self.parent_value = Some(parent_value.into());
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = Some(page_size);
        self
    }

    pub fn for_session(mut self, session: &str) -> Self {
        self.session = Some(session.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOption {
    pub value: String,
    pub display: String,
    /// Shown because the session picked it recently.
    #[serde(default)]
    pub recent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPage {
    pub items: Vec<LookupOption>,
    /// Matching options across all pages, recents included.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

pub struct LookupResolver {
    cache: TtlCache<LookupId, CompiledLookup>,
    recents: RecentSelections,
    default_schema: String,
}

impl LookupResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: TtlCache::new(config.lookup_ttl()),
            recents: RecentSelections::new(config.recent_session_ttl(), config.max_recent_sessions),
            default_schema: config.default_schema.clone(),
        }
    }

    pub fn invalidate(&self, lookup: LookupId) {
        self.cache.invalidate(&lookup);
    }

    /// Drops every compiled lookup; used when tables or scopes may have moved.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn forget(&self, lookup: LookupId) {
        self.cache.invalidate(&lookup);
        self.recents.forget_lookup(lookup);
    }

    pub fn compiled(
        &self,
        conn: &Connection,
        lookup_id: LookupId,
    ) -> EngineResult<std::sync::Arc<CompiledLookup>> {
        if let Some(hit) = self.cache.get(&lookup_id) {
            return Ok(hit);
        }
        let config = lookups::require_lookup(conn, lookup_id)?;
        let template = config.spec.template()?;
        let (table, entity) = match &config.spec.source {
            LookupSource::Entity { entity_id } => {
                let entity = entities::require_entity(conn, *entity_id)?;
                if !entity.is_published() {
                    return Err(EngineError::validation(
                        "entity_id",
                        format!("entity '{}' has no table until it is published", entity.name),
                    ));
                }
                let module = entity
                    .module_id
                    .map(|id| modules::require_module(conn, id))
                    .transpose()?;
                (resolve_entity_table(&entity, module.as_ref())?, Some(entity))
            }
            LookupSource::Table {
                schema,
                reference_table_name,
            } => (
                ResolvedTable::new(
                    schema.as_deref().unwrap_or(&self.default_schema),
                    reference_table_name,
                ),
                None,
            ),
        };
        let search_columns = if config.spec.search_fields.is_empty() {
            template.fields().into_iter().map(String::from).collect()
        } else {
            config.spec.search_fields.clone()
        };
        let mut rules = Vec::new();
        for rule in lookups::rules_for_child(conn, lookup_id)? {
            let expr = FilterExpr::parse(&rule.filter_expression)
                .map_err(|e| EngineError::internal(format!("stored rule {} is invalid: {e}", rule.id)))?;
            rules.push((rule, expr));
        }
        debug!(lookup_id = %lookup_id, table = %table, rules = rules.len(), "lookup compiled");
        Ok(self.cache.insert(
            lookup_id,
            CompiledLookup {
                config,
                table,
                template,
                search_columns,
                rules,
                entity,
            },
        ))
    }

    fn scope_conditions(
        entity: Option<&EntityDefinition>,
        caller: &CallerScope,
    ) -> EngineResult<Conditions> {
        let mut conditions = Conditions::default();
        if let Some(entity) = entity {
            match check_scope(entity, caller) {
                ScopeDecision::Denied { reason } => return Err(EngineError::Denied(reason)),
                ScopeDecision::Allowed { predicate } if !predicate.is_unrestricted() => {
                    let (sql, params) = predicate.to_sql(None);
                    conditions.push(sql, params);
                }
                ScopeDecision::Allowed { .. } => {}
            }
        }
        Ok(conditions)
    }

    /// One page of options for a lookup.
    ///
    /// With no search term, the session's recent selections that still match
    /// the filters come first and are excluded from the rest of the list.
    pub fn resolve_options(
        &self,
        conn: &Connection,
        config: &EngineConfig,
        lookup_id: LookupId,
        request: &OptionsRequest,
    ) -> EngineResult<LookupPage> {
        let lookup = self.compiled(conn, lookup_id)?;
        let mut conditions = Self::scope_conditions(lookup.entity.as_ref(), &request.caller)?;

        if let Some(parent) = &request.parent_value {
            if !lookup.rules.is_empty() {
                for (rule, expr) in &lookup.rules {
                    let mut params = Vec::new();
                    let sql = filter_sql(expr, &|_| Some(parent.clone()), &mut params).map_err(|e| {
                        EngineError::internal(format!("rule {} failed to bind: {e}", rule.id))
                    })?;
                    conditions.push(sql, params);
                }
            } else if let Some(column) = &lookup.config.spec.filter_field {
                conditions.push(format!("{} = ?", quote(column)), [Value::Text(parent.clone())]);
            }
        }

        let search = request
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(term) = search {
            let pattern = contains_pattern(term);
            let sql = lookup
                .search_columns
                .iter()
                .map(|c| format!("{} LIKE ? ESCAPE '\\'", quote(c)))
                .collect::<Vec<_>>()
                .join(" OR ");
            conditions.push(
                format!("({sql})"),
                lookup
                    .search_columns
                    .iter()
                    .map(|_| Value::Text(pattern.clone())),
            );
        }

        let page_size = config.page_size(request.page_size);
        let page = request.page.max(1);
        let offset = u64::from(page - 1) * u64::from(page_size);

        let recent_limit = lookup.config.spec.recent_count as usize;
        let recent_values = match (&request.session, search) {
            (Some(session), None) if recent_limit > 0 => {
                self.recents.list(lookup_id, session, recent_limit)
            }
            _ => Vec::new(),
        };
        let recent = self.fetch_recent(conn, &lookup, &conditions, &recent_values)?;

        let mut regular = conditions;
        if !recent.is_empty() {
            regular.push(
                format!("{} NOT IN ({})", quote(lookup.value_column()), placeholders(recent.len())),
                recent.iter().map(|(v, _)| Value::Text(v.clone())),
            );
        }
        let count_sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            lookup.table.qualified(),
            regular.where_sql()
        );
        let regular_total: i64 =
            conn.query_row(&count_sql, params_from_iter(regular.params()), |row| row.get(0))?;

        let recent_count = recent.len() as u64;
        let mut items: Vec<LookupOption> = recent
            .into_iter()
            .skip(offset as usize)
            .take(page_size as usize)
            .map(|(value, display)| LookupOption {
                value,
                display,
                recent: true,
            })
            .collect();
        let remaining = page_size as usize - items.len();
        if remaining > 0 {
            let regular_offset = offset.saturating_sub(recent_count);
            let sql = format!(
                "{}{}{} LIMIT {remaining} OFFSET {regular_offset}",
                lookup.select_sql(),
                regular.where_sql(),
                lookup.order_sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(regular.params()), |row| lookup.option_from_row(row))?
                .collect::<Result<Vec<_>, _>>()?;
            items.extend(rows.into_iter().map(|(value, display)| LookupOption {
                value,
                display,
                recent: false,
            }));
        }

        Ok(LookupPage {
            items,
            total: recent_count + regular_total.max(0) as u64,
            page,
            page_size,
        })
    }

    /// Recent values still matching `conditions`, in recency order.
    fn fetch_recent(
        &self,
        conn: &Connection,
        lookup: &CompiledLookup,
        conditions: &Conditions,
        values: &[String],
    ) -> EngineResult<Vec<(String, String)>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let mut filtered = conditions.clone();
        filtered.push(
            format!("{} IN ({})", quote(lookup.value_column()), placeholders(values.len())),
            values.iter().map(|v| Value::Text(v.clone())),
        );
        let sql = format!("{}{}", lookup.select_sql(), filtered.where_sql());
        let mut stmt = conn.prepare(&sql)?;
        let found: HashMap<String, String> = stmt
            .query_map(params_from_iter(filtered.params()), |row| lookup.option_from_row(row))?
            .collect::<Result<_, _>>()?;
        Ok(values
            .iter()
            .filter_map(|v| found.get(v).map(|d| (v.clone(), d.clone())))
            .collect())
    }

    pub fn record_selection(
        &self,
        conn: &Connection,
        lookup_id: LookupId,
        session: &str,
        value: &str,
    ) -> EngineResult<()> {
        let lookup = self.compiled(conn, lookup_id)?;
        self.recents.record(
            lookup_id,
            session,
            value,
            lookup.config.spec.recent_count as usize,
        );
        Ok(())
    }

    /// Display labels for stored values of a reference field. Values with no
    /// matching row are left out.
    pub fn resolve_display(
        &self,
        conn: &Connection,
        field: &FieldDefinition,
        schema: &str,
        values: &[String],
        caller: &CallerScope,
    ) -> EngineResult<BTreeMap<String, String>> {
        if values.is_empty() {
            return Ok(BTreeMap::new());
        }
        let params = values.iter().map(|v| Value::Text(v.clone()));

        if let Some(lookup_id) = field.spec.lookup_id {
            let lookup = self.compiled(conn, lookup_id)?;
            let mut conditions = Self::scope_conditions(lookup.entity.as_ref(), caller)?;
            conditions.push(
                format!("{} IN ({})", quote(lookup.value_column()), placeholders(values.len())),
                params,
            );
            let sql = format!("{}{}", lookup.select_sql(), conditions.where_sql());
            let mut stmt = conn.prepare(&sql)?;
            let labels: BTreeMap<String, String> = stmt
                .query_map(params_from_iter(conditions.params()), |row| lookup.option_from_row(row))?
                .collect::<Result<_, _>>()?;
            return Ok(labels);
        }

        let Some(ref_table) = &field.spec.reference_table_name else {
            return Err(EngineError::validation(
                "field",
                format!("'{}' is not a reference field", field.name()),
            ));
        };
        let table = ResolvedTable::new(schema, ref_table);
        let owner = owning_entity(conn, &table)?;
        let mut conditions = Self::scope_conditions(owner.as_ref(), caller)?;
        let key = field.spec.reference_column();
        conditions.push(
            format!("{} IN ({})", quote(key), placeholders(values.len())),
            params,
        );
        let sql = format!(
            "SELECT {}, {} FROM {}{}",
            quote(key),
            quote(field.spec.effective_display_field()),
            table.qualified(),
            conditions.where_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let labels: BTreeMap<String, String> = stmt
            .query_map(params_from_iter(conditions.params()), |row| {
                Ok((text_of(row.get_ref(0)?), text_of(row.get_ref(1)?)))
            })?
            .collect::<Result<_, _>>()?;
        Ok(labels)
    }
}

/// The live published entity whose table is `table`, if any.
fn owning_entity(conn: &Connection, table: &ResolvedTable) -> EngineResult<Option<EntityDefinition>> {
    for entity in entities::list_entities(conn, false)? {
        if !entity.is_published() || entity.schema_name != table.schema {
            continue;
        }
        let module = entity
            .module_id
            .map(|id| modules::require_module(conn, id))
            .transpose()?;
        if resolve_entity_table(&entity, module.as_ref()).ok().as_ref() == Some(table) {
            return Ok(Some(entity));
        }
    }
    Ok(None)
}
