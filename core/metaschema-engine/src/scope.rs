//! Data scope enforcement.
//!
//! Decides whether a caller may touch an entity's rows and, if so, which
//! partition predicate must be added to every query against its table. The
//! predicate pins the tenant and the entity's own level; coarser levels are
//! implied by the organizational hierarchy.

use metaschema_model::{CallerScope, DataScope, EntityDefinition};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a caller was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MissingTenant,
    MissingCompany,
    MissingBranch,
    MissingDepartment,
    /// The entity definition belongs to a different tenant.
    ForeignTenant,
}

impl DenialReason {
    fn missing(column: &str) -> Self {
        match column {
            "company_id" => Self::MissingCompany,
            "branch_id" => Self::MissingBranch,
            "department_id" => Self::MissingDepartment,
            _ => Self::MissingTenant,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingTenant => "caller has no tenant",
            Self::MissingCompany => "caller has no company",
            Self::MissingBranch => "caller has no branch",
            Self::MissingDepartment => "caller has no department",
            Self::ForeignTenant => "entity belongs to another tenant",
        })
    }
}

/// One `column = value` restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeClause {
    pub column: String,
    pub value: String,
}

/// Conjunction of clauses; empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePredicate {
    pub clauses: Vec<ScopeClause>,
}

impl ScopePredicate {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Renders the predicate as SQL with positional parameters. Columns are
    /// qualified with `alias` when given.
    pub fn to_sql(&self, alias: Option<&str>) -> (String, Vec<Value>) {
        if self.clauses.is_empty() {
            return ("1 = 1".into(), Vec::new());
        }
        let qualifier = alias.map(|a| format!("\"{a}\".")).unwrap_or_default();
        let sql = self
            .clauses
            .iter()
            .map(|c| format!("{qualifier}\"{}\" = ?", c.column))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = self
            .clauses
            .iter()
            .map(|c| Value::Text(c.value.clone()))
            .collect();
        (sql, params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScopeDecision {
    Allowed { predicate: ScopePredicate },
    Denied { reason: DenialReason },
}

impl ScopeDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Evaluates a caller against an entity's scope level.
///
/// Deleted entities are filtered out before this point by the caller.
pub fn check_scope(entity: &EntityDefinition, caller: &CallerScope) -> ScopeDecision {
    if let Some(owner) = entity.tenant_id {
        match caller.tenant_id {
            None => {
                return ScopeDecision::Denied {
                    reason: DenialReason::MissingTenant,
                };
            }
            Some(tenant) if tenant != owner => {
                return ScopeDecision::Denied {
                    reason: DenialReason::ForeignTenant,
                };
            }
            Some(_) => {}
        }
    }
    if entity.data_scope == DataScope::Platform {
        return ScopeDecision::Allowed {
            predicate: ScopePredicate::unrestricted(),
        };
    }

    let mut clauses = Vec::with_capacity(2);
    for column in entity.data_scope.partition_columns() {
        let Some(value) = caller.value_for(column) else {
            return ScopeDecision::Denied {
                reason: DenialReason::missing(column),
            };
        };
        if *column == "tenant_id" || Some(*column) == entity.data_scope.own_column() {
            clauses.push(ScopeClause {
                column: column.to_string(),
                value,
            });
        }
    }
    ScopeDecision::Allowed {
        predicate: ScopePredicate { clauses },
    }
}
