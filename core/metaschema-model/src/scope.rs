//! Organizational data scopes.

use metaschema_types::{BranchId, CompanyId, DepartmentId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Organizational level at which an entity's rows are partitioned.
///
/// Ordered from coarsest to finest. `Platform` is a first-class value: a
/// platform entity is shared by every tenant, which is distinct from a
/// tenant-scoped definition that merely has no owning tenant yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataScope {
    Platform,
    Tenant,
    Company,
    Branch,
    Department,
}

impl DataScope {
    pub const ALL: [DataScope; 5] = [
        DataScope::Platform,
        DataScope::Tenant,
        DataScope::Company,
        DataScope::Branch,
        DataScope::Department,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Tenant => "tenant",
            Self::Company => "company",
            Self::Branch => "branch",
            Self::Department => "department",
        }
    }

    /// Partition columns every row of an entity at this scope carries,
    /// coarsest first.
    pub fn partition_columns(&self) -> &'static [&'static str] {
        const COLUMNS: [&str; 4] = ["tenant_id", "company_id", "branch_id", "department_id"];
        match self {
            Self::Platform => &[],
            Self::Tenant => &COLUMNS[..1],
            Self::Company => &COLUMNS[..2],
            Self::Branch => &COLUMNS[..3],
            Self::Department => &COLUMNS[..4],
        }
    }

    /// Column holding this level's identifier, if any.
    pub fn own_column(&self) -> Option<&'static str> {
        self.partition_columns().last().copied()
    }
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| format!("unknown data scope '{s}'"))
    }
}

/// Every column name reserved for partitioning, regardless of scope.
pub const PARTITION_COLUMNS: [&str; 4] = ["tenant_id", "company_id", "branch_id", "department_id"];

/// The organizational context a caller is acting in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerScope {
    pub tenant_id: Option<TenantId>,
    pub company_id: Option<CompanyId>,
    pub branch_id: Option<BranchId>,
    pub department_id: Option<DepartmentId>,
}

impl CallerScope {
    /// A caller with no organizational context (platform operator or anonymous).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn with_company(mut self, company_id: CompanyId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn with_department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }

    /// Identifier the caller holds for the given partition column.
    pub fn value_for(&self, column: &str) -> Option<String> {
        match column {
            "tenant_id" => self.tenant_id.map(|id| id.to_string()),
            "company_id" => self.company_id.map(|id| id.to_string()),
            "branch_id" => self.branch_id.map(|id| id.to_string()),
            "department_id" => self.department_id.map(|id| id.to_string()),
            _ => None,
        }
    }
}
