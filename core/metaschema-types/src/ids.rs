//! Identifier newtypes.
//!
//! Uses UUID v7 for time-ordered, globally unique identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new identifier with the current timestamp.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from a string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a module (a deployable unit owning a table namespace).
    ModuleId
);
uuid_id!(
    /// Identifier of an entity definition.
    EntityDefId
);
uuid_id!(
    /// Identifier of a field definition.
    FieldId
);
uuid_id!(
    /// Identifier of a field group.
    FieldGroupId
);
uuid_id!(
    /// Identifier of a lookup configuration.
    LookupId
);
uuid_id!(
    /// Identifier of a cascading lookup rule.
    RuleId
);
uuid_id!(
    /// Identifier of a migration ledger record.
    MigrationId
);
uuid_id!(
    /// Tenant (top-level customer organization).
    TenantId
);
uuid_id!(
    /// Company inside a tenant.
    CompanyId
);
uuid_id!(
    /// Branch inside a company.
    BranchId
);
uuid_id!(
    /// Department inside a branch.
    DepartmentId
);
