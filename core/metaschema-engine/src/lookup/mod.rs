//! Reference-field option resolution.
//!
//! - [`RuleGraph`]: the parent → child graph of cascading rules
//! - [`LookupResolver`]: paginated, searchable, scope-filtered option lists
//!   and display labels for stored reference values
//! - [`RecentSelections`]: per-session recently used values shown first

mod graph;
mod recent;
mod resolver;
mod sql;

pub use graph::RuleGraph;
pub use recent::RecentSelections;
pub use resolver::{CompiledLookup, LookupOption, LookupPage, LookupResolver, OptionsRequest};
pub use sql::{contains_pattern, filter_sql};
