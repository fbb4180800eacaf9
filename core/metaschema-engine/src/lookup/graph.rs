//! Dependency graph of cascading lookup rules.
//!
//! Edges run parent → child. The graph must stay acyclic; a rule whose child
//! already reaches its parent is refused before it is stored.

use metaschema_model::CascadingLookupRule;
use metaschema_types::LookupId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct RuleGraph {
    edges: BTreeMap<LookupId, BTreeSet<LookupId>>,
}

impl RuleGraph {
    pub fn from_rules(rules: &[CascadingLookupRule]) -> Self {
        let mut graph = Self::default();
        for rule in rules {
            graph.add_edge(rule.parent_lookup_id, rule.child_lookup_id);
        }
        graph
    }

    pub fn add_edge(&mut self, parent: LookupId, child: LookupId) {
        self.edges.entry(parent).or_default().insert(child);
    }

    pub fn children(&self, id: LookupId) -> impl Iterator<Item = LookupId> + '_ {
        self.edges.get(&id).into_iter().flatten().copied()
    }

    /// True if `to` is reachable from `from` by one or more edges.
    pub fn reaches(&self, from: LookupId, to: LookupId) -> bool {
        self.descendants(from).contains(&to)
    }

    /// True if adding `parent → child` would close a cycle.
    pub fn would_cycle(&self, parent: LookupId, child: LookupId) -> bool {
        parent == child || self.reaches(child, parent)
    }

    /// Every lookup that directly or transitively cascades from `id`, in
    /// breadth-first order.
    pub fn descendants(&self, id: LookupId) -> Vec<LookupId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<LookupId> = self.children(id).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self.children(next));
            }
        }
        out
    }

    /// Kahn's algorithm; `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<LookupId>> {
        let mut indegree: BTreeMap<LookupId, usize> = BTreeMap::new();
        for (parent, children) in &self.edges {
            indegree.entry(*parent).or_default();
            for child in children {
                *indegree.entry(*child).or_default() += 1;
            }
        }
        let mut ready: VecDeque<LookupId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(indegree.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for child in self.children(id) {
                if let Some(d) = indegree.get_mut(&child) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }
        (order.len() == indegree.len()).then_some(order)
    }
}
