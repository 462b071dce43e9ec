//! Generic dependency graph shared by the dimension tree and the subject graph.
//!
//! Tracks precedents (nodes a node depends on) and dependents (nodes that
//! depend on a given node).
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! For the dimension tree a child is a precedent of its parent (the parent
//! total depends on the child), so walking dependents climbs toward the root.
//! For the subject graph an input is a precedent of its aggregate.

use std::fmt::Display;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::recalc::CycleReport;

/// Bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = nodes that B depends on (precedents)
/// - `succs[A]` = nodes that depend on A (dependents)
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
/// 4. **Atomic updates:** `replace_edges` is the only mutator that touches both maps.
#[derive(Debug, Clone)]
pub struct DepGraph<K> {
    preds: FxHashMap<K, FxHashSet<K>>,
    succs: FxHashMap<K, FxHashSet<K>>,
}

impl<K> Default for DepGraph<K> {
    fn default() -> Self {
        Self { preds: FxHashMap::default(), succs: FxHashMap::default() }
    }
}

impl<K> DepGraph<K>
where
    K: Clone + Eq + Hash + Ord + Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes this node depends on, sorted.
    pub fn precedents(&self, node: &K) -> Vec<K> {
        sorted(self.preds.get(node))
    }

    /// Nodes depending on this node, sorted.
    pub fn dependents(&self, node: &K) -> Vec<K> {
        sorted(self.succs.get(node))
    }

    pub fn precedent_count(&self, node: &K) -> usize {
        self.preds.get(node).map_or(0, |s| s.len())
    }

    pub fn dependent_count(&self, node: &K) -> usize {
        self.succs.get(node).map_or(0, |s| s.len())
    }

    pub fn has_edge(&self, from: &K, to: &K) -> bool {
        self.succs.get(from).map_or(false, |s| s.contains(to))
    }

    /// Replace all precedents of `node` atomically.
    ///
    /// Pass an empty set to clear all incoming edges.
    pub fn replace_edges(&mut self, node: &K, new_preds: FxHashSet<K>) {
        if let Some(old_preds) = self.preds.remove(node) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(node);
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        if new_preds.is_empty() {
            return;
        }

        for pred in &new_preds {
            self.succs.entry(pred.clone()).or_default().insert(node.clone());
        }
        self.preds.insert(node.clone(), new_preds);
    }

    /// Add a single edge `from → to` (`to` depends on `from`).
    pub fn add_edge(&mut self, from: &K, to: &K) {
        let mut preds: FxHashSet<K> = self.preds.get(to).cloned().unwrap_or_default();
        preds.insert(from.clone());
        self.replace_edges(to, preds);
    }

    /// Remove a single edge `from → to` if present.
    pub fn remove_edge(&mut self, from: &K, to: &K) {
        let Some(mut preds) = self.preds.get(to).cloned() else {
            return;
        };
        if preds.remove(from) {
            self.replace_edges(to, preds);
        }
    }

    /// Check if giving `node` the precedents `new_preds` would create a cycle.
    ///
    /// Does not modify the graph. A cycle appears if `node` can already reach
    /// any of `new_preds` by following dependent edges. The walk keeps a
    /// visited set, so on a tree it is bounded by depth.
    pub fn would_create_cycle(&self, node: &K, new_preds: &[K]) -> Option<CycleReport> {
        if new_preds.contains(node) {
            return Some(CycleReport::self_reference(node));
        }

        let targets: FxHashSet<&K> = new_preds.iter().collect();
        let mut came_from: FxHashMap<K, K> = FxHashMap::default();
        let mut visited: FxHashSet<K> = FxHashSet::default();
        let mut stack = vec![node.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for dep in self.dependents(&current) {
                if targets.contains(&dep) {
                    // dep -> ... -> node would close with node -> dep
                    let mut path = vec![dep.clone(), current.clone()];
                    let mut cursor = current.clone();
                    while let Some(prev) = came_from.get(&cursor) {
                        path.push(prev.clone());
                        cursor = prev.clone();
                    }
                    path.reverse();
                    path.push(path[0].clone());
                    return Some(CycleReport::cycle(path.iter().map(|k| k.to_string()).collect()));
                }
                if !visited.contains(&dep) {
                    came_from.entry(dep.clone()).or_insert_with(|| current.clone());
                    stack.push(dep);
                }
            }
        }

        None
    }

    /// All nodes reachable from `node` by following dependents (excluding `node`).
    pub fn reachable_dependents(&self, node: &K) -> FxHashSet<K> {
        let mut seen = FxHashSet::default();
        let mut stack = self.dependents(node);
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.dependents(&current));
            }
        }
        seen
    }

    /// All nodes reachable from `node` by following precedents (excluding `node`).
    pub fn reachable_precedents(&self, node: &K) -> FxHashSet<K> {
        let mut seen = FxHashSet::default();
        let mut stack = self.precedents(node);
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.precedents(&current));
            }
        }
        seen
    }

    /// Topological order of `nodes`: precedents before dependents.
    ///
    /// Only edges between members of `nodes` are considered. Kahn's algorithm
    /// with sorted tie-breaking for deterministic output.
    pub fn topo_order(&self, nodes: &FxHashSet<K>) -> Result<Vec<K>, CycleReport> {
        let mut in_degree: FxHashMap<&K, usize> = FxHashMap::default();
        for node in nodes {
            let count = self
                .preds
                .get(node)
                .map(|preds| preds.iter().filter(|p| nodes.contains(*p)).count())
                .unwrap_or(0);
            in_degree.insert(node, count);
        }

        // Sorted descending so the smallest is popped first
        let mut queue: Vec<K> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&node, _)| node.clone())
            .collect();
        queue.sort_by(|a, b| b.cmp(a));

        let mut result = Vec::with_capacity(nodes.len());
        while let Some(node) = queue.pop() {
            let mut new_zero = Vec::new();
            for dep in self.dependents(&node) {
                if let Some(deg) = in_degree.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        new_zero.push(dep);
                    }
                }
            }
            result.push(node);
            for n in new_zero.into_iter().rev() {
                queue.push(n);
            }
        }

        if result.len() < nodes.len() {
            let mut stuck: Vec<String> = nodes
                .iter()
                .filter(|n| !result.contains(n))
                .map(|n| n.to_string())
                .collect();
            stuck.sort();
            return Err(CycleReport::cycle(stuck));
        }

        Ok(result)
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (node, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {}", node);
            for pred in preds {
                assert!(
                    self.succs.get(pred).map_or(false, |s| s.contains(node)),
                    "Missing succ edge: {} should have {} in dependents",
                    pred,
                    node
                );
            }
        }
        for (node, succs) in &self.succs {
            assert!(!succs.is_empty(), "Empty succs set stored for {}", node);
            for dep in succs {
                assert!(
                    self.preds.get(dep).map_or(false, |s| s.contains(node)),
                    "Missing pred edge: {} should have {} in precedents",
                    dep,
                    node
                );
            }
        }
    }
}

fn sorted<K: Clone + Ord>(set: Option<&FxHashSet<K>>) -> Vec<K> {
    let mut out: Vec<K> = set.into_iter().flat_map(|s| s.iter().cloned()).collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(nodes: &[&str]) -> FxHashSet<String> {
        nodes.iter().map(|s| s.to_string()).collect()
    }

    fn s(node: &str) -> String {
        node.to_string()
    }

    #[test]
    fn test_empty_graph() {
        let graph: DepGraph<String> = DepGraph::new();
        assert!(graph.precedents(&s("A")).is_empty());
        assert!(graph.dependents(&s("A")).is_empty());
        graph.assert_consistent();
    }

    #[test]
    fn test_single_edge() {
        // GP depends on SALES
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES"]));
        graph.assert_consistent();

        assert_eq!(graph.precedents(&s("GP")), vec![s("SALES")]);
        assert_eq!(graph.dependents(&s("SALES")), vec![s("GP")]);
        assert!(graph.has_edge(&s("SALES"), &s("GP")));
        assert!(!graph.has_edge(&s("GP"), &s("SALES")));
    }

    #[test]
    fn test_rewiring() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES", "COGS"]));
        graph.replace_edges(&s("GP"), set(&["SALES"]));
        graph.assert_consistent();

        assert!(graph.dependents(&s("COGS")).is_empty());
        assert!(!graph.succs.contains_key(&s("COGS")));
    }

    #[test]
    fn test_add_and_remove_edge() {
        let mut graph = DepGraph::new();
        graph.add_edge(&s("EAST"), &s("DOM"));
        graph.add_edge(&s("WEST"), &s("DOM"));
        graph.assert_consistent();
        assert_eq!(graph.precedents(&s("DOM")), vec![s("EAST"), s("WEST")]);

        graph.remove_edge(&s("EAST"), &s("DOM"));
        graph.assert_consistent();
        assert_eq!(graph.precedents(&s("DOM")), vec![s("WEST")]);

        graph.remove_edge(&s("WEST"), &s("DOM"));
        graph.assert_consistent();
        assert_eq!(graph.precedent_count(&s("DOM")), 0);
    }

    #[test]
    fn test_self_reference() {
        let graph: DepGraph<String> = DepGraph::new();
        let report = graph.would_create_cycle(&s("A"), &[s("A")]).unwrap();
        assert_eq!(report.nodes, vec![s("A")]);
    }

    #[test]
    fn test_indirect_cycle_path() {
        // OP depends on GP, GP depends on SALES. Making SALES depend on OP closes a loop.
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES"]));
        graph.replace_edges(&s("OP"), set(&["GP"]));

        let report = graph.would_create_cycle(&s("SALES"), &[s("OP")]).unwrap();
        assert_eq!(report.nodes, vec![s("SALES"), s("GP"), s("OP"), s("SALES")]);
        assert!(report.message.contains("SALES → GP → OP → SALES"));

        assert!(graph.would_create_cycle(&s("OP"), &[s("SALES")]).is_none());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("B"), set(&["A"]));
        graph.replace_edges(&s("C"), set(&["A"]));
        assert!(graph.would_create_cycle(&s("D"), &[s("B"), s("C")]).is_none());
    }

    #[test]
    fn test_reachability() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES", "COGS"]));
        graph.replace_edges(&s("OP"), set(&["GP", "SGA"]));

        assert_eq!(graph.reachable_dependents(&s("SALES")), set(&["GP", "OP"]));
        assert_eq!(graph.reachable_precedents(&s("OP")), set(&["GP", "SGA", "SALES", "COGS"]));
    }

    #[test]
    fn test_topo_chain_and_ties() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES", "COGS"]));
        graph.replace_edges(&s("OP"), set(&["GP", "SGA"]));

        let order = graph.topo_order(&set(&["OP", "GP", "SALES", "COGS", "SGA"])).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("SALES") < pos("GP"));
        assert!(pos("COGS") < pos("GP"));
        assert!(pos("GP") < pos("OP"));
        assert!(pos("SGA") < pos("OP"));
        // Stable: smallest ready node first
        assert_eq!(order[0], "COGS");
    }

    #[test]
    fn test_topo_ignores_edges_outside_subset() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("GP"), set(&["SALES"]));
        graph.replace_edges(&s("OP"), set(&["GP"]));
        assert_eq!(graph.topo_order(&set(&["OP"])).unwrap(), vec![s("OP")]);
    }

    #[test]
    fn test_topo_reports_cycle() {
        let mut graph = DepGraph::new();
        graph.replace_edges(&s("A"), set(&["B"]));
        graph.replace_edges(&s("B"), set(&["A"]));
        let err = graph.topo_order(&set(&["A", "B"])).unwrap_err();
        assert_eq!(err.nodes, vec![s("A"), s("B")]);
    }
}
