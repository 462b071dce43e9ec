//! Dimension value tree (customers, products, regions, ...).
//!
//! Parent links are stored as edges of a [`DepGraph`]: a child is a
//! precedent of its parent, so `dependents(child) == [parent]` and
//! `precedents(parent) == children`. Cycle prevention on reparent is the
//! graph's ancestor walk.

use serde::Serialize;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::DimensionValueId;
use crate::dep_graph::DepGraph;
use crate::error::EngineError;

/// One node of the dimension tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DimensionValue {
    pub id: DimensionValueId,
    pub name: String,
    pub parent: Option<DimensionValueId>,
    /// Free-form category tag ("customer", "product", ...).
    pub scope_type: String,
    pub is_active: bool,
    /// Distance from the root (roots are level 0).
    pub hierarchy_level: u32,
    /// Ids from the root down to this value, inclusive.
    pub hierarchy_path: Vec<DimensionValueId>,
    pub sort_order: i64,
}

/// Registration request for a new dimension value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDimensionValue {
    pub id: DimensionValueId,
    pub name: String,
    pub parent: Option<DimensionValueId>,
    pub scope_type: String,
    pub is_active: bool,
    pub sort_order: i64,
}

impl NewDimensionValue {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DimensionValueId::new(id),
            name: name.into(),
            parent: None,
            scope_type: String::new(),
            is_active: true,
            sort_order: 0,
        }
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(DimensionValueId::new(parent));
        self
    }

    pub fn scope(mut self, scope_type: impl Into<String>) -> Self {
        self.scope_type = scope_type.into();
        self
    }

    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct DimensionTree {
    values: FxHashMap<DimensionValueId, DimensionValue>,
    /// child → parent edges
    links: DepGraph<DimensionValueId>,
}

impl DimensionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a batch of definitions in any order.
    ///
    /// Parents may be inactive here: deactivation only forbids attaching
    /// new children at runtime, and a stored plan may already contain them.
    pub fn from_defs(defs: Vec<NewDimensionValue>) -> Result<Self, EngineError> {
        let mut tree = Self::new();
        for def in &defs {
            if tree.values.contains_key(&def.id) {
                return Err(EngineError::DuplicateId(def.id.to_string()));
            }
            tree.values.insert(def.id.clone(), tree.detached(def));
        }
        for def in &defs {
            let Some(parent) = &def.parent else { continue };
            if !tree.values.contains_key(parent) {
                return Err(EngineError::ValueNotFound(parent.clone()));
            }
            if let Some(report) = tree.links.would_create_cycle(parent, std::slice::from_ref(&def.id)) {
                return Err(EngineError::CircularReferenceDetected(report));
            }
            tree.links.add_edge(&def.id, parent);
        }
        for root in tree.root_ids() {
            tree.refresh_paths(&root);
        }
        Ok(tree)
    }

    fn detached(&self, def: &NewDimensionValue) -> DimensionValue {
        DimensionValue {
            id: def.id.clone(),
            name: def.name.clone(),
            parent: def.parent.clone(),
            scope_type: def.scope_type.clone(),
            is_active: def.is_active,
            hierarchy_level: 0,
            hierarchy_path: vec![def.id.clone()],
            sort_order: def.sort_order,
        }
    }

    /// Register a new value, optionally under an existing active parent.
    pub fn register(&mut self, def: NewDimensionValue) -> Result<&DimensionValue, EngineError> {
        if self.values.contains_key(&def.id) {
            return Err(EngineError::DuplicateId(def.id.to_string()));
        }
        if let Some(parent) = &def.parent {
            let parent_value = self.require(parent)?;
            if !parent_value.is_active {
                return Err(EngineError::InactiveParent(parent.clone()));
            }
        }

        let id = def.id.clone();
        let value = self.detached(&def);
        self.values.insert(id.clone(), value);
        if let Some(parent) = &def.parent {
            self.links.add_edge(&id, parent);
        }
        self.refresh_paths(&id);
        self.require(&id)
    }

    /// Move `value` under `new_parent` (or to the root level with `None`).
    ///
    /// Returns the moved subtree, value first, with refreshed levels and
    /// paths. On error the tree is untouched.
    pub fn reparent(
        &mut self,
        value: &DimensionValueId,
        new_parent: Option<&DimensionValueId>,
    ) -> Result<Vec<DimensionValue>, EngineError> {
        self.validate_reparent(value, new_parent)?;

        let old_parent = self.values.get(value).and_then(|v| v.parent.clone());
        if let Some(old) = &old_parent {
            self.links.remove_edge(value, old);
        }
        if let Some(parent) = new_parent {
            self.links.add_edge(value, parent);
        }
        if let Some(v) = self.values.get_mut(value) {
            v.parent = new_parent.cloned();
        }
        self.refresh_paths(value);

        let mut moved = Vec::new();
        if let Some(v) = self.values.get(value) {
            moved.push(v.clone());
        }
        for id in self.descendants_of(value) {
            if let Some(v) = self.values.get(&id) {
                moved.push(v.clone());
            }
        }
        Ok(moved)
    }

    /// Validation half of [`reparent`](Self::reparent).
    pub fn validate_reparent(
        &self,
        value: &DimensionValueId,
        new_parent: Option<&DimensionValueId>,
    ) -> Result<(), EngineError> {
        self.require(value)?;
        let Some(parent) = new_parent else {
            return Ok(());
        };
        let parent_value = self.require(parent)?;
        // The new parent must not be the value itself or one of its descendants.
        if let Some(report) = self.links.would_create_cycle(parent, std::slice::from_ref(value)) {
            return Err(EngineError::CircularReferenceDetected(report));
        }
        if !parent_value.is_active {
            return Err(EngineError::InactiveParent(parent.clone()));
        }
        Ok(())
    }

    /// Soft-delete. Does not cascade and keeps the value in rollups.
    pub fn deactivate(&mut self, value: &DimensionValueId) -> Result<(), EngineError> {
        let v = self
            .values
            .get_mut(value)
            .ok_or_else(|| EngineError::ValueNotFound(value.clone()))?;
        if !v.is_active {
            return Err(EngineError::AlreadyInactive(value.clone()));
        }
        v.is_active = false;
        Ok(())
    }

    pub fn rename(&mut self, value: &DimensionValueId, name: impl Into<String>) -> Result<(), EngineError> {
        let v = self
            .values
            .get_mut(value)
            .ok_or_else(|| EngineError::ValueNotFound(value.clone()))?;
        v.name = name.into();
        Ok(())
    }

    pub fn get(&self, value: &DimensionValueId) -> Option<&DimensionValue> {
        self.values.get(value)
    }

    pub fn contains(&self, value: &DimensionValueId) -> bool {
        self.values.contains_key(value)
    }

    pub fn require(&self, value: &DimensionValueId) -> Result<&DimensionValue, EngineError> {
        self.values
            .get(value)
            .ok_or_else(|| EngineError::ValueNotFound(value.clone()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn parent_of(&self, value: &DimensionValueId) -> Option<&DimensionValueId> {
        self.values.get(value).and_then(|v| v.parent.as_ref())
    }

    /// Direct children ordered by sort order, then id.
    pub fn children_of(&self, value: &DimensionValueId) -> Vec<&DimensionValue> {
        let mut children: Vec<&DimensionValue> = self
            .links
            .precedents(value)
            .iter()
            .filter_map(|id| self.values.get(id))
            .collect();
        children.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// Ancestors from the immediate parent up to the root.
    pub fn ancestors_of(&self, value: &DimensionValueId) -> Vec<DimensionValueId> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = self.parent_of(value);
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            out.push(parent.clone());
            current = self.parent_of(parent);
        }
        out
    }

    /// All descendants in pre-order (children ordered as in `children_of`).
    pub fn descendants_of(&self, value: &DimensionValueId) -> Vec<DimensionValueId> {
        let mut out = Vec::new();
        let mut stack: Vec<DimensionValueId> =
            self.children_of(value).iter().rev().map(|v| v.id.clone()).collect();
        while let Some(id) = stack.pop() {
            stack.extend(self.children_of(&id).iter().rev().map(|v| v.id.clone()));
            out.push(id);
        }
        out
    }

    /// True if `ancestor` is a proper ancestor of `value`.
    pub fn is_ancestor(&self, ancestor: &DimensionValueId, value: &DimensionValueId) -> bool {
        self.ancestors_of(value).contains(ancestor)
    }

    pub fn roots(&self) -> Vec<&DimensionValue> {
        let mut roots: Vec<&DimensionValue> = self.values.values().filter(|v| v.parent.is_none()).collect();
        roots.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
        roots
    }

    fn root_ids(&self) -> Vec<DimensionValueId> {
        self.roots().iter().map(|v| v.id.clone()).collect()
    }

    /// Every value in display order: roots, each followed by its subtree.
    pub fn ordered(&self) -> Vec<&DimensionValue> {
        let mut out = Vec::with_capacity(self.values.len());
        for root in self.roots() {
            out.push(root);
            for id in self.descendants_of(&root.id) {
                if let Some(v) = self.values.get(&id) {
                    out.push(v);
                }
            }
        }
        out
    }

    /// Recompute level and path for `value` and its whole subtree.
    fn refresh_paths(&mut self, value: &DimensionValueId) {
        let mut path: Vec<DimensionValueId> = self.ancestors_of(value);
        path.reverse();

        let mut stack = vec![(value.clone(), path)];
        while let Some((id, mut path)) = stack.pop() {
            path.push(id.clone());
            for child in self.links.precedents(&id) {
                stack.push((child, path.clone()));
            }
            if let Some(v) = self.values.get_mut(&id) {
                v.hierarchy_level = (path.len() - 1) as u32;
                v.hierarchy_path = path;
            }
        }
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        self.links.assert_consistent();
        for v in self.values.values() {
            let parents = self.links.dependents(&v.id);
            assert_eq!(parents.first(), v.parent.as_ref(), "parent link for {}", v.id);
            assert!(parents.len() <= 1, "{} has several parents", v.id);
            assert_eq!(v.hierarchy_path.last(), Some(&v.id));
            assert_eq!(v.hierarchy_level as usize + 1, v.hierarchy_path.len());
            let mut expected = self.ancestors_of(&v.id);
            expected.reverse();
            expected.push(v.id.clone());
            assert_eq!(v.hierarchy_path, expected, "path of {}", v.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DimensionValueId {
        DimensionValueId::new(s)
    }

    /// ALL
    /// ├── DOMESTIC
    /// │   ├── DOM_EAST
    /// │   │   └── EAST_1
    /// │   └── DOM_WEST
    /// └── OVERSEAS
    fn sample() -> DimensionTree {
        DimensionTree::from_defs(vec![
            NewDimensionValue::new("EAST_1", "East 1").under("DOM_EAST"),
            NewDimensionValue::new("ALL", "All"),
            NewDimensionValue::new("DOMESTIC", "Domestic").under("ALL").sort_order(1),
            NewDimensionValue::new("OVERSEAS", "Overseas").under("ALL").sort_order(2),
            NewDimensionValue::new("DOM_WEST", "West").under("DOMESTIC").sort_order(2),
            NewDimensionValue::new("DOM_EAST", "East").under("DOMESTIC").sort_order(1),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_defs_any_order() {
        let tree = sample();
        tree.assert_consistent();
        let east_1 = tree.get(&id("EAST_1")).unwrap();
        assert_eq!(east_1.hierarchy_level, 3);
        assert_eq!(east_1.hierarchy_path, vec![id("ALL"), id("DOMESTIC"), id("DOM_EAST"), id("EAST_1")]);
    }

    #[test]
    fn test_from_defs_rejects_bad_input() {
        let dup = DimensionTree::from_defs(vec![
            NewDimensionValue::new("A", "A"),
            NewDimensionValue::new("A", "again"),
        ]);
        assert_eq!(dup.unwrap_err(), EngineError::DuplicateId("A".into()));

        let orphan = DimensionTree::from_defs(vec![NewDimensionValue::new("A", "A").under("NOPE")]);
        assert_eq!(orphan.unwrap_err(), EngineError::ValueNotFound(id("NOPE")));

        let looped = DimensionTree::from_defs(vec![
            NewDimensionValue::new("A", "A").under("B"),
            NewDimensionValue::new("B", "B").under("A"),
        ]);
        assert!(matches!(looped, Err(EngineError::CircularReferenceDetected(_))));
    }

    #[test]
    fn test_children_order() {
        let tree = sample();
        let children: Vec<&str> = tree.children_of(&id("DOMESTIC")).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(children, vec!["DOM_EAST", "DOM_WEST"]);
        assert!(tree.children_of(&id("EAST_1")).is_empty());
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let tree = sample();
        assert_eq!(tree.ancestors_of(&id("EAST_1")), vec![id("DOM_EAST"), id("DOMESTIC"), id("ALL")]);
        assert_eq!(
            tree.descendants_of(&id("DOMESTIC")),
            vec![id("DOM_EAST"), id("EAST_1"), id("DOM_WEST")]
        );
        assert!(tree.is_ancestor(&id("ALL"), &id("EAST_1")));
        assert!(!tree.is_ancestor(&id("EAST_1"), &id("ALL")));
    }

    #[test]
    fn test_self_parent_rejected() {
        let mut tree = sample();
        let err = tree.reparent(&id("DOM_EAST"), Some(&id("DOM_EAST"))).unwrap_err();
        assert!(matches!(err, EngineError::CircularReferenceDetected(_)));
        assert_eq!(tree.parent_of(&id("DOM_EAST")), Some(&id("DOMESTIC")));
        tree.assert_consistent();
    }

    #[test]
    fn test_descendant_parent_rejected() {
        let mut tree = sample();
        let err = tree.reparent(&id("DOMESTIC"), Some(&id("EAST_1"))).unwrap_err();
        let EngineError::CircularReferenceDetected(report) = err else {
            panic!("expected cycle");
        };
        assert!(report.nodes.contains(&"DOMESTIC".to_string()));
        assert!(report.nodes.contains(&"EAST_1".to_string()));
        assert_eq!(tree.parent_of(&id("DOMESTIC")), Some(&id("ALL")));
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let mut tree = sample();
        let moved = tree.reparent(&id("DOM_EAST"), Some(&id("OVERSEAS"))).unwrap();
        tree.assert_consistent();

        assert_eq!(moved.len(), 2);
        assert_eq!(moved[0].id, id("DOM_EAST"));
        assert_eq!(moved[0].hierarchy_path, vec![id("ALL"), id("OVERSEAS"), id("DOM_EAST")]);
        assert_eq!(moved[1].id, id("EAST_1"));
        assert_eq!(moved[1].hierarchy_level, 3);

        let west_only: Vec<&str> = tree.children_of(&id("DOMESTIC")).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(west_only, vec!["DOM_WEST"]);
    }

    #[test]
    fn test_reparent_to_root() {
        let mut tree = sample();
        let moved = tree.reparent(&id("DOM_EAST"), None).unwrap();
        tree.assert_consistent();
        assert_eq!(moved[0].hierarchy_level, 0);
        assert_eq!(moved[1].hierarchy_path, vec![id("DOM_EAST"), id("EAST_1")]);
        assert_eq!(tree.roots().len(), 2);
    }

    #[test]
    fn test_reparent_unknown_ids() {
        let mut tree = sample();
        assert_eq!(
            tree.reparent(&id("NOPE"), None).unwrap_err(),
            EngineError::ValueNotFound(id("NOPE"))
        );
        assert_eq!(
            tree.reparent(&id("DOM_EAST"), Some(&id("NOPE"))).unwrap_err(),
            EngineError::ValueNotFound(id("NOPE"))
        );
    }

    #[test]
    fn test_inactive_parent() {
        let mut tree = sample();
        tree.deactivate(&id("OVERSEAS")).unwrap();
        assert_eq!(
            tree.reparent(&id("DOM_EAST"), Some(&id("OVERSEAS"))).unwrap_err(),
            EngineError::InactiveParent(id("OVERSEAS"))
        );
        let err = tree
            .register(NewDimensionValue::new("OV_1", "Overseas 1").under("OVERSEAS"))
            .unwrap_err();
        assert_eq!(err, EngineError::InactiveParent(id("OVERSEAS")));
    }

    #[test]
    fn test_deactivate_is_soft() {
        let mut tree = sample();
        tree.deactivate(&id("DOMESTIC")).unwrap();
        assert_eq!(tree.deactivate(&id("DOMESTIC")).unwrap_err(), EngineError::AlreadyInactive(id("DOMESTIC")));
        // Not cascading, still in the tree
        assert!(tree.get(&id("DOM_EAST")).unwrap().is_active);
        assert_eq!(tree.children_of(&id("DOMESTIC")).len(), 2);
    }

    #[test]
    fn test_register_and_rename() {
        let mut tree = sample();
        let v = tree
            .register(NewDimensionValue::new("WEST_1", "West 1").under("DOM_WEST").scope("customer"))
            .unwrap();
        assert_eq!(v.hierarchy_level, 3);
        assert_eq!(v.scope_type, "customer");
        tree.assert_consistent();

        tree.rename(&id("WEST_1"), "Westside").unwrap();
        assert_eq!(tree.get(&id("WEST_1")).unwrap().name, "Westside");
        assert_eq!(tree.rename(&id("NOPE"), "x").unwrap_err(), EngineError::ValueNotFound(id("NOPE")));

        let dup = tree.register(NewDimensionValue::new("WEST_1", "again")).unwrap_err();
        assert_eq!(dup, EngineError::DuplicateId("WEST_1".into()));
    }

    #[test]
    fn test_ordered_walk() {
        let tree = sample();
        let order: Vec<&str> = tree.ordered().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(order, vec!["ALL", "DOMESTIC", "DOM_EAST", "EAST_1", "DOM_WEST", "OVERSEAS"]);
    }
}
