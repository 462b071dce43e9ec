//! Structural edits: dimension reparenting, formula definition, row
//! registration and the bookkeeping edits around them.
//!
//! Each edit is validated and planned against a working copy of the part it
//! changes. The copy replaces the original only after the recalculation plan
//! succeeded, so a rejected edit never leaves the tree, graph or store
//! half-changed.

use log::{debug, info, warn};
use serde::Serialize;

use rustc_hash::FxHashSet;

use crate::cell_id::{DimensionValueId, SubjectId};
use crate::cell_store::{validate_row, CellStore};
use crate::dimension::{DimensionTree, DimensionValue, NewDimensionValue};
use crate::error::EngineError;
use crate::period::PeriodHierarchy;
use crate::recalc::{CellUpdate, RecalcEngine, RecalcPlan};
use crate::rollup::{RowRegistry, Topology};
use crate::subject::{FormulaTerm, Subject, SubjectClass, SubjectGraph};

/// Result of a successful reparent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReparentOutcome {
    /// The moved value followed by its descendants, with refreshed paths.
    pub moved_subtree: Vec<DimensionValue>,
    pub recomputed_cells: Vec<CellUpdate>,
}

/// Result of a successful formula definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormulaOutcome {
    pub recomputed_cells: Vec<CellUpdate>,
}

pub struct HierarchyMutator<'a> {
    periods: &'a PeriodHierarchy,
    dimensions: &'a mut DimensionTree,
    subjects: &'a mut SubjectGraph,
    store: &'a mut CellStore,
}

impl<'a> HierarchyMutator<'a> {
    pub fn new(
        periods: &'a PeriodHierarchy,
        dimensions: &'a mut DimensionTree,
        subjects: &'a mut SubjectGraph,
        store: &'a mut CellStore,
    ) -> Self {
        Self { periods, dimensions, subjects, store }
    }

    /// Move a dimension value and recompute every subject with rows in the
    /// moved subtree.
    ///
    /// Rows that gained rollup children lose their entered values.
    pub fn reparent(
        &mut self,
        value: &DimensionValueId,
        new_parent: Option<&DimensionValueId>,
    ) -> Result<ReparentOutcome, EngineError> {
        let mut tree = self.dimensions.clone();
        let moved_subtree = tree.reparent(value, new_parent)?;

        let mut affected: FxHashSet<SubjectId> = FxHashSet::default();
        for moved in &moved_subtree {
            affected.extend(self.store.rows().subjects_with(&moved.id));
        }

        let plan = {
            let topo = Topology::new(self.periods, &tree, &*self.subjects, self.store.rows());
            RecalcEngine::new(topo, &*self.store).plan_subjects(&affected)?
        };
        let recomputed_cells = self.commit(plan);
        *self.dimensions = tree;

        info!(
            "reparented {} under {} ({} values moved, {} cells changed)",
            value,
            new_parent.map_or("<root>".to_string(), |p| p.to_string()),
            moved_subtree.len(),
            recomputed_cells.len()
        );
        Ok(ReparentOutcome { moved_subtree, recomputed_cells })
    }

    /// Replace the formula of an aggregate subject and recompute it with
    /// everything downstream.
    pub fn define_formula(&mut self, subject: &SubjectId, terms: &[FormulaTerm]) -> Result<FormulaOutcome, EngineError> {
        let mut graph = self.subjects.clone();
        graph.define_formula(subject, terms)?;

        let scope: FxHashSet<SubjectId> = std::iter::once(subject.clone()).collect();
        let plan = {
            let topo = Topology::new(self.periods, &*self.dimensions, &graph, self.store.rows());
            RecalcEngine::new(topo, &*self.store).plan_subjects(&scope)?
        };
        let recomputed_cells = self.commit(plan);
        *self.subjects = graph;

        info!("defined formula of {} ({} terms, {} cells changed)", subject, terms.len(), recomputed_cells.len());
        Ok(FormulaOutcome { recomputed_cells })
    }

    /// Register a dimension row for a BASE subject and recompute it.
    pub fn register_row(
        &mut self,
        subject: &SubjectId,
        dimension: &DimensionValueId,
    ) -> Result<Vec<CellUpdate>, EngineError> {
        validate_row(&*self.dimensions, &*self.subjects, subject, dimension)?;
        let mut rows: RowRegistry = self.store.rows().clone();
        if !rows.insert(subject.clone(), dimension.clone()) {
            return Err(EngineError::DuplicateId(format!("{}/{}", subject, dimension)));
        }

        let scope: FxHashSet<SubjectId> = std::iter::once(subject.clone()).collect();
        let plan = {
            let topo = Topology::new(self.periods, &*self.dimensions, &*self.subjects, &rows);
            RecalcEngine::new(topo, &*self.store).plan_subjects(&scope)?
        };
        let updates = self.commit(plan);
        self.store.replace_rows(rows);

        info!("registered row {}/{}", subject, dimension);
        Ok(updates)
    }

    pub fn register_dimension_value(&mut self, def: NewDimensionValue) -> Result<DimensionValue, EngineError> {
        let value = self.dimensions.register(def)?.clone();
        info!("registered dimension value {} at level {}", value.id, value.hierarchy_level);
        Ok(value)
    }

    pub fn deactivate(&mut self, value: &DimensionValueId) -> Result<(), EngineError> {
        self.dimensions.deactivate(value)?;
        info!("deactivated dimension value {}", value);
        Ok(())
    }

    pub fn rename(&mut self, value: &DimensionValueId, name: &str) -> Result<(), EngineError> {
        self.dimensions.rename(value, name)?;
        info!("renamed dimension value {} to '{}'", value, name);
        Ok(())
    }

    /// Register a subject and cache its derived cells.
    ///
    /// Aggregates start with an empty formula. Dependents left referencing
    /// a removed subject of the same id are recomputed too, unless another
    /// of their inputs is still missing.
    pub fn register_subject(
        &mut self,
        id: SubjectId,
        name: &str,
        class: SubjectClass,
    ) -> Result<Vec<CellUpdate>, EngineError> {
        let mut graph = self.subjects.clone();
        graph.register(id.clone(), name, class)?;

        let seed: FxHashSet<SubjectId> = std::iter::once(id.clone()).collect();
        let scope: FxHashSet<SubjectId> = graph
            .closure(&seed)?
            .into_iter()
            .filter(|s| graph.base_inputs(s).is_ok())
            .collect();
        let plan = {
            let topo = Topology::new(self.periods, &*self.dimensions, &graph, self.store.rows());
            RecalcEngine::new(topo, &*self.store).plan_only(&scope)?
        };
        let updates = self.commit(plan);
        *self.subjects = graph;

        info!("registered {:?} subject {} ({} cells changed)", class, id, updates.len());
        Ok(updates)
    }

    /// Remove a subject with all its rows and cells.
    ///
    /// Dependents keep their formula terms but lose their cached values.
    /// They read as empty and fail to recompute until redefined.
    pub fn remove_subject(&mut self, subject: &SubjectId) -> Result<Subject, EngineError> {
        let dependents = self.subjects.transitive_dependents(subject)?;
        let removed = self.subjects.remove(subject)?;
        self.store.remove_subject(subject);

        if !dependents.is_empty() {
            let cleared: usize = dependents.iter().map(|d| self.store.clear_derived_of(d)).sum();
            warn!(
                "removed subject {} is still referenced by {} ({} cached cells dropped)",
                subject,
                dependents.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", "),
                cleared
            );
        }
        info!("removed subject {}", subject);
        Ok(removed)
    }

    fn commit(&mut self, plan: RecalcPlan) -> Vec<CellUpdate> {
        let (updates, report) = self.store.commit(plan);
        debug!("{}", report.log_line());
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::cell_id::{CellKey, Row};
    use crate::period::PeriodId;

    fn sid(s: &str) -> SubjectId {
        SubjectId::new(s)
    }

    fn did(s: &str) -> DimensionValueId {
        DimensionValueId::new(s)
    }

    struct Fixture {
        periods: PeriodHierarchy,
        dims: DimensionTree,
        subjects: SubjectGraph,
        store: CellStore,
    }

    impl Fixture {
        /// DOMESTIC > {DOM_EAST, DOM_WEST}, OVERSEAS; SALES rows at all
        /// four values, GP = SALES.
        fn new() -> Self {
            let dims = DimensionTree::from_defs(vec![
                NewDimensionValue::new("DOMESTIC", "Domestic"),
                NewDimensionValue::new("DOM_EAST", "East").under("DOMESTIC"),
                NewDimensionValue::new("DOM_WEST", "West").under("DOMESTIC"),
                NewDimensionValue::new("OVERSEAS", "Overseas"),
            ])
            .unwrap();
            let mut subjects = SubjectGraph::new();
            subjects.register(sid("SALES"), "Sales", SubjectClass::Base).unwrap();
            subjects.register(sid("GP"), "GP", SubjectClass::Aggregate).unwrap();
            subjects.define_formula(&sid("GP"), &[FormulaTerm::new("SALES", 1)]).unwrap();
            let periods = PeriodHierarchy::default();
            let mut store = CellStore::new();
            for d in ["DOMESTIC", "DOM_EAST", "DOM_WEST", "OVERSEAS"] {
                store.register_row(&dims, &subjects, &sid("SALES"), &did(d)).unwrap();
            }
            for (d, v) in [("DOM_EAST", 100), ("DOM_WEST", 20), ("OVERSEAS", 3)] {
                store
                    .set_leaf(&periods, &dims, &subjects, Row::scoped(sid("SALES"), did(d)), PeriodId::Month(1), Amount::from_minor(v))
                    .unwrap();
            }
            let plan = {
                let topo = Topology::new(&periods, &dims, &subjects, store.rows());
                RecalcEngine::new(topo, &store).plan_full().unwrap()
            };
            store.commit(plan);
            Self { periods, dims, subjects, store }
        }

        fn mutator(&mut self) -> HierarchyMutator<'_> {
            HierarchyMutator::new(&self.periods, &mut self.dims, &mut self.subjects, &mut self.store)
        }

        fn get(&self, subject: &str, dim: Option<&str>, period: PeriodId) -> Option<i64> {
            let row = Row::new(sid(subject), dim.map(did));
            self.store.get(&row, period).map(|a| a.minor_units())
        }
    }

    #[test]
    fn test_reparent_moves_rollups() {
        let mut fx = Fixture::new();
        assert_eq!(fx.get("SALES", Some("DOMESTIC"), PeriodId::Month(1)), Some(120));

        let outcome = fx.mutator().reparent(&did("DOM_EAST"), Some(&did("OVERSEAS"))).unwrap();
        assert_eq!(outcome.moved_subtree.len(), 1);
        assert_eq!(fx.get("SALES", Some("DOMESTIC"), PeriodId::Month(1)), Some(20));
        assert_eq!(fx.get("SALES", Some("DOMESTIC"), PeriodId::Annual), Some(20));
        // OVERSEAS became a rollup: its entered 3 is discarded
        assert_eq!(fx.get("SALES", Some("OVERSEAS"), PeriodId::Month(1)), Some(100));
        assert_eq!(fx.get("SALES", None, PeriodId::Annual), Some(120));
        assert_eq!(fx.get("GP", Some("OVERSEAS"), PeriodId::Quarter(1)), Some(100));

        let changed: Vec<String> = outcome.recomputed_cells.iter().map(|u| u.key().to_string()).collect();
        assert!(changed.contains(&"SALES/DOMESTIC@P01".to_string()));
        assert!(changed.contains(&"GP/OVERSEAS@FY".to_string()));
        assert!(fx.store.leaf(&CellKey::new(Row::scoped(sid("SALES"), did("OVERSEAS")), PeriodId::Month(1))).is_none());
    }

    #[test]
    fn test_failed_reparent_changes_nothing() {
        let mut fx = Fixture::new();
        let before = fx.store.derived_cells().len();
        let err = fx.mutator().reparent(&did("DOMESTIC"), Some(&did("DOM_EAST"))).unwrap_err();
        assert!(matches!(err, EngineError::CircularReferenceDetected(_)));
        assert_eq!(fx.dims.parent_of(&did("DOMESTIC")), None);
        assert_eq!(fx.store.derived_cells().len(), before);
        assert_eq!(fx.get("SALES", Some("DOMESTIC"), PeriodId::Month(1)), Some(120));
    }

    #[test]
    fn test_define_formula_recomputes_downstream() {
        let mut fx = Fixture::new();
        let outcome = fx
            .mutator()
            .define_formula(&sid("GP"), &[FormulaTerm::new("SALES", 2)])
            .unwrap();
        assert_eq!(fx.get("GP", None, PeriodId::Month(1)), Some(246));
        assert!(!outcome.recomputed_cells.is_empty());
        assert!(outcome.recomputed_cells.iter().all(|u| u.row.subject == sid("GP")));
    }

    #[test]
    fn test_failed_formula_changes_nothing() {
        let mut fx = Fixture::new();
        let err = fx
            .mutator()
            .define_formula(&sid("GP"), &[FormulaTerm::new("GP", 1)])
            .unwrap_err();
        assert!(matches!(err, EngineError::CircularReferenceDetected(_)));
        assert_eq!(fx.subjects.inputs_of(&sid("GP")), &[FormulaTerm::new("SALES", 1)]);
        assert_eq!(fx.get("GP", None, PeriodId::Month(1)), Some(123));
    }

    #[test]
    fn test_register_row_turns_totals_into_rollup() {
        let mut fx = Fixture::new();
        fx.mutator().register_subject(sid("COGS"), "COGS", SubjectClass::Base).unwrap();
        fx.store
            .set_leaf(&fx.periods, &fx.dims, &fx.subjects, Row::totals(sid("COGS")), PeriodId::Month(2), Amount::from_minor(9))
            .unwrap();

        fx.mutator().register_row(&sid("COGS"), &did("OVERSEAS")).unwrap();
        // Totals row is now derived; its entered value is gone
        assert_eq!(fx.get("COGS", None, PeriodId::Month(2)), Some(0));
        assert_eq!(fx.store.leaf_count(), 3);

        let dup = fx.mutator().register_row(&sid("COGS"), &did("OVERSEAS")).unwrap_err();
        assert_eq!(dup, EngineError::DuplicateId("COGS/OVERSEAS".into()));
        let not_base = fx.mutator().register_row(&sid("GP"), &did("OVERSEAS")).unwrap_err();
        assert_eq!(not_base, EngineError::NotBase(sid("GP")));
    }

    #[test]
    fn test_remove_subject_leaves_dependents_dangling() {
        let mut fx = Fixture::new();
        assert_eq!(fx.get("GP", Some("DOMESTIC"), PeriodId::Month(1)), Some(120));
        fx.mutator().remove_subject(&sid("SALES")).unwrap();
        assert_eq!(fx.store.leaf_count(), 0);
        // GP keeps its formula but serves nothing until it can recompute
        assert_eq!(fx.get("GP", None, PeriodId::Annual), None);
        assert_eq!(fx.get("GP", Some("DOMESTIC"), PeriodId::Month(1)), None);
        assert_eq!(fx.store.derived_count(), 0);
        let err = fx
            .mutator()
            .define_formula(&sid("GP"), &[FormulaTerm::new("SALES", 1)])
            .unwrap_err();
        assert_eq!(err, EngineError::SubjectNotFound(sid("SALES")));
        fx.mutator().define_formula(&sid("GP"), &[]).unwrap();
        assert_eq!(fx.get("GP", None, PeriodId::Annual), Some(0));
    }

    #[test]
    fn test_register_subject_caches_every_derived_cell() {
        let mut fx = Fixture::new();
        let updates = fx.mutator().register_subject(sid("RENT"), "Rent", SubjectClass::Base).unwrap();
        // Totals row: months are leaves, the seven rollup periods are cached
        assert_eq!(updates.len(), 7);
        assert!(updates.iter().all(|u| u.value == Amount::ZERO));
        assert_eq!(fx.get("RENT", None, PeriodId::Quarter(2)), Some(0));
        assert_eq!(fx.get("RENT", None, PeriodId::Month(1)), None);

        fx.mutator().register_subject(sid("NET"), "Net", SubjectClass::Aggregate).unwrap();
        assert_eq!(fx.get("NET", None, PeriodId::Month(4)), Some(0));
        assert_eq!(fx.get("NET", None, PeriodId::Annual), Some(0));

        let before = fx.store.derived_count();
        let dup = fx.mutator().register_subject(sid("RENT"), "Rent", SubjectClass::Base).unwrap_err();
        assert_eq!(dup, EngineError::DuplicateId("RENT".into()));
        assert_eq!(fx.store.derived_count(), before);
    }

    #[test]
    fn test_reregistered_input_recomputes_dependents() {
        let mut fx = Fixture::new();
        fx.mutator().remove_subject(&sid("SALES")).unwrap();

        let updates = fx.mutator().register_subject(sid("SALES"), "Sales", SubjectClass::Base).unwrap();
        assert!(updates.iter().any(|u| u.row.subject == sid("GP")));
        assert_eq!(fx.get("GP", None, PeriodId::Month(1)), Some(0));
        // Rows of the old SALES are gone, and so are GP's
        assert_eq!(fx.get("GP", Some("DOMESTIC"), PeriodId::Month(1)), None);
    }

    #[test]
    fn test_register_subject_skips_dependents_with_other_missing_inputs() {
        let mut fx = Fixture::new();
        fx.mutator().register_subject(sid("COGS"), "COGS", SubjectClass::Base).unwrap();
        fx.mutator()
            .define_formula(&sid("GP"), &[FormulaTerm::new("SALES", 1), FormulaTerm::new("COGS", -1)])
            .unwrap();
        fx.mutator().remove_subject(&sid("SALES")).unwrap();
        fx.mutator().remove_subject(&sid("COGS")).unwrap();

        fx.mutator().register_subject(sid("SALES"), "Sales", SubjectClass::Base).unwrap();
        assert_eq!(fx.get("SALES", None, PeriodId::Annual), Some(0));
        assert_eq!(fx.get("GP", None, PeriodId::Annual), None);

        fx.mutator().register_subject(sid("COGS"), "COGS", SubjectClass::Base).unwrap();
        assert_eq!(fx.get("GP", None, PeriodId::Annual), Some(0));
    }
}
