//! One editing session over a plan.
//!
//! `PlanSession` owns the working copy built from a [`PlanSnapshot`] and is
//! the only entry point hosts need: leaf edits, structural edits, queries
//! and change events. Every method validates before it mutates; an error
//! means nothing changed and the revision did not move.

use log::{debug, info};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::amount::{Amount, MAX_MINOR_DIGITS};
use crate::cell_id::{CellKey, DimensionValueId, Row, SubjectId};
use crate::cell_store::CellStore;
use crate::dimension::{DimensionTree, DimensionValue, NewDimensionValue};
use crate::error::EngineError;
use crate::events::{
    CellsChangedEvent, EventCallback, PlanEvent, RevisionChangedEvent, StructureChange, StructureChangedEvent,
};
use crate::mutator::{FormulaOutcome, HierarchyMutator, ReparentOutcome};
use crate::period::{PeriodHierarchy, PeriodId};
use crate::recalc::{CellUpdate, RecalcEngine, RecalcReport};
use crate::repository::{
    DimensionValueDef, LeafDef, LeafValue, PlanRepository, PlanSnapshot, SubjectDef, TermDef,
};
use crate::rollup::{RowKind, Topology};
use crate::subject::{FormulaTerm, SubjectClass, SubjectGraph};

/// Session-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Calendar month (1-12) fiscal month `P01` falls in.
    pub fiscal_year_start_month: u32,
    /// Currency minor-unit digits (0 for JPY, 2 for USD).
    pub minor_unit_digits: u32,
    /// Log every changed cell at info level.
    pub log_changes: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { fiscal_year_start_month: 4, minor_unit_digits: 0, log_changes: false }
    }
}

/// Result of a successful leaf edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    /// Changed cells in computation order, the edited leaf first.
    pub updated_cells: Vec<CellUpdate>,
}

/// All rows of one subject across all periods.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubjectGrid {
    pub subject: SubjectId,
    pub name: String,
    pub class: SubjectClass,
    pub periods: Vec<GridPeriod>,
    pub rows: Vec<GridRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GridPeriod {
    pub id: PeriodId,
    pub label: String,
    pub editable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GridRow {
    pub dimension: Option<DimensionValueId>,
    pub label: String,
    /// 0 for the totals row, dimension level + 1 otherwise.
    pub level: u32,
    /// Whether month cells of this row accept edits.
    pub editable: bool,
    /// One entry per column of `SubjectGrid::periods`.
    pub values: Vec<Option<Amount>>,
}

/// A cached or stored value that disagrees with the leaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Cached derived value differs from a recompute from leaves.
    StaleDerived { cell: CellKey, cached: Option<Amount>, expected: Amount },
    /// An entered value sits at a coordinate that is not a leaf.
    StrayLeaf { cell: CellKey },
    /// Cached derived value at a coordinate a recompute does not produce.
    OrphanDerived { cell: CellKey, cached: Amount },
}

pub struct PlanSession {
    name: String,
    options: SessionOptions,
    periods: PeriodHierarchy,
    dimensions: DimensionTree,
    subjects: SubjectGraph,
    store: CellStore,
    revision: u64,
    event_callback: Option<EventCallback>,
}

impl PlanSession {
    /// Load a snapshot from `repo` and open a session on it.
    pub fn open<R>(repo: &R, options: SessionOptions) -> Result<Self, R::Error>
    where
        R: PlanRepository,
        R::Error: From<EngineError>,
    {
        let snapshot = repo.load()?;
        Ok(Self::from_snapshot(snapshot, options)?)
    }

    /// Build the working copy and compute every derived cell.
    pub fn from_snapshot(snapshot: PlanSnapshot, mut options: SessionOptions) -> Result<Self, EngineError> {
        options.minor_unit_digits = options.minor_unit_digits.min(MAX_MINOR_DIGITS);
        let periods = PeriodHierarchy::fiscal_year(options.fiscal_year_start_month);
        let dimensions =
            DimensionTree::from_defs(snapshot.dimension_values.iter().map(NewDimensionValue::from).collect())?;

        let mut subjects = SubjectGraph::new();
        for def in &snapshot.subjects {
            subjects.register(SubjectId::new(def.id.as_str()), def.name.as_str(), def.class)?;
        }
        for def in &snapshot.subjects {
            let id = SubjectId::new(def.id.as_str());
            match def.class {
                SubjectClass::Base if !def.terms.is_empty() => return Err(EngineError::NotAggregate(id)),
                SubjectClass::Aggregate if !def.rows.is_empty() => return Err(EngineError::NotBase(id)),
                SubjectClass::Aggregate => {
                    let terms: Vec<FormulaTerm> = def.terms.iter().map(FormulaTerm::from).collect();
                    subjects.define_formula(&id, &terms)?;
                }
                SubjectClass::Base => {}
            }
        }

        let mut store = CellStore::new();
        for def in snapshot.subjects.iter().filter(|d| d.class == SubjectClass::Base) {
            let id = SubjectId::new(def.id.as_str());
            for dim in &def.rows {
                store.register_row(&dimensions, &subjects, &id, &DimensionValueId::new(dim.as_str()))?;
            }
        }

        for leaf in &snapshot.leaves {
            let row = Row::new(SubjectId::new(leaf.subject.as_str()), leaf.dimension.as_deref().map(DimensionValueId::new));
            subjects.require(&row.subject)?;
            if let Some(dim) = &row.dimension {
                dimensions.require(dim)?;
            }
            let period = periods
                .resolve(&leaf.period)
                .ok_or_else(|| EngineError::PeriodNotFound(leaf.period.clone()))?;
            let value = Amount::parse(&leaf.value.raw(), options.minor_unit_digits)?;
            store.set_leaf(&periods, &dimensions, &subjects, row, period, value)?;
        }

        let plan = {
            let topo = Topology::new(&periods, &dimensions, &subjects, store.rows());
            RecalcEngine::new(topo, &store).plan_full()?
        };
        let (_, report) = store.commit(plan);

        info!(
            "opened plan '{}': {} dimension values, {} subjects, {} rows, {} leaves",
            snapshot.name,
            dimensions.len(),
            subjects.len(),
            store.rows().len(),
            store.leaf_count()
        );
        debug!("{}", report.log_line());

        Ok(Self {
            name: snapshot.name,
            options,
            periods,
            dimensions,
            subjects,
            store,
            revision: 0,
            event_callback: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn periods(&self) -> &PeriodHierarchy {
        &self.periods
    }

    pub fn dimensions(&self) -> &DimensionTree {
        &self.dimensions
    }

    pub fn subjects(&self) -> &SubjectGraph {
        &self.subjects
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.event_callback = Some(callback);
    }

    pub fn clear_event_callback(&mut self) {
        self.event_callback = None;
    }

    fn topology(&self) -> Topology<'_> {
        Topology::new(&self.periods, &self.dimensions, &self.subjects, self.store.rows())
    }

    fn mutator(&mut self) -> HierarchyMutator<'_> {
        HierarchyMutator::new(&self.periods, &mut self.dimensions, &mut self.subjects, &mut self.store)
    }

    /// Resolve a period code (`APR`, `P01`, `Q1`, `FY`, ...).
    pub fn resolve_period(&self, code: &str) -> Result<PeriodId, EngineError> {
        self.periods
            .resolve(code)
            .ok_or_else(|| EngineError::PeriodNotFound(code.to_string()))
    }

    /// Build a row from external ids, checking both exist.
    pub fn resolve_row(&self, subject: &str, dimension: Option<&str>) -> Result<Row, EngineError> {
        let row = Row::new(SubjectId::new(subject), dimension.map(DimensionValueId::new));
        self.subjects.require(&row.subject)?;
        if let Some(dim) = &row.dimension {
            self.dimensions.require(dim)?;
        }
        Ok(row)
    }

    // ========================================================================
    // Leaf edits
    // ========================================================================

    /// Set a month value of a leaf row and recompute everything it feeds.
    ///
    /// `raw` is parsed with the session's minor-unit digits.
    pub fn edit_leaf_cell(
        &mut self,
        subject: &str,
        dimension: Option<&str>,
        period: &str,
        raw: &str,
    ) -> Result<EditOutcome, EngineError> {
        let result = self.parse_edit(subject, dimension, period, raw);
        match result {
            Ok((row, period, value)) => self.edit_cell(&row, period, value),
            Err(err) => {
                debug!("edit rejected: {}", err);
                Err(err)
            }
        }
    }

    fn parse_edit(
        &self,
        subject: &str,
        dimension: Option<&str>,
        period: &str,
        raw: &str,
    ) -> Result<(Row, PeriodId, Amount), EngineError> {
        let row = self.resolve_row(subject, dimension)?;
        let period = self.resolve_period(period)?;
        self.topology().classify(&row, period)?;
        let value = Amount::parse(raw, self.options.minor_unit_digits)?;
        Ok((row, period, value))
    }

    /// Typed form of [`edit_leaf_cell`](Self::edit_leaf_cell).
    pub fn edit_cell(&mut self, row: &Row, period: PeriodId, value: Amount) -> Result<EditOutcome, EngineError> {
        let plan = RecalcEngine::new(self.topology(), &self.store).plan_edit(row, period, value);
        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                debug!("edit of {}@{} rejected: {}", row, period, err);
                return Err(err);
            }
        };
        let (updated_cells, report) = self.store.commit(plan);
        self.finish(&updated_cells, &report);
        Ok(EditOutcome { updated_cells })
    }

    /// Recompute every derived cell from leaves.
    ///
    /// Returns cells whose cached value was missing or stale. The revision
    /// moves only if there are any.
    pub fn recalc_all(&mut self) -> Result<Vec<CellUpdate>, EngineError> {
        let plan = RecalcEngine::new(self.topology(), &self.store).plan_full()?;
        let (updates, report) = self.store.commit(plan);
        if updates.is_empty() {
            debug!("{}", report.log_line());
        } else {
            self.finish(&updates, &report);
        }
        Ok(updates)
    }

    // ========================================================================
    // Structural edits
    // ========================================================================

    pub fn reparent_dimension_value(
        &mut self,
        value: &str,
        new_parent: Option<&str>,
    ) -> Result<ReparentOutcome, EngineError> {
        let value_id = DimensionValueId::new(value);
        let parent_id = new_parent.map(DimensionValueId::new);
        let outcome = self.mutator().reparent(&value_id, parent_id.as_ref());
        let outcome = self.log_rejection("reparent", outcome)?;
        self.finish_structure(StructureChange::DimensionReparented, value, &outcome.recomputed_cells);
        Ok(outcome)
    }

    pub fn define_aggregate_formula(&mut self, subject: &str, terms: &[FormulaTerm]) -> Result<FormulaOutcome, EngineError> {
        let outcome = self.mutator().define_formula(&SubjectId::new(subject), terms);
        let outcome = self.log_rejection("formula definition", outcome)?;
        self.finish_structure(StructureChange::FormulaDefined, subject, &outcome.recomputed_cells);
        Ok(outcome)
    }

    pub fn register_dimension_value(&mut self, def: NewDimensionValue) -> Result<DimensionValue, EngineError> {
        let target = def.id.to_string();
        let value = self.mutator().register_dimension_value(def);
        let value = self.log_rejection("dimension registration", value)?;
        self.finish_structure(StructureChange::DimensionRegistered, &target, &[]);
        Ok(value)
    }

    pub fn deactivate_dimension_value(&mut self, value: &str) -> Result<(), EngineError> {
        let result = self.mutator().deactivate(&DimensionValueId::new(value));
        self.log_rejection("deactivation", result)?;
        self.finish_structure(StructureChange::DimensionDeactivated, value, &[]);
        Ok(())
    }

    pub fn rename_dimension_value(&mut self, value: &str, name: &str) -> Result<(), EngineError> {
        let result = self.mutator().rename(&DimensionValueId::new(value), name);
        self.log_rejection("rename", result)?;
        self.finish_structure(StructureChange::DimensionRenamed, value, &[]);
        Ok(())
    }

    pub fn register_subject(
        &mut self,
        id: &str,
        name: &str,
        class: SubjectClass,
    ) -> Result<Vec<CellUpdate>, EngineError> {
        let result = self.mutator().register_subject(SubjectId::new(id), name, class);
        let updates = self.log_rejection("subject registration", result)?;
        self.finish_structure(StructureChange::SubjectRegistered, id, &updates);
        Ok(updates)
    }

    /// Register a dimension row for a BASE subject and recompute it.
    pub fn register_row(&mut self, subject: &str, dimension: &str) -> Result<Vec<CellUpdate>, EngineError> {
        let result = self
            .mutator()
            .register_row(&SubjectId::new(subject), &DimensionValueId::new(dimension));
        let updates = self.log_rejection("row registration", result)?;
        let target = format!("{}/{}", subject, dimension);
        self.finish_structure(StructureChange::RowRegistered, &target, &updates);
        Ok(updates)
    }

    pub fn remove_subject(&mut self, id: &str) -> Result<(), EngineError> {
        let result = self.mutator().remove_subject(&SubjectId::new(id));
        self.log_rejection("subject removal", result)?;
        self.finish_structure(StructureChange::SubjectRemoved, id, &[]);
        Ok(())
    }

    fn log_rejection<T>(&self, what: &str, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            debug!("{} rejected: {}", what, err);
        }
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current value of any cell. `None` for a leaf never entered.
    pub fn value(&self, subject: &str, dimension: Option<&str>, period: &str) -> Result<Option<Amount>, EngineError> {
        let row = self.resolve_row(subject, dimension)?;
        let period = self.resolve_period(period)?;
        Ok(self.store.get(&row, period))
    }

    /// Every row of `subject` across every period, bottom-up column order.
    pub fn grid(&self, subject: &str) -> Result<SubjectGrid, EngineError> {
        let id = SubjectId::new(subject);
        let s = self.subjects.require(&id)?;
        let topo = self.topology();
        let row_topo = topo.row_topology(&id);

        let periods: Vec<GridPeriod> = self
            .periods
            .all()
            .iter()
            .map(|p| GridPeriod { id: p.id, label: p.label.clone(), editable: p.editable })
            .collect();

        let mut rows = Vec::new();
        for row in topo.rows_of(&id)? {
            let (label, level) = match &row.dimension {
                None => (s.name.clone(), 0),
                Some(dim) => match self.dimensions.get(dim) {
                    Some(v) => (v.name.clone(), v.hierarchy_level + 1),
                    None => (dim.to_string(), 1),
                },
            };
            let editable = s.is_base() && topo.row_kind(&row, &row_topo) == RowKind::Leaf;
            let values = periods.iter().map(|p| self.store.get(&row, p.id)).collect();
            rows.push(GridRow { dimension: row.dimension, label, level, editable, values });
        }

        Ok(SubjectGrid { subject: id, name: s.name.clone(), class: s.class, periods, rows })
    }

    /// Compare every cached cell with a recompute from leaves.
    ///
    /// Empty on a healthy session.
    pub fn check_invariants(&self) -> Result<Vec<InvariantViolation>, EngineError> {
        let topo = self.topology();
        let plan = RecalcEngine::new(topo, &self.store).plan_full()?;

        let mut violations = Vec::new();
        for (key, _) in self.store.leaves() {
            if !topo.is_leaf(&key.row, key.period) {
                violations.push(InvariantViolation::StrayLeaf { cell: key.clone() });
            }
        }
        let mut expected_keys: FxHashSet<&CellKey> = FxHashSet::default();
        for (key, expected) in plan.derived() {
            expected_keys.insert(key);
            let cached = self.store.derived(key);
            if cached != Some(*expected) {
                violations.push(InvariantViolation::StaleDerived { cell: key.clone(), cached, expected: *expected });
            }
        }
        for (key, cached) in self.store.derived_cells() {
            if !expected_keys.contains(key) {
                violations.push(InvariantViolation::OrphanDerived { cell: key.clone(), cached });
            }
        }
        Ok(violations)
    }

    /// Export the working copy as a snapshot that reopens to the same state.
    pub fn snapshot(&self) -> PlanSnapshot {
        let dimension_values = self
            .dimensions
            .ordered()
            .into_iter()
            .map(|v| DimensionValueDef {
                id: v.id.to_string(),
                name: v.name.clone(),
                parent: v.parent.as_ref().map(|p| p.to_string()),
                scope: v.scope_type.clone(),
                active: v.is_active,
                sort_order: v.sort_order,
            })
            .collect();

        let subjects = self
            .subjects
            .ids()
            .into_iter()
            .filter_map(|id| self.subjects.get(&id))
            .map(|s| SubjectDef {
                id: s.id.to_string(),
                name: s.name.clone(),
                class: s.class,
                terms: s
                    .formula
                    .iter()
                    .map(|t| TermDef { input: t.input.to_string(), coefficient: t.coefficient })
                    .collect(),
                rows: self.store.rows().dimensions_of(&s.id).map(|d| d.to_string()).collect(),
            })
            .collect();

        let digits = self.options.minor_unit_digits;
        let leaves = self
            .store
            .leaves()
            .into_iter()
            .map(|(key, value)| LeafDef {
                subject: key.row.subject.to_string(),
                dimension: key.row.dimension.as_ref().map(|d| d.to_string()),
                period: key.period.to_string(),
                value: if digits == 0 {
                    LeafValue::Number(value.minor_units())
                } else {
                    LeafValue::Text(value.format(digits))
                },
            })
            .collect();

        PlanSnapshot { name: self.name.clone(), dimension_values, subjects, leaves }
    }

    // ========================================================================
    // Revision and events
    // ========================================================================

    fn finish(&mut self, updates: &[CellUpdate], report: &RecalcReport) {
        debug!("{}", report.log_line());
        self.publish(updates, None);
    }

    fn finish_structure(&mut self, change: StructureChange, target: &str, updates: &[CellUpdate]) {
        self.publish(updates, Some((change, target)));
    }

    fn publish(&mut self, updates: &[CellUpdate], structure: Option<(StructureChange, &str)>) {
        let previous = self.revision;
        self.revision += 1;
        let revision = self.revision;

        if self.options.log_changes {
            let digits = self.options.minor_unit_digits;
            for u in updates {
                info!("r{} {}@{} = {}", revision, u.row, u.period, u.value.format(digits));
            }
        }

        let Some(callback) = self.event_callback.as_mut() else {
            return;
        };
        if let Some((change, target)) = structure {
            callback(PlanEvent::StructureChanged(StructureChangedEvent {
                revision,
                change,
                target: target.to_string(),
            }));
        }
        if !updates.is_empty() {
            callback(PlanEvent::CellsChanged(CellsChangedEvent {
                revision,
                cells: updates.iter().map(CellUpdate::key).collect(),
            }));
        }
        callback(PlanEvent::RevisionChanged(RevisionChangedEvent { revision, previous }));
    }
}
