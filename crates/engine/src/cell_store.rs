//! Sparse cell storage.
//!
//! Two maps keyed by [`CellKey`]:
//! - **leaves**: values entered by the user (month × leaf row × base subject)
//! - **derived**: cached rollup/formula values, written only through
//!   [`commit`](CellStore::commit) of a [`RecalcPlan`]
//!
//! A leaf that was never entered reads as `None` and sums as zero.

use rustc_hash::FxHashMap;

use crate::amount::Amount;
use crate::cell_id::{CellKey, DimensionValueId, Row, SubjectId};
use crate::dimension::DimensionTree;
use crate::error::EngineError;
use crate::period::{PeriodHierarchy, PeriodId, PeriodKind};
use crate::recalc::{CellUpdate, PlanScope, RecalcPlan, RecalcReport};
use crate::rollup::{RowRegistry, Topology};
use crate::subject::SubjectGraph;

#[derive(Clone, Debug, Default)]
pub struct CellStore {
    rows: RowRegistry,
    leaves: FxHashMap<CellKey, Amount>,
    derived: FxHashMap<CellKey, Amount>,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: RowRegistry) -> Self {
        Self { rows, ..Default::default() }
    }

    pub fn rows(&self) -> &RowRegistry {
        &self.rows
    }

    /// Leaf value or cached derived value.
    pub fn get(&self, row: &Row, period: PeriodId) -> Option<Amount> {
        self.value(&CellKey::new(row.clone(), period))
    }

    pub fn value(&self, key: &CellKey) -> Option<Amount> {
        self.leaves.get(key).or_else(|| self.derived.get(key)).copied()
    }

    /// Entered value only.
    pub fn leaf(&self, key: &CellKey) -> Option<Amount> {
        self.leaves.get(key).copied()
    }

    pub(crate) fn derived(&self, key: &CellKey) -> Option<Amount> {
        self.derived.get(key).copied()
    }

    /// Store a leaf value without recomputing anything.
    ///
    /// Rejects coordinates that are not leaves. Derived cells go stale
    /// until the caller runs a recalculation.
    pub fn set_leaf(
        &mut self,
        periods: &PeriodHierarchy,
        dimensions: &DimensionTree,
        subjects: &SubjectGraph,
        row: Row,
        period: PeriodId,
        value: Amount,
    ) -> Result<(), EngineError> {
        Topology::new(periods, dimensions, subjects, &self.rows).classify(&row, period)?;
        self.leaves.insert(CellKey::new(row, period), value);
        Ok(())
    }

    pub fn clear_leaf(&mut self, key: &CellKey) -> Option<Amount> {
        self.leaves.remove(key)
    }

    /// Register a dimension row for a BASE subject.
    ///
    /// Returns `false` if it was already registered. The caller is
    /// responsible for recomputing the subject.
    pub fn register_row(
        &mut self,
        dimensions: &DimensionTree,
        subjects: &SubjectGraph,
        subject: &SubjectId,
        dimension: &DimensionValueId,
    ) -> Result<bool, EngineError> {
        validate_row(dimensions, subjects, subject, dimension)?;
        Ok(self.rows.insert(subject.clone(), dimension.clone()))
    }

    /// Registered dimension rows of `subject`, sorted by id.
    pub fn rows_of(&self, subject: &SubjectId) -> Vec<Row> {
        self.rows
            .dimensions_of(subject)
            .map(|d| Row::scoped(subject.clone(), d.clone()))
            .collect()
    }

    /// Number of entered month values held at `row`.
    pub fn leaves_of_row(&self, row: &Row) -> usize {
        (1..=12u8)
            .filter(|m| self.leaves.contains_key(&CellKey::new(row.clone(), PeriodId::Month(*m))))
            .count()
    }

    /// Drop every leaf value of `row`. Returns how many were removed.
    pub fn discard_leaves_of_row(&mut self, row: &Row) -> usize {
        let before = self.leaves.len();
        self.leaves.retain(|k, _| &k.row != row);
        before - self.leaves.len()
    }

    /// Forget everything stored for `subject`.
    pub fn remove_subject(&mut self, subject: &SubjectId) {
        self.rows.remove_subject(subject);
        self.leaves.retain(|k, _| &k.row.subject != subject);
        self.derived.retain(|k, _| &k.row.subject != subject);
    }

    /// Drop every cached derived value of `subject`. Returns how many were
    /// removed.
    pub(crate) fn clear_derived_of(&mut self, subject: &SubjectId) -> usize {
        let before = self.derived.len();
        self.derived.retain(|k, _| &k.row.subject != subject);
        before - self.derived.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn derived_count(&self) -> usize {
        self.derived.len()
    }

    /// Entered values sorted by key.
    pub fn leaves(&self) -> Vec<(&CellKey, Amount)> {
        let mut out: Vec<(&CellKey, Amount)> = self.leaves.iter().map(|(k, v)| (k, *v)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Cached derived values sorted by key.
    pub fn derived_cells(&self) -> Vec<(&CellKey, Amount)> {
        let mut out: Vec<(&CellKey, Amount)> = self.derived.iter().map(|(k, v)| (k, *v)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Swap in a new row registry. Used by structural edits after planning.
    pub(crate) fn replace_rows(&mut self, rows: RowRegistry) {
        self.rows = rows;
    }

    /// Apply a plan in one step. Returns the changed cells and the report.
    pub(crate) fn commit(&mut self, plan: RecalcPlan) -> (Vec<CellUpdate>, RecalcReport) {
        for row in &plan.discard_leaves {
            self.discard_leaves_of_row(row);
        }
        for (key, value) in plan.leaf_writes {
            debug_assert_eq!(key.period.kind(), PeriodKind::Month);
            self.leaves.insert(key, value);
        }
        match &plan.scope {
            PlanScope::Edit => {}
            PlanScope::Subjects(subjects) => self.derived.retain(|k, _| !subjects.contains(&k.row.subject)),
            PlanScope::Full => self.derived.clear(),
        }
        self.derived.extend(plan.derived);
        (plan.updates, plan.report)
    }
}

/// Check that `(subject, dimension)` may carry a registered row.
pub(crate) fn validate_row(
    dimensions: &DimensionTree,
    subjects: &SubjectGraph,
    subject: &SubjectId,
    dimension: &DimensionValueId,
) -> Result<(), EngineError> {
    if !subjects.require(subject)?.is_base() {
        return Err(EngineError::NotBase(subject.clone()));
    }
    dimensions.require(dimension)?;
    Ok(())
}
