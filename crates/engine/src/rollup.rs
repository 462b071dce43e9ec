//! Row topology: which rows exist for a subject and how they roll up.
//!
//! Dimension rows are registered per BASE subject. The rollup parent of
//! row `(S, d)` is the nearest proper ancestor of `d` that is registered for
//! `S`, or the totals row when there is none. A row with rollup children is
//! derived; the totals row of a subject with registered rows is always
//! derived.
//!
//! ```text
//! registered for SALES: DOMESTIC, CUST_A, CUST_B, OVERSEAS_1
//! tree: ALL > DOMESTIC > {CUST_A, CUST_B},  ALL > OVERSEAS > OVERSEAS_1
//!
//! SALES (totals)
//! ├── SALES/DOMESTIC      derived
//! │   ├── SALES/CUST_A    leaf
//! │   └── SALES/CUST_B    leaf
//! └── SALES/OVERSEAS_1    leaf  (OVERSEAS not registered, skipped)
//! ```

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::cell_id::{DimensionValueId, Row, SubjectId};
use crate::dimension::DimensionTree;
use crate::error::{EngineError, RejectReason};
use crate::period::{PeriodHierarchy, PeriodId};
use crate::subject::SubjectGraph;

/// Registered dimension rows per BASE subject.
#[derive(Clone, Debug, Default)]
pub struct RowRegistry {
    rows: FxHashMap<SubjectId, BTreeSet<DimensionValueId>>,
}

impl RowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the row was already registered.
    pub fn insert(&mut self, subject: SubjectId, dimension: DimensionValueId) -> bool {
        self.rows.entry(subject).or_default().insert(dimension)
    }

    pub fn remove_subject(&mut self, subject: &SubjectId) {
        self.rows.remove(subject);
    }

    pub fn contains(&self, subject: &SubjectId, dimension: &DimensionValueId) -> bool {
        self.rows.get(subject).map_or(false, |dims| dims.contains(dimension))
    }

    pub fn has_rows(&self, subject: &SubjectId) -> bool {
        self.rows.get(subject).map_or(false, |dims| !dims.is_empty())
    }

    /// Registered dimensions of `subject`, sorted by id.
    pub fn dimensions_of(&self, subject: &SubjectId) -> impl Iterator<Item = &DimensionValueId> + '_ {
        self.rows.get(subject).into_iter().flat_map(|dims| dims.iter())
    }

    /// Subjects with at least one row registered at `dimension`.
    pub fn subjects_with(&self, dimension: &DimensionValueId) -> Vec<SubjectId> {
        let mut out: Vec<SubjectId> = self
            .rows
            .iter()
            .filter(|(_, dims)| dims.contains(dimension))
            .map(|(s, _)| s.clone())
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(|dims| dims.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a row of a BASE subject gets its month values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowKind {
    /// Holds entered values.
    Leaf,
    /// Sum of its rollup children.
    Derived,
    /// Dimension value without a registered row; reads as zero.
    Unregistered,
}

/// Rollup parent/children of one BASE subject's rows.
#[derive(Clone, Debug, Default)]
pub struct RowTopology {
    parent: FxHashMap<DimensionValueId, Option<DimensionValueId>>,
    children: FxHashMap<Option<DimensionValueId>, Vec<DimensionValueId>>,
}

impl RowTopology {
    pub fn rollup_parent(&self, dimension: &DimensionValueId) -> Option<&Option<DimensionValueId>> {
        self.parent.get(dimension)
    }

    pub fn rollup_children(&self, dimension: &Option<DimensionValueId>) -> &[DimensionValueId] {
        self.children.get(dimension).map_or(&[], |c| c.as_slice())
    }

    pub fn has_children(&self, dimension: &Option<DimensionValueId>) -> bool {
        !self.rollup_children(dimension).is_empty()
    }
}

/// Read-only view of everything that shapes the grid.
#[derive(Clone, Copy)]
pub struct Topology<'a> {
    pub periods: &'a PeriodHierarchy,
    pub dimensions: &'a DimensionTree,
    pub subjects: &'a SubjectGraph,
    pub rows: &'a RowRegistry,
}

impl<'a> Topology<'a> {
    pub fn new(
        periods: &'a PeriodHierarchy,
        dimensions: &'a DimensionTree,
        subjects: &'a SubjectGraph,
        rows: &'a RowRegistry,
    ) -> Self {
        Self { periods, dimensions, subjects, rows }
    }

    /// Rollup structure of a BASE subject's registered rows.
    pub fn row_topology(&self, subject: &SubjectId) -> RowTopology {
        let mut topo = RowTopology::default();
        for dim in self.rows.dimensions_of(subject) {
            let parent = self
                .dimensions
                .ancestors_of(dim)
                .into_iter()
                .find(|a| self.rows.contains(subject, a));
            topo.children.entry(parent.clone()).or_default().push(dim.clone());
            topo.parent.insert(dim.clone(), parent);
        }
        topo
    }

    /// Kind of a BASE subject's row.
    pub fn row_kind(&self, row: &Row, topo: &RowTopology) -> RowKind {
        match &row.dimension {
            None if self.rows.has_rows(&row.subject) => RowKind::Derived,
            None => RowKind::Leaf,
            Some(dim) if !self.rows.contains(&row.subject, dim) => RowKind::Unregistered,
            Some(_) if topo.has_children(&row.dimension) => RowKind::Derived,
            Some(_) => RowKind::Leaf,
        }
    }

    /// Rows from `row` up through its rollup parents to the totals row.
    pub fn rollup_chain(&self, row: &Row, topo: &RowTopology) -> Vec<Row> {
        let mut chain = vec![row.clone()];
        let mut current = row.dimension.clone();
        while let Some(dim) = current {
            let parent = topo.rollup_parent(&dim).cloned().flatten();
            chain.push(Row::new(row.subject.clone(), parent.clone()));
            current = parent;
        }
        chain
    }

    /// Every row of `subject`: totals first, then dimension rows in tree order.
    ///
    /// A BASE subject has its registered rows. An AGGREGATE subject has a
    /// row at every coordinate registered by any of its base inputs.
    pub fn rows_of(&self, subject: &SubjectId) -> Result<Vec<Row>, EngineError> {
        let s = self.subjects.require(subject)?;
        let bases = if s.is_base() { vec![subject.clone()] } else { self.subjects.base_inputs(subject)? };

        let mut rows = vec![Row::totals(subject.clone())];
        let mut dims: BTreeSet<&DimensionValueId> = BTreeSet::new();
        for base in &bases {
            dims.extend(self.rows.dimensions_of(base));
        }
        for value in self.dimensions.ordered() {
            if dims.remove(&value.id) {
                rows.push(Row::scoped(subject.clone(), value.id.clone()));
            }
        }
        // Registered rows whose value left the tree still exist.
        rows.extend(dims.into_iter().map(|d| Row::scoped(subject.clone(), d.clone())));
        Ok(rows)
    }

    /// Check that `(row, period)` is a directly editable leaf coordinate.
    ///
    /// Check order: subject, dimension value, then editability.
    pub fn classify(&self, row: &Row, period: PeriodId) -> Result<(), EngineError> {
        let subject = self.subjects.require(&row.subject)?;
        if let Some(dim) = &row.dimension {
            self.dimensions.require(dim)?;
        }
        if !self.periods.contains(period) {
            return Err(EngineError::PeriodNotFound(period.to_string()));
        }

        let reject = |reason| EngineError::EditRejected { row: row.clone(), period, reason };
        if subject.is_aggregate() {
            return Err(reject(RejectReason::AggregateSubject));
        }
        if !self.periods.is_editable(period) {
            return Err(reject(RejectReason::NotMonth));
        }
        match self.row_kind(row, &self.row_topology(&row.subject)) {
            RowKind::Leaf => Ok(()),
            RowKind::Derived if row.is_totals() => Err(reject(RejectReason::TotalsRow)),
            RowKind::Derived => Err(reject(RejectReason::DerivedRow)),
            RowKind::Unregistered => Err(reject(RejectReason::UnregisteredRow)),
        }
    }

    /// True if `(row, period)` holds entered rather than computed values.
    pub fn is_leaf(&self, row: &Row, period: PeriodId) -> bool {
        self.classify(row, period).is_ok()
    }
}
