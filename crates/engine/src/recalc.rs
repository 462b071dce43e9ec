//! Rollup recalculation.
//!
//! The engine never writes the store directly. Every operation produces a
//! [`RecalcPlan`] holding staged values; the store applies it in one step
//! with [`CellStore::commit`](crate::cell_store::CellStore::commit). Any
//! error while planning (dangling formula input, overflow) leaves the store
//! untouched.
//!
//! Three cell formulas, all exact integer sums:
//!
//! ```text
//! base, non-month period   value(row, Q1)   = Σ value(row, month ∈ Q1)
//! base, derived row        value(row, m)    = Σ value(rollup child, m)
//! aggregate                value(A/d, p)    = Σ coef × value(input/d, p)
//! ```

use std::fmt::Display;
use std::time::Instant;

use serde::Serialize;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::amount::Amount;
use crate::cell_id::{CellKey, DimensionValueId, Row, SubjectId};
use crate::cell_store::CellStore;
use crate::error::EngineError;
use crate::period::{PeriodId, PeriodKind};
use crate::rollup::{RowKind, RowTopology, Topology};

/// Report when a structural edit would close a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Nodes on the offending path. A closed path repeats its first node.
    pub nodes: Vec<String>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    pub fn new(nodes: Vec<String>, message: impl Into<String>) -> Self {
        Self { nodes, message: message.into() }
    }

    /// A node named as its own parent or input.
    pub fn self_reference(node: impl Display) -> Self {
        let node = node.to_string();
        Self {
            message: format!("{} references itself", node),
            nodes: vec![node],
        }
    }

    /// A multi-node cycle.
    pub fn cycle(nodes: Vec<String>) -> Self {
        let message = if nodes.len() <= 5 {
            format!("Circular reference: {}", nodes.join(" → "))
        } else {
            format!(
                "Circular reference involving {} nodes: {} → ... → {}",
                nodes.len(),
                nodes[0],
                nodes[nodes.len() - 1]
            )
        };
        Self { nodes, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}

/// One cell whose value changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CellUpdate {
    pub row: Row,
    pub period: PeriodId,
    pub value: Amount,
}

impl CellUpdate {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.row.clone(), self.period)
    }
}

/// What triggered a recalculation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecalcKind {
    /// Incremental: one leaf edit.
    #[default]
    Edit,
    /// Whole subjects after a structural change.
    Structure,
    /// Every derived cell from leaves.
    Full,
}

impl RecalcKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Structure => "structure",
            Self::Full => "full",
        }
    }
}

/// Counters from one recalculation, for logging.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    pub kind: RecalcKind,

    /// Planning time in milliseconds.
    pub duration_ms: u64,

    /// Derived cells computed and staged.
    pub cells_recomputed: usize,

    /// Cells whose value differs from before (leaf included).
    pub cells_changed: usize,

    /// Subjects touched, the edited one included.
    pub subjects: usize,

    /// Leaf values dropped because their row became a rollup.
    pub leaves_discarded: usize,
}

impl RecalcReport {
    pub fn new(kind: RecalcKind) -> Self {
        Self { kind, ..Default::default() }
    }

    /// Format as a concise one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}ms, changed={}, subjects={}",
            self.cells_recomputed, self.duration_ms, self.cells_changed, self.subjects
        )
    }

    /// Format: `[recalc/edit]    0ms  7 cells  changed=4  subjects=3  discarded=0`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc/{}] {:>4}ms  {} cells  changed={}  subjects={}  discarded={}",
            self.kind.label(),
            self.duration_ms,
            self.cells_recomputed,
            self.cells_changed,
            self.subjects,
            self.leaves_discarded
        )
    }
}

/// Which cached derived values a plan replaces.
#[derive(Clone, Debug)]
pub(crate) enum PlanScope {
    /// Upsert the staged cells only.
    Edit,
    /// Replace every cached cell of these subjects.
    Subjects(FxHashSet<SubjectId>),
    /// Replace the whole cache.
    Full,
}

/// Staged result of a recalculation, applied by `CellStore::commit`.
#[derive(Debug)]
pub struct RecalcPlan {
    pub(crate) scope: PlanScope,
    pub(crate) leaf_writes: Vec<(CellKey, Amount)>,
    pub(crate) derived: Vec<(CellKey, Amount)>,
    pub(crate) discard_leaves: Vec<Row>,
    pub(crate) updates: Vec<CellUpdate>,
    pub(crate) report: RecalcReport,
}

impl RecalcPlan {
    /// Changed cells in computation order.
    pub fn updates(&self) -> &[CellUpdate] {
        &self.updates
    }

    pub fn report(&self) -> &RecalcReport {
        &self.report
    }

    /// Every staged derived value, changed or not.
    pub fn derived(&self) -> &[(CellKey, Amount)] {
        &self.derived
    }
}

/// Whether cached derived values may be read while planning.
enum CachePolicy {
    Trust,
    Bypass(FxHashSet<SubjectId>),
    BypassAll,
}

impl CachePolicy {
    fn trusts(&self, subject: &SubjectId) -> bool {
        match self {
            Self::Trust => true,
            Self::Bypass(stale) => !stale.contains(subject),
            Self::BypassAll => false,
        }
    }
}

/// Memoizing cell evaluator over one topology snapshot.
struct Evaluator<'t, 's> {
    topo: Topology<'t>,
    store: &'s CellStore,
    cache: CachePolicy,
    staged_leaves: FxHashMap<CellKey, Amount>,
    memo: FxHashMap<CellKey, Amount>,
    row_topos: FxHashMap<SubjectId, RowTopology>,
}

impl<'t, 's> Evaluator<'t, 's> {
    fn new(topo: Topology<'t>, store: &'s CellStore, cache: CachePolicy) -> Self {
        Self {
            topo,
            store,
            cache,
            staged_leaves: FxHashMap::default(),
            memo: FxHashMap::default(),
            row_topos: FxHashMap::default(),
        }
    }

    fn row_topology(&mut self, subject: &SubjectId) -> &RowTopology {
        let topo = self.topo;
        self.row_topos
            .entry(subject.clone())
            .or_insert_with(|| topo.row_topology(subject))
    }

    /// Row kind for BASE subjects; `None` for aggregates.
    fn row_kind(&mut self, row: &Row) -> Result<Option<RowKind>, EngineError> {
        if self.topo.subjects.require(&row.subject)?.is_aggregate() {
            return Ok(None);
        }
        let topo = self.topo;
        let rt = self.row_topology(&row.subject);
        Ok(Some(topo.row_kind(row, rt)))
    }

    fn leaf_value(&self, key: &CellKey) -> Amount {
        self.staged_leaves
            .get(key)
            .copied()
            .or_else(|| self.store.leaf(key))
            .unwrap_or(Amount::ZERO)
    }

    /// Current value of any cell.
    fn value(&mut self, key: &CellKey) -> Result<Amount, EngineError> {
        if let Some(v) = self.memo.get(key) {
            return Ok(*v);
        }
        match self.row_kind(&key.row)? {
            Some(RowKind::Unregistered) => return Ok(Amount::ZERO),
            Some(RowKind::Leaf) if key.period.kind() == PeriodKind::Month => {
                return Ok(self.leaf_value(key));
            }
            _ => {}
        }
        if self.cache.trusts(&key.row.subject) {
            if let Some(v) = self.store.derived(key) {
                return Ok(v);
            }
        }
        let v = self.compute(key)?;
        self.memo.insert(key.clone(), v);
        Ok(v)
    }

    /// Recompute one derived cell from its direct inputs and stage it.
    fn recompute(&mut self, key: &CellKey) -> Result<Amount, EngineError> {
        let v = self.compute(key)?;
        self.memo.insert(key.clone(), v);
        Ok(v)
    }

    fn compute(&mut self, key: &CellKey) -> Result<Amount, EngineError> {
        let overflow = || EngineError::AmountOverflow(key.to_string());
        let mut total = Amount::ZERO;

        let Some(kind) = self.row_kind(&key.row)? else {
            let terms = self.topo.subjects.inputs_of(&key.row.subject).to_vec();
            for term in terms {
                let input = CellKey::new(key.row.with_subject(&term.input), key.period);
                let v = self.value(&input)?;
                let scaled = v.checked_scale(term.coefficient).ok_or_else(overflow)?;
                total = total.checked_add(scaled).ok_or_else(overflow)?;
            }
            return Ok(total);
        };

        if key.period.kind() != PeriodKind::Month {
            if kind == RowKind::Unregistered {
                return Ok(Amount::ZERO);
            }
            let children: Vec<PeriodId> = self.topo.periods.children_of(key.period).iter().map(|p| p.id).collect();
            for child in children {
                let v = self.value(&key.at(child))?;
                total = total.checked_add(v).ok_or_else(overflow)?;
            }
            return Ok(total);
        }

        match kind {
            RowKind::Leaf => Ok(self.leaf_value(key)),
            RowKind::Unregistered => Ok(Amount::ZERO),
            RowKind::Derived => {
                let children: Vec<DimensionValueId> =
                    self.row_topology(&key.row.subject).rollup_children(&key.row.dimension).to_vec();
                for child in children {
                    let row = Row::scoped(key.row.subject.clone(), child);
                    let v = self.value(&CellKey::new(row, key.period))?;
                    total = total.checked_add(v).ok_or_else(overflow)?;
                }
                Ok(total)
            }
        }
    }
}

/// Plans recalculations against one topology and store snapshot.
pub struct RecalcEngine<'a> {
    topo: Topology<'a>,
    store: &'a CellStore,
}

impl<'a> RecalcEngine<'a> {
    pub fn new(topo: Topology<'a>, store: &'a CellStore) -> Self {
        Self { topo, store }
    }

    /// Plan a single leaf edit.
    ///
    /// Recomputes the edited row's period ancestors, every row on its
    /// rollup chain at those periods, then every downstream aggregate at the
    /// same coordinates in topological order.
    pub fn plan_edit(&self, row: &Row, period: PeriodId, value: Amount) -> Result<RecalcPlan, EngineError> {
        let start = Instant::now();
        self.topo.classify(row, period)?;

        let mut ev = Evaluator::new(self.topo, self.store, CachePolicy::Trust);
        let leaf = CellKey::new(row.clone(), period);
        ev.staged_leaves.insert(leaf.clone(), value);

        let mut periods = vec![period];
        periods.extend(self.topo.periods.ancestors_of(period));
        let chain = self.topo.rollup_chain(row, &self.topo.row_topology(&row.subject));
        let dependents = self.topo.subjects.transitive_dependents(&row.subject)?;

        let mut order: Vec<CellKey> = Vec::with_capacity((1 + dependents.len()) * chain.len() * periods.len());
        for r in &chain {
            for p in &periods {
                if r == row && *p == period {
                    continue;
                }
                order.push(CellKey::new(r.clone(), *p));
            }
        }
        for subject in &dependents {
            for r in &chain {
                for p in &periods {
                    order.push(CellKey::new(r.with_subject(subject), *p));
                }
            }
        }

        let mut derived = Vec::with_capacity(order.len());
        for key in order {
            let v = ev.recompute(&key)?;
            derived.push((key, v));
        }

        let mut updates = Vec::new();
        if self.store.leaf(&leaf) != Some(value) {
            updates.push(CellUpdate { row: row.clone(), period, value });
        }
        self.collect_changes(&derived, &mut updates);

        let mut report = RecalcReport::new(RecalcKind::Edit);
        report.cells_recomputed = derived.len();
        report.cells_changed = updates.len();
        report.subjects = 1 + dependents.len();
        report.duration_ms = start.elapsed().as_millis() as u64;

        Ok(RecalcPlan {
            scope: PlanScope::Edit,
            leaf_writes: vec![(leaf, value)],
            derived,
            discard_leaves: Vec::new(),
            updates,
            report,
        })
    }

    /// Plan a recompute of `subjects` and everything downstream, at every
    /// row and period. Cached values of those subjects are ignored.
    pub fn plan_subjects(&self, subjects: &FxHashSet<SubjectId>) -> Result<RecalcPlan, EngineError> {
        let order = self.topo.subjects.closure(subjects)?;
        let stale: FxHashSet<SubjectId> = order.iter().cloned().collect();
        self.plan(order, CachePolicy::Bypass(stale.clone()), PlanScope::Subjects(stale), RecalcKind::Structure)
    }

    /// Like [`plan_subjects`](Self::plan_subjects) without pulling in
    /// downstream subjects. Dependents outside `subjects` keep their cache.
    pub fn plan_only(&self, subjects: &FxHashSet<SubjectId>) -> Result<RecalcPlan, EngineError> {
        let order = self.topo.subjects.ordered(subjects)?;
        let stale = subjects.clone();
        self.plan(order, CachePolicy::Bypass(stale.clone()), PlanScope::Subjects(stale), RecalcKind::Structure)
    }

    /// Plan a recompute of every derived cell from leaves.
    pub fn plan_full(&self) -> Result<RecalcPlan, EngineError> {
        let order = self.topo.subjects.evaluation_order()?;
        self.plan(order, CachePolicy::BypassAll, PlanScope::Full, RecalcKind::Full)
    }

    fn plan(
        &self,
        order: Vec<SubjectId>,
        cache: CachePolicy,
        scope: PlanScope,
        kind: RecalcKind,
    ) -> Result<RecalcPlan, EngineError> {
        let start = Instant::now();
        let mut ev = Evaluator::new(self.topo, self.store, cache);
        let mut derived = Vec::new();
        let mut discard_leaves = Vec::new();
        let mut leaves_discarded = 0;

        for subject in &order {
            for row in self.topo.rows_of(subject)? {
                let row_kind = ev.row_kind(&row)?;
                if row_kind == Some(RowKind::Derived) {
                    let held = self.store.leaves_of_row(&row);
                    if held > 0 {
                        leaves_discarded += held;
                        discard_leaves.push(row.clone());
                    }
                }
                for period in self.topo.periods.all() {
                    if row_kind == Some(RowKind::Leaf) && period.kind == PeriodKind::Month {
                        continue;
                    }
                    let key = CellKey::new(row.clone(), period.id);
                    let v = ev.value(&key)?;
                    derived.push((key, v));
                }
            }
        }

        let mut updates = Vec::new();
        self.collect_changes(&derived, &mut updates);

        let mut report = RecalcReport::new(kind);
        report.cells_recomputed = derived.len();
        report.cells_changed = updates.len();
        report.subjects = order.len();
        report.leaves_discarded = leaves_discarded;
        report.duration_ms = start.elapsed().as_millis() as u64;

        Ok(RecalcPlan { scope, leaf_writes: Vec::new(), derived, discard_leaves, updates, report })
    }

    fn collect_changes(&self, derived: &[(CellKey, Amount)], updates: &mut Vec<CellUpdate>) {
        for (key, v) in derived {
            if self.store.derived(key) != Some(*v) {
                updates.push(CellUpdate { row: key.row.clone(), period: key.period, value: *v });
            }
        }
    }

    /// Compute one cell purely from leaves, ignoring the derived cache.
    pub fn evaluate(&self, row: &Row, period: PeriodId) -> Result<Amount, EngineError> {
        let mut ev = Evaluator::new(self.topo, self.store, CachePolicy::BypassAll);
        ev.value(&CellKey::new(row.clone(), period))
    }
}
