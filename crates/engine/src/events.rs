//! Event types for plan change notifications.
//!
//! Hosts register a callback on the session to refresh views without
//! polling. Every successful mutation bumps the revision exactly once.

use crate::cell_id::CellKey;

/// Events emitted by `PlanSession` after a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanEvent {
    /// Cells changed as a result of an edit or a structural recompute.
    CellsChanged(CellsChangedEvent),

    /// Dimension tree, subject graph or row registration changed.
    StructureChanged(StructureChangedEvent),

    /// Revision number changed. Emitted exactly once per successful mutation.
    RevisionChanged(RevisionChangedEvent),
}

impl PlanEvent {
    pub fn revision(&self) -> u64 {
        match self {
            Self::CellsChanged(e) => e.revision,
            Self::StructureChanged(e) => e.revision,
            Self::RevisionChanged(e) => e.revision,
        }
    }
}

/// Emitted when cells change value.
#[derive(Debug, Clone, PartialEq)]
pub struct CellsChangedEvent {
    /// Revision that produced these changes.
    pub revision: u64,
    /// Changed cells in computation order.
    pub cells: Vec<CellKey>,
}

/// What kind of structure changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureChange {
    DimensionRegistered,
    DimensionReparented,
    DimensionDeactivated,
    DimensionRenamed,
    SubjectRegistered,
    SubjectRemoved,
    FormulaDefined,
    RowRegistered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureChangedEvent {
    pub revision: u64,
    pub change: StructureChange,
    /// Id of the dimension value or subject that was changed.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisionChangedEvent {
    /// The new revision number.
    pub revision: u64,
    /// The previous revision number.
    pub previous: u64,
}

/// Callback type for receiving plan events.
pub type EventCallback = Box<dyn FnMut(PlanEvent) + Send>;

/// Simple event collector for testing.
#[derive(Default)]
pub struct EventCollector {
    events: Vec<PlanEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: PlanEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[PlanEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Filter to only CellsChanged events.
    pub fn cells_changed(&self) -> Vec<&CellsChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PlanEvent::CellsChanged(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Filter to only StructureChanged events.
    pub fn structure_changed(&self) -> Vec<&StructureChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PlanEvent::StructureChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Every changed cell across all events, oldest first. A cell changed
    /// by several revisions appears once per revision.
    pub fn changed_cells(&self) -> Vec<&CellKey> {
        self.cells_changed().into_iter().flat_map(|e| e.cells.iter()).collect()
    }

    /// Latest revision seen, 0 if none.
    pub fn last_revision(&self) -> u64 {
        self.events.last().map_or(0, PlanEvent::revision)
    }

    /// Filter to only RevisionChanged events.
    pub fn revision_changed(&self) -> Vec<&RevisionChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PlanEvent::RevisionChanged(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}
