use crate::cell_id::{DimensionValueId, Row, SubjectId};
use crate::period::PeriodId;
use crate::recalc::CycleReport;

/// Why a cell refused a direct write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Quarter, half and fiscal-year cells are rollups.
    NotMonth,
    /// Subject has dimension rows, so its totals row is a rollup.
    TotalsRow,
    /// Dimension row has rollup children.
    DerivedRow,
    /// Dimension value has no row registered under this subject.
    UnregisteredRow,
    /// Aggregate subjects are computed from their formula.
    AggregateSubject,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotMonth => write!(f, "only month periods are editable"),
            Self::TotalsRow => write!(f, "totals row is derived from dimension rows"),
            Self::DerivedRow => write!(f, "row is a rollup of child dimension rows"),
            Self::UnregisteredRow => write!(f, "row is not registered for this subject"),
            Self::AggregateSubject => write!(f, "aggregate subjects are computed from their formula"),
        }
    }
}

/// Engine error kinds. Every engine operation validates before mutating, so
/// an error always means nothing was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Target coordinate is a derived cell, not a leaf.
    #[error("cell {row}@{period} is not editable: {reason}")]
    EditRejected { row: Row, period: PeriodId, reason: RejectReason },

    /// A proposed dimension-value or subject-formula edge would create a cycle.
    #[error("{0}")]
    CircularReferenceDetected(CycleReport),

    #[error("dimension value not found: {0}")]
    ValueNotFound(DimensionValueId),

    #[error("subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("unknown period: '{0}'")]
    PeriodNotFound(String),

    #[error("dimension value {0} is already inactive")]
    AlreadyInactive(DimensionValueId),

    /// Inactive values accept no new children.
    #[error("dimension value {0} is inactive and cannot take new children")]
    InactiveParent(DimensionValueId),

    #[error("invalid number: '{raw}'")]
    InvalidNumber { raw: String },

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("subject {0} is not an aggregate subject")]
    NotAggregate(SubjectId),

    /// Rows are only registered on base subjects.
    #[error("subject {0} is an aggregate subject; its rows follow its inputs")]
    NotBase(SubjectId),

    #[error("amount overflow at {0}")]
    AmountOverflow(String),
}

impl EngineError {
    /// Stable machine-readable code, mapped to localized text by callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EditRejected { .. } => "edit_rejected",
            Self::CircularReferenceDetected(_) => "circular_reference_detected",
            Self::ValueNotFound(_) => "value_not_found",
            Self::SubjectNotFound(_) => "subject_not_found",
            Self::PeriodNotFound(_) => "period_not_found",
            Self::AlreadyInactive(_) => "already_inactive",
            Self::InactiveParent(_) => "inactive_parent",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotAggregate(_) => "not_aggregate",
            Self::NotBase(_) => "not_base",
            Self::AmountOverflow(_) => "amount_overflow",
        }
    }
}
