//! Hierarchical rollup engine for financial-planning grids.
//!
//! A plan is a grid of `(subject, dimension value | totals, period)` cells.
//! Users edit month values of leaf rows; everything else (quarters, halves,
//! fiscal year, dimension totals, aggregate subjects) is derived and kept
//! consistent incrementally. Structural edits (reparenting a dimension
//! value, redefining a formula) are validated for cycles first and applied
//! atomically.
//!
//! Start with [`session::PlanSession`].

pub mod amount;
pub mod cell_id;
pub mod cell_store;
pub mod dep_graph;
pub mod dimension;
pub mod error;
pub mod events;
pub mod mutator;
pub mod period;
pub mod recalc;
pub mod repository;
pub mod rollup;
pub mod session;
pub mod subject;

pub use amount::Amount;
pub use cell_id::{CellKey, DimensionValueId, Row, SubjectId};
pub use error::{EngineError, RejectReason};
pub use period::{PeriodHierarchy, PeriodId};
pub use recalc::CellUpdate;
pub use repository::{PlanRepository, PlanSnapshot};
pub use session::{PlanSession, SessionOptions};
pub use subject::{FormulaTerm, SubjectClass};
