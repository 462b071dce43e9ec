// File I/O operations

pub mod error;
pub mod json;
pub mod plan;

pub use error::PlanIoError;
pub use plan::TomlPlanRepository;
