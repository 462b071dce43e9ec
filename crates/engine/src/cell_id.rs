//! Cell identity for the planning grid.
//!
//! A `CellKey` uniquely identifies a cell across all subjects of a plan:
//! a row `(subject, dimension value | totals)` and a period.

use serde::{Deserialize, Serialize};

use crate::period::PeriodId;

/// Identifier of an accounting subject (e.g. `SALES`, `GP`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a dimension value (customer, product, region, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionValueId(String);

impl DimensionValueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DimensionValueId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for DimensionValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressable row of the grid.
///
/// `dimension == None` is the totals row of the subject ("all dimension values").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Row {
    pub subject: SubjectId,
    pub dimension: Option<DimensionValueId>,
}

impl Row {
    /// The totals row of a subject.
    pub fn totals(subject: SubjectId) -> Self {
        Self { subject, dimension: None }
    }

    /// A dimension-scoped row.
    pub fn scoped(subject: SubjectId, dimension: DimensionValueId) -> Self {
        Self { subject, dimension: Some(dimension) }
    }

    pub fn new(subject: SubjectId, dimension: Option<DimensionValueId>) -> Self {
        Self { subject, dimension }
    }

    #[inline]
    pub fn is_totals(&self) -> bool {
        self.dimension.is_none()
    }

    /// Same dimension coordinate, different subject.
    pub fn with_subject(&self, subject: &SubjectId) -> Self {
        Self { subject: subject.clone(), dimension: self.dimension.clone() }
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.dimension {
            Some(dim) => write!(f, "{}/{}", self.subject, dim),
            None => write!(f, "{}", self.subject),
        }
    }
}

/// Unique identifier for a cell: row plus period.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub row: Row,
    pub period: PeriodId,
}

impl CellKey {
    #[inline]
    pub fn new(row: Row, period: PeriodId) -> Self {
        Self { row, period }
    }

    /// Same row, different period.
    pub fn at(&self, period: PeriodId) -> Self {
        Self { row: self.row.clone(), period }
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.row, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> SubjectId {
        SubjectId::new("SALES")
    }

    #[test]
    fn test_row_equality() {
        let a = Row::scoped(sales(), DimensionValueId::new("CUST_A"));
        let b = Row::scoped(sales(), DimensionValueId::new("CUST_A"));
        let c = Row::totals(sales());

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(c.is_totals());
    }

    #[test]
    fn test_cell_key_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(CellKey::new(Row::totals(sales()), PeriodId::Month(1)));
        set.insert(CellKey::new(Row::totals(sales()), PeriodId::Month(1))); // duplicate
        set.insert(CellKey::new(Row::totals(sales()), PeriodId::Quarter(1)));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_totals_row_sorts_first() {
        let mut rows = vec![
            Row::scoped(sales(), DimensionValueId::new("CUST_B")),
            Row::totals(sales()),
            Row::scoped(sales(), DimensionValueId::new("CUST_A")),
        ];
        rows.sort();
        assert!(rows[0].is_totals());
        assert_eq!(rows[1].dimension.as_ref().unwrap().as_str(), "CUST_A");
    }

    #[test]
    fn test_display() {
        let cell = CellKey::new(
            Row::scoped(sales(), DimensionValueId::new("CUST_A")),
            PeriodId::Quarter(1),
        );
        assert_eq!(format!("{}", cell), "SALES/CUST_A@Q1");

        let total = CellKey::new(Row::totals(sales()), PeriodId::Annual);
        assert_eq!(format!("{}", total), "SALES@FY");
    }
}
