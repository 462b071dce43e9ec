//! Plan definitions and the repository seam.
//!
//! A [`PlanRepository`] hands the session an immutable [`PlanSnapshot`];
//! the session builds its own working copy from it and never writes back.

use serde::{Deserialize, Serialize};

use crate::dimension::NewDimensionValue;
use crate::error::EngineError;
use crate::subject::{FormulaTerm, SubjectClass};

/// Everything needed to open a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dimension_values: Vec<DimensionValueDef>,
    #[serde(default)]
    pub subjects: Vec<SubjectDef>,
    #[serde(default)]
    pub leaves: Vec<LeafDef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValueDef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, alias = "scope_type")]
    pub scope: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i64,
}

fn default_true() -> bool {
    true
}

impl From<&DimensionValueDef> for NewDimensionValue {
    fn from(def: &DimensionValueDef) -> Self {
        let mut value = NewDimensionValue::new(def.id.as_str(), def.name.as_str())
            .scope(def.scope.as_str())
            .sort_order(def.sort_order);
        if let Some(parent) = &def.parent {
            value = value.under(parent.as_str());
        }
        if !def.active {
            value = value.inactive();
        }
        value
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectDef {
    pub id: String,
    pub name: String,
    pub class: SubjectClass,
    /// Formula of an aggregate subject.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<TermDef>,
    /// Registered dimension rows of a base subject.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermDef {
    pub input: String,
    #[serde(default = "default_coefficient")]
    pub coefficient: i64,
}

fn default_coefficient() -> i64 {
    1
}

impl From<&TermDef> for FormulaTerm {
    fn from(def: &TermDef) -> Self {
        FormulaTerm::new(def.input.as_str(), def.coefficient)
    }
}

/// One entered month value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafDef {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    /// Period code: `APR`, `P01`, ...
    pub period: String,
    pub value: LeafValue,
}

/// Leaf value as written in a plan file: `400` or `"1,234.50"`.
///
/// Both are in currency units, not minor units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeafValue {
    Number(i64),
    Text(String),
}

impl LeafValue {
    /// Raw text as a user would type it.
    pub fn raw(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Source of plan snapshots.
pub trait PlanRepository {
    type Error;

    fn load(&self) -> Result<PlanSnapshot, Self::Error>;
}

/// Repository over a snapshot already in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    snapshot: PlanSnapshot,
}

impl InMemoryRepository {
    pub fn new(snapshot: PlanSnapshot) -> Self {
        Self { snapshot }
    }
}

impl PlanRepository for InMemoryRepository {
    type Error = EngineError;

    fn load(&self) -> Result<PlanSnapshot, EngineError> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "name": "Budget",
            "dimension_values": [
                {"id": "DOM", "name": "Domestic"},
                {"id": "CUST_A", "name": "Customer A", "parent": "DOM", "scope_type": "customer", "active": false}
            ],
            "subjects": [
                {"id": "SALES", "name": "Sales", "class": "base", "rows": ["CUST_A"]},
                {"id": "GP", "name": "Gross Profit", "class": "aggregate", "terms": [{"input": "SALES"}]}
            ],
            "leaves": [
                {"subject": "SALES", "dimension": "CUST_A", "period": "APR", "value": 400},
                {"subject": "SALES", "dimension": "CUST_A", "period": "MAY", "value": "1,250"}
            ]
        }"#;
        let snapshot: PlanSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.dimension_values[0].scope, "");
        assert!(snapshot.dimension_values[0].active);
        assert_eq!(snapshot.dimension_values[1].scope, "customer");
        assert_eq!(snapshot.subjects[1].terms[0].coefficient, 1);
        assert_eq!(snapshot.leaves[0].value, LeafValue::Number(400));
        assert_eq!(snapshot.leaves[1].value.raw(), "1,250");

        let value = NewDimensionValue::from(&snapshot.dimension_values[1]);
        assert!(!value.is_active);
        assert_eq!(value.parent.unwrap().as_str(), "DOM");
    }

    #[test]
    fn test_in_memory_repository() {
        let repo = InMemoryRepository::new(PlanSnapshot { name: "x".into(), ..Default::default() });
        assert_eq!(repo.load().unwrap().name, "x");
    }
}
