//! Accounting subjects and the formula graph between them.
//!
//! BASE subjects hold entered values. AGGREGATE subjects are a linear
//! combination of other subjects at the same (dimension, period) coordinate:
//!
//! ```text
//! GP = SALES - COGS
//! OP = GP - SGA
//! ```
//!
//! Edges run input → aggregate, so `dependents(SALES) == [GP]`.

use serde::{Deserialize, Serialize};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::SubjectId;
use crate::dep_graph::DepGraph;
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectClass {
    Base,
    Aggregate,
}

/// One `coefficient × input` term of an aggregate formula.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaTerm {
    pub input: SubjectId,
    pub coefficient: i64,
}

impl FormulaTerm {
    pub fn new(input: impl Into<String>, coefficient: i64) -> Self {
        Self { input: SubjectId::new(input), coefficient }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub class: SubjectClass,
    /// Empty for BASE subjects.
    pub formula: Vec<FormulaTerm>,
}

impl Subject {
    pub fn is_base(&self) -> bool {
        self.class == SubjectClass::Base
    }

    pub fn is_aggregate(&self) -> bool {
        self.class == SubjectClass::Aggregate
    }
}

#[derive(Clone, Debug, Default)]
pub struct SubjectGraph {
    subjects: FxHashMap<SubjectId, Subject>,
    graph: DepGraph<SubjectId>,
}

impl SubjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subject with an empty formula.
    pub fn register(
        &mut self,
        id: SubjectId,
        name: impl Into<String>,
        class: SubjectClass,
    ) -> Result<&Subject, EngineError> {
        if self.subjects.contains_key(&id) {
            return Err(EngineError::DuplicateId(id.to_string()));
        }
        let subject = Subject { id: id.clone(), name: name.into(), class, formula: Vec::new() };
        Ok(self.subjects.entry(id).or_insert(subject))
    }

    /// Validate a formula for `subject` without applying it.
    ///
    /// Returns the normalized terms: duplicate inputs merged by summing
    /// coefficients, first-appearance order kept.
    pub fn validate_formula(&self, subject: &SubjectId, terms: &[FormulaTerm]) -> Result<Vec<FormulaTerm>, EngineError> {
        let target = self.require(subject)?;
        if !target.is_aggregate() {
            return Err(EngineError::NotAggregate(subject.clone()));
        }

        let mut merged: Vec<FormulaTerm> = Vec::with_capacity(terms.len());
        for term in terms {
            if !self.subjects.contains_key(&term.input) {
                return Err(EngineError::SubjectNotFound(term.input.clone()));
            }
            match merged.iter_mut().find(|t| t.input == term.input) {
                Some(existing) => {
                    existing.coefficient = existing
                        .coefficient
                        .checked_add(term.coefficient)
                        .ok_or_else(|| EngineError::AmountOverflow(format!("coefficient of {} in {}", term.input, subject)))?;
                }
                None => merged.push(term.clone()),
            }
        }

        let inputs: Vec<SubjectId> = merged.iter().map(|t| t.input.clone()).collect();
        if let Some(report) = self.graph.would_create_cycle(subject, &inputs) {
            return Err(EngineError::CircularReferenceDetected(report));
        }
        Ok(merged)
    }

    /// Replace the formula of an aggregate subject.
    pub fn define_formula(&mut self, subject: &SubjectId, terms: &[FormulaTerm]) -> Result<(), EngineError> {
        let merged = self.validate_formula(subject, terms)?;
        let inputs: FxHashSet<SubjectId> = merged.iter().map(|t| t.input.clone()).collect();
        self.graph.replace_edges(subject, inputs);
        if let Some(s) = self.subjects.get_mut(subject) {
            s.formula = merged;
        }
        Ok(())
    }

    /// Remove a subject and its own formula edges.
    ///
    /// Formulas of dependents keep referencing the removed id; recomputing
    /// them fails with `SubjectNotFound` until they are redefined.
    pub fn remove(&mut self, subject: &SubjectId) -> Result<Subject, EngineError> {
        let removed = self
            .subjects
            .remove(subject)
            .ok_or_else(|| EngineError::SubjectNotFound(subject.clone()))?;
        self.graph.replace_edges(subject, FxHashSet::default());
        Ok(removed)
    }

    pub fn get(&self, subject: &SubjectId) -> Option<&Subject> {
        self.subjects.get(subject)
    }

    pub fn require(&self, subject: &SubjectId) -> Result<&Subject, EngineError> {
        self.subjects
            .get(subject)
            .ok_or_else(|| EngineError::SubjectNotFound(subject.clone()))
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.subjects.contains_key(subject)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// All subject ids, sorted.
    pub fn ids(&self) -> Vec<SubjectId> {
        let mut ids: Vec<SubjectId> = self.subjects.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Formula terms of `subject`; empty for BASE or unknown subjects.
    pub fn inputs_of(&self, subject: &SubjectId) -> &[FormulaTerm] {
        self.subjects.get(subject).map_or(&[], |s| s.formula.as_slice())
    }

    /// Subjects whose formula references `subject` directly.
    pub fn dependents_of(&self, subject: &SubjectId) -> Vec<SubjectId> {
        self.graph.dependents(subject)
    }

    /// Every subject downstream of `subject`, in topological order.
    pub fn transitive_dependents(&self, subject: &SubjectId) -> Result<Vec<SubjectId>, EngineError> {
        let downstream = self.graph.reachable_dependents(subject);
        self.graph
            .topo_order(&downstream)
            .map_err(EngineError::CircularReferenceDetected)
    }

    /// `subjects` plus everything downstream of them, in topological order.
    pub fn closure(&self, subjects: &FxHashSet<SubjectId>) -> Result<Vec<SubjectId>, EngineError> {
        let mut all = subjects.clone();
        for s in subjects {
            all.extend(self.graph.reachable_dependents(s));
        }
        self.graph.topo_order(&all).map_err(EngineError::CircularReferenceDetected)
    }

    /// `subjects` alone, in topological order.
    pub fn ordered(&self, subjects: &FxHashSet<SubjectId>) -> Result<Vec<SubjectId>, EngineError> {
        self.graph.topo_order(subjects).map_err(EngineError::CircularReferenceDetected)
    }

    /// BASE subjects feeding `subject`, directly or through other aggregates.
    ///
    /// Fails with `SubjectNotFound` on a dangling formula input.
    pub fn base_inputs(&self, subject: &SubjectId) -> Result<Vec<SubjectId>, EngineError> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![subject.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let s = self.require(&current)?;
            if s.is_base() {
                out.push(current);
            } else {
                stack.extend(s.formula.iter().map(|t| t.input.clone()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Every subject in evaluation order (inputs before aggregates).
    pub fn evaluation_order(&self) -> Result<Vec<SubjectId>, EngineError> {
        let all: FxHashSet<SubjectId> = self.subjects.keys().cloned().collect();
        self.graph.topo_order(&all).map_err(EngineError::CircularReferenceDetected)
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        self.graph.assert_consistent();
        for s in self.subjects.values() {
            let mut inputs: Vec<SubjectId> = s.formula.iter().map(|t| t.input.clone()).collect();
            inputs.sort();
            assert_eq!(self.graph.precedents(&s.id), inputs, "edges of {}", s.id);
            if s.is_base() {
                assert!(s.formula.is_empty(), "base subject {} has a formula", s.id);
            }
        }
        assert!(self.evaluation_order().is_ok(), "subject graph has a cycle");
    }
}
