//! Audit request construction and fail-fast validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AuditError;
use crate::types::DEFAULT_RUBRIC_DIMENSIONS;

pub const MAX_TASK_LEN: usize = 10_000;
pub const MAX_CANDIDATE_LEN: usize = 100_000;
pub const MAX_CONTEXT_PACK_LEN: usize = 50_000;

/// A named, weighted rubric axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricDimension {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub description: String,
}

/// Cost and termination bounds passed through to the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditBudget {
    pub max_cycles: u32,
    pub candidates: u32,
    /// Completion threshold on the overall score, `[0, 100]`.
    pub threshold: u32,
}

impl Default for AuditBudget {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            candidates: 1,
            threshold: 85,
        }
    }
}

/// Everything the judge needs to audit one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub task: String,
    pub candidate: String,
    #[serde(default)]
    pub context_pack: String,
    pub rubric: Vec<RubricDimension>,
    pub budget: AuditBudget,
}

impl AuditRequest {
    /// Build a request with the default rubric (unit weights).
    pub fn new(task: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            candidate: candidate.into(),
            context_pack: String::new(),
            rubric: default_rubric(),
            budget: AuditBudget::default(),
        }
    }

    /// Validate against the size and range constraints. The first violation
    /// found fails the whole request; nothing downstream sees an invalid one.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.task.is_empty() {
            return Err(AuditError::InvalidRequest("task must not be empty".into()));
        }
        if self.task.len() > MAX_TASK_LEN {
            return Err(AuditError::InvalidRequest(format!(
                "task length {} exceeds {MAX_TASK_LEN}",
                self.task.len()
            )));
        }
        if self.candidate.is_empty() {
            return Err(AuditError::InvalidRequest(
                "candidate must not be empty".into(),
            ));
        }
        if self.candidate.len() > MAX_CANDIDATE_LEN {
            return Err(AuditError::InvalidRequest(format!(
                "candidate length {} exceeds {MAX_CANDIDATE_LEN}",
                self.candidate.len()
            )));
        }
        if self.context_pack.len() > MAX_CONTEXT_PACK_LEN {
            return Err(AuditError::InvalidRequest(format!(
                "context pack length {} exceeds {MAX_CONTEXT_PACK_LEN}",
                self.context_pack.len()
            )));
        }
        if self.rubric.is_empty() {
            return Err(AuditError::InvalidRequest(
                "rubric must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for dim in &self.rubric {
            if dim.name.is_empty() {
                return Err(AuditError::InvalidRequest(
                    "rubric dimension name must not be empty".into(),
                ));
            }
            if !seen.insert(dim.name.as_str()) {
                return Err(AuditError::InvalidRequest(format!(
                    "duplicate rubric dimension '{}'",
                    dim.name
                )));
            }
            if !dim.weight.is_finite() || dim.weight < 0.0 {
                return Err(AuditError::InvalidRequest(format!(
                    "rubric dimension '{}' has invalid weight {}",
                    dim.name, dim.weight
                )));
            }
        }
        if self.budget.max_cycles == 0 {
            return Err(AuditError::InvalidRequest(
                "budget.maxCycles must be at least 1".into(),
            ));
        }
        if self.budget.candidates == 0 {
            return Err(AuditError::InvalidRequest(
                "budget.candidates must be at least 1".into(),
            ));
        }
        if self.budget.threshold > 100 {
            return Err(AuditError::InvalidRequest(format!(
                "budget.threshold {} out of range",
                self.budget.threshold
            )));
        }
        Ok(())
    }
}

/// The default rubric: every default dimension at weight 1.0.
pub fn default_rubric() -> Vec<RubricDimension> {
    DEFAULT_RUBRIC_DIMENSIONS
        .iter()
        .map(|name| RubricDimension {
            name: (*name).to_string(),
            weight: 1.0,
            description: String::new(),
        })
        .collect()
}
