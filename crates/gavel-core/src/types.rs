//! Canonical review artifact and the submission types that feed it.

use serde::{Deserialize, Serialize};

/// Default rubric axes used when the caller does not supply one.
///
/// Order matters: fallback reviews synthesize their dimension list from
/// these names.
pub const DEFAULT_RUBRIC_DIMENSIONS: &[&str] = &[
    "accuracy",
    "completeness",
    "clarity",
    "actionability",
    "human_likeness",
];

/// A submission to be audited. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Positive, monotonic per session.
    pub thought_number: u32,

    /// The submitted text, possibly containing code.
    pub text: String,

    /// Opaque branch identifier, if the caller tracks branches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

impl Thought {
    pub fn new(thought_number: u32, text: impl Into<String>) -> Self {
        Self {
            thought_number,
            text: text.into(),
            branch_id: None,
        }
    }
}

/// The judge's ship/no-ship decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Revise,
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Revise => write!(f, "revise"),
            Verdict::Reject => write!(f, "reject"),
        }
    }
}

/// A named rubric axis with its awarded score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub name: String,
    /// Rounded integer in `[0, 100]`.
    pub score: u32,
}

/// A review comment anchored to a file location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    /// 1-based line number.
    pub line: u32,
    pub comment: String,
}

/// The prose part of a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewBody {
    /// Non-empty overall assessment.
    pub summary: String,
    #[serde(default)]
    pub inline: Vec<InlineComment>,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// One judge's contribution to the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeCard {
    pub model: String,
    /// Rounded integer in `[0, 100]`.
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The engine's only success shape.
///
/// Field names match the judge's wire format; a canonical review serialized
/// with serde round-trips through the response parser unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Rounded integer in `[0, 100]`.
    pub overall: u32,
    /// Non-empty; covers the rubric.
    pub dimensions: Vec<DimensionScore>,
    pub verdict: Verdict,
    pub review: ReviewBody,
    pub proposed_diff: Option<String>,
    /// Positive.
    pub iterations: u32,
    /// Non-empty.
    pub judge_cards: Vec<JudgeCard>,
}

impl Review {
    /// Check every canonical-shape invariant, returning all violations.
    ///
    /// An empty result means the review may be returned to callers; the
    /// parser and the engine both gate on this.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.overall > 100 {
            problems.push(format!("overall score {} out of range", self.overall));
        }
        if self.dimensions.is_empty() {
            problems.push("dimensions must not be empty".to_string());
        }
        for dim in &self.dimensions {
            if dim.name.is_empty() {
                problems.push("dimension name must not be empty".to_string());
            }
            if dim.score > 100 {
                problems.push(format!(
                    "dimension '{}' score {} out of range",
                    dim.name, dim.score
                ));
            }
        }
        if self.review.summary.is_empty() {
            problems.push("review.summary must not be empty".to_string());
        }
        for item in &self.review.inline {
            if item.line == 0 {
                problems.push(format!("inline comment on '{}' has line 0", item.path));
            }
        }
        if self.iterations == 0 {
            problems.push("iterations must be positive".to_string());
        }
        if self.judge_cards.is_empty() {
            problems.push("judge_cards must not be empty".to_string());
        }
        for card in &self.judge_cards {
            if card.score > 100 {
                problems.push(format!(
                    "judge card '{}' score {} out of range",
                    card.model, card.score
                ));
            }
        }
        problems
    }
}

/// Per-session audit configuration supplied by the outer system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub task: String,

    #[serde(default)]
    pub scope: String,

    /// Completion threshold on the overall score, `[0, 100]`.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Maximum improvement loops before forced completion.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    /// Candidate count the judge should consider.
    #[serde(default = "default_candidates")]
    pub candidates: u32,
}

fn default_threshold() -> u32 {
    85
}

fn default_max_cycles() -> u32 {
    10
}

fn default_candidates() -> u32 {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task: String::new(),
            scope: String::new(),
            threshold: default_threshold(),
            max_cycles: default_max_cycles(),
            candidates: default_candidates(),
        }
    }
}

/// Severity of a workflow evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

/// Evidence recorded against a workflow step. Not part of the canonical
/// review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub location: String,
    pub description: String,
    pub proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproduction_steps: Option<Vec<String>>,
}
