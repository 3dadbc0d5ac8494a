//! Session state types as they appear on disk.
//!
//! Field names are camelCase in the JSON files; every non-essential field
//! is defaulted so older or partially-written files still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gavel_core::types::{EvidenceItem, Review, SessionConfig};

/// Iterations kept decompressed per session.
pub const MAX_RETAINED_ITERATIONS: usize = 25;
/// Workflow entries kept per session.
pub const MAX_RETAINED_WORKFLOW: usize = 100;
/// Quality entries kept per session.
pub const MAX_RETAINED_QUALITY: usize = 50;

/// One audited thought appended to the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub thought_number: u32,
    pub review: Review,
    pub config: SessionConfig,
}

/// One improvement-loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub thought_number: u32,
    /// The candidate text as submitted; retained only within this log.
    #[serde(default)]
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<Review>,
    pub timestamp: DateTime<Utc>,
}

/// Result of one named workflow step, recorded as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepResult {
    pub success: bool,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEntry {
    pub step_name: String,
    pub thought_number: u32,
    pub timestamp: DateTime<Utc>,
    pub result: WorkflowStepResult,
}

/// Completion decision attached to a quality sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_number: Option<u32>,
    pub overall_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_analysis: Option<crate::analysis::CompletionAnalysis>,
}

/// The single prompt-context slot for cross-loop continuity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub context: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub session_loop: u32,
}

/// A recorded judge failure. Never blocks the audit that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeFailure {
    pub timestamp: DateTime<Utc>,
    pub thought_number: u32,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The whole per-session tree, one JSON file per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub config: SessionConfig,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review: Option<Review>,
    #[serde(default)]
    pub current_loop: u32,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<String>,
    #[serde(default)]
    pub workflow_history: Vec<WorkflowEntry>,
    #[serde(default)]
    pub quality_progression: Vec<QualityEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_context: Option<PromptContext>,
    #[serde(default)]
    pub codex_failures: Vec<JudgeFailure>,
    #[serde(default)]
    pub has_codex_issues: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_codex_failure: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            config,
            history: Vec::new(),
            last_review: None,
            current_loop: 0,
            iterations: Vec::new(),
            is_complete: false,
            completion_reason: None,
            workflow_history: Vec::new(),
            quality_progression: Vec::new(),
            prompt_context: None,
            codex_failures: Vec::new(),
            has_codex_issues: false,
            last_codex_failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The ordered overall scores, oldest first.
    pub fn score_progression(&self) -> Vec<u32> {
        self.quality_progression
            .iter()
            .map(|entry| entry.overall_score)
            .collect()
    }

    /// Drop everything beyond the retention bounds, oldest first.
    pub fn apply_retention(&mut self) {
        trim_front(&mut self.iterations, MAX_RETAINED_ITERATIONS);
        trim_front(&mut self.workflow_history, MAX_RETAINED_WORKFLOW);
        trim_front(&mut self.quality_progression, MAX_RETAINED_QUALITY);
    }
}

fn trim_front<T>(list: &mut Vec<T>, keep: usize) {
    if list.len() > keep {
        let drop = list.len() - keep;
        list.drain(..drop);
    }
}
