//! Durable per-session audit state on the local filesystem, with
//! progress and stagnation analysis over the recorded quality scores.

pub mod analysis;
pub mod state;
pub mod store;

pub use analysis::{
    CompletionAnalysis, ProgressAnalysis, QualityTrend, StagnationReport, average_improvement,
    evaluate_completion, is_stagnant, similarity_score,
};
pub use state::{
    HistoryEntry, IterationRecord, JudgeFailure, PromptContext, QualityEntry, SessionState,
    WorkflowEntry, WorkflowStepResult,
};
pub use store::{SessionStore, SessionStoreConfig, StoreStats};
