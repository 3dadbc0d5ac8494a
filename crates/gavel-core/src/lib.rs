//! Core data model for the audit orchestrator: thoughts, requests, reviews,
//! the error taxonomy, and collaborator seams.

pub mod collab;
pub mod error;
pub mod request;
pub mod types;

pub use collab::{ContextPacker, PromptContextSink, SessionConfigProvider, StaticConfigProvider};
pub use error::AuditError;
pub use request::{AuditBudget, AuditRequest, RubricDimension};
pub use types::{
    DEFAULT_RUBRIC_DIMENSIONS, DimensionScore, EvidenceItem, InlineComment, JudgeCard, Review,
    ReviewBody, SessionConfig, Severity, Thought, Verdict,
};
