//! Driving the judge CLI: prompt construction, invocation with retry, and
//! tolerant parsing of its JSON-lines output into a canonical review.

pub mod client;
pub mod parser;
pub mod prompt;

pub use client::{JUDGE_ARGS, JudgeClient, JudgeClientConfig};
pub use parser::parse_review;
pub use prompt::{build_audit_prompt, sanitize_text};
