//! The synchronous audit engine and its supporting services: the review
//! cache, the code-likeness detector, the progress tracker, and the
//! priority queue that feeds the judge client.

pub mod cache;
pub mod detect;
pub mod engine;
pub mod progress;
pub mod queue;
pub mod telemetry;

pub use cache::{AuditCache, AuditCacheConfig, CacheStats, fingerprint};
pub use detect::{FormatReport, SubmissionFormat, contains_code_like_content, validate_format};
pub use engine::{AuditEngine, AuditEngineConfig, AuditResult};
pub use progress::{AuditStage, ProgressTracker, ProgressTrackerConfig, ProgressUpdate};
pub use queue::{AuditJobRunner, AuditPriority, AuditQueue, AuditQueueConfig, QueueStats};
pub use telemetry::init_tracing;
