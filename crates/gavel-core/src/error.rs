//! Typed failure kinds for the audit pipeline.
//!
//! Callers dispatch on the variant, never on the message text. The engine is
//! the only layer that converts one of these into a fallback review.

/// Every failure the pipeline can surface, one variant per kind.
#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("Judge not available: {reason}")]
    NotAvailable {
        reason: String,
        /// Actionable guidance (install hints, PATH fixes). May be empty.
        recommendations: Vec<String>,
    },

    #[error("Audit timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("Invalid audit request: {0}")]
    InvalidRequest(String),

    #[error("Invalid submission format: {0}")]
    InvalidFormat(String),

    #[error("Response validation failed: {message}")]
    Response {
        message: String,
        /// Raw judge output, kept for diagnostics.
        raw_response: String,
    },

    #[error("Audit queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Timed out waiting for a queue slot after {waited_ms} ms")]
    QueueTimeout { waited_ms: u64 },

    #[error("Queue cleared")]
    QueueCleared,

    #[error("Queue destroyed")]
    QueueDestroyed,

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Session '{id}' is corrupted: {reason}")]
    SessionCorruption { id: String, reason: String },

    #[error("Failed to persist session '{id}': {reason}")]
    SessionPersistence { id: String, reason: String },

    #[error("Failed to create directory '{path}': {reason}")]
    DirectoryCreation { path: String, reason: String },

    #[error("Environment resolution failed: {0}")]
    Environment(String),

    #[error("Failed to spawn judge process: {0}")]
    Spawn(String),

    #[error("Failed to write to judge stdin: {0}")]
    StdinWrite(String),

    #[error("Judge exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Shutting down; new executions are rejected")]
    ShuttingDown,
}

impl AuditError {
    /// Whether the judge client may retry after this failure.
    ///
    /// Unavailability, parse rejections, and timeouts surface immediately;
    /// unknown-cause exits and spawn failures are considered transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuditError::Spawn(_) | AuditError::NonZeroExit { .. } | AuditError::StdinWrite(_)
        )
    }

    /// Stable kind label used in logs and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::NotAvailable { .. } => "not-available",
            AuditError::Timeout { .. } => "timeout",
            AuditError::InvalidRequest(_) => "invalid-request",
            AuditError::InvalidFormat(_) => "invalid-format",
            AuditError::Response { .. } => "response",
            AuditError::QueueFull { .. } => "queue-full",
            AuditError::QueueTimeout { .. } => "queue-timeout",
            AuditError::QueueCleared => "queue-cleared",
            AuditError::QueueDestroyed => "queue-destroyed",
            AuditError::SessionNotFound(_) => "session-not-found",
            AuditError::SessionCorruption { .. } => "session-corruption",
            AuditError::SessionPersistence { .. } => "session-persistence",
            AuditError::DirectoryCreation { .. } => "directory-creation",
            AuditError::Environment(_) => "environment",
            AuditError::Spawn(_) => "spawn",
            AuditError::StdinWrite(_) => "stdin-write",
            AuditError::NonZeroExit { .. } => "non-zero-exit",
            AuditError::ShuttingDown => "shutting-down",
        }
    }
}
