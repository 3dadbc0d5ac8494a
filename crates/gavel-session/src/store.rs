//! Filesystem-backed session store with atomic writes and repair-on-load.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use gavel_core::types::{Review, SessionConfig};
use gavel_core::AuditError;

use crate::analysis::{
    self, CompletionAnalysis, ProgressAnalysis, StagnationReport, classify_trend,
    stagnation_recommendation,
};
use crate::state::{
    HistoryEntry, IterationRecord, JudgeFailure, PromptContext, QualityEntry, SessionState,
    WorkflowEntry, WorkflowStepResult,
};

pub const DEFAULT_STATE_DIR: &str = ".mcp-gan-state";
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_IO_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Relative paths resolve against the current directory; `~` expands to
    /// the home directory.
    pub state_dir: PathBuf,
    pub max_session_age: Duration,
    pub cleanup_interval: Duration,
    /// Extra attempts after the first for classifiable I/O failures.
    pub io_retries: u32,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            max_session_age: DEFAULT_MAX_SESSION_AGE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            io_retries: DEFAULT_IO_RETRIES,
        }
    }
}

/// Aggregate numbers for observability and the cleanup sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions: usize,
    pub total_audits: usize,
    pub oldest_updated_at: Option<DateTime<Utc>>,
    pub newest_updated_at: Option<DateTime<Utc>>,
}

/// The sole writer to the state directory. One file per session, written
/// atomically (temp file then rename within the directory).
pub struct SessionStore {
    config: SessionStoreConfig,
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        let base_dir = resolve_state_dir(&config.state_dir);
        Self { config, base_dir }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionStoreConfig::default())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 16 hex chars of SHA-256 over `"<cwd>:<user>:<now-ms>"`.
    pub fn generate_session_id() -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".into());
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
        let now_ms = Utc::now().timestamp_millis();
        let digest = Sha256::digest(format!("{cwd}:{user}:{now_ms}").as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Create and persist a fresh session.
    pub fn create_session(
        &self,
        id: &str,
        config: SessionConfig,
    ) -> Result<SessionState, AuditError> {
        validate_session_id(id)?;
        let state = SessionState::new(id, config);
        self.write_state(&state)?;
        debug!(session = id, "created session");
        Ok(state)
    }

    /// Load a session, repairing partial corruption in place. Total
    /// corruption reads as "not found".
    pub fn get_session(&self, id: &str) -> Result<Option<SessionState>, AuditError> {
        validate_session_id(id)?;
        let Some(text) = self.read_file(id)? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionState>(&text) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(session = id, error = %e, "session state failed strict parse, repairing");
                self.repair(id, &text)
            }
        }
    }

    /// Rebuild a valid state from whatever fields survive, rewrite it, and
    /// return it. Unreadable JSON or a missing identity means not-found.
    fn repair(&self, id: &str, text: &str) -> Result<Option<SessionState>, AuditError> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            warn!(session = id, "session state is unreadable JSON, treating as not found");
            return Ok(None);
        };
        let Some(obj) = value.as_object() else {
            return Ok(None);
        };
        if !obj.contains_key("id") && !obj.contains_key("createdAt") {
            return Ok(None);
        }

        let config = obj
            .get("config")
            .and_then(|v| serde_json::from_value::<SessionConfig>(v.clone()).ok())
            .unwrap_or_default();
        let mut state = SessionState::new(id, config);

        if let Some(created) = obj
            .get("createdAt")
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
        {
            state.created_at = created;
        }
        state.history = recover_list::<HistoryEntry>(obj.get("history"));
        state.iterations = recover_list::<IterationRecord>(obj.get("iterations"));
        state.workflow_history = recover_list::<WorkflowEntry>(obj.get("workflowHistory"));
        state.quality_progression = recover_list::<QualityEntry>(obj.get("qualityProgression"));
        state.prompt_context = obj
            .get("promptContext")
            .and_then(|v| serde_json::from_value::<PromptContext>(v.clone()).ok());
        state.last_review = obj
            .get("lastReview")
            .and_then(|v| serde_json::from_value::<Review>(v.clone()).ok());
        state.current_loop = obj
            .get("currentLoop")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(state.iterations.len() as u64) as u32;

        self.write_state(&state)?;
        warn!(session = id, "rewrote repaired session state");
        Ok(Some(state))
    }

    /// Append an audit to the history and update the latest review.
    pub fn add_audit_to_history(
        &self,
        id: &str,
        thought_number: u32,
        review: &Review,
        config: &SessionConfig,
    ) -> Result<SessionState, AuditError> {
        self.mutate(id, |state| {
            state.history.push(HistoryEntry {
                timestamp: Utc::now(),
                thought_number,
                review: review.clone(),
                config: config.clone(),
            });
            state.last_review = Some(review.clone());
        })
    }

    /// Append an iteration, advance the loop counter, retain the newest 25.
    pub fn add_iteration(
        &self,
        id: &str,
        iteration: IterationRecord,
    ) -> Result<SessionState, AuditError> {
        self.mutate(id, |state| {
            state.iterations.push(iteration);
            state.current_loop += 1;
            state.apply_retention();
        })
    }

    /// Append a workflow-step result, retaining the newest 100.
    pub fn add_workflow_step_result(
        &self,
        id: &str,
        step_name: &str,
        result: WorkflowStepResult,
        thought_number: u32,
    ) -> Result<SessionState, AuditError> {
        self.mutate(id, |state| {
            state.workflow_history.push(WorkflowEntry {
                step_name: step_name.to_string(),
                thought_number,
                timestamp: Utc::now(),
                result,
            });
            state.apply_retention();
        })
    }

    /// Append a quality sample, retaining the newest 50. A completed
    /// analysis flips the session to complete.
    pub fn track_quality_progression(
        &self,
        id: &str,
        entry: QualityEntry,
    ) -> Result<SessionState, AuditError> {
        self.mutate(id, |state| {
            if let Some(analysis) = &entry.completion_analysis {
                if analysis.is_completed() {
                    state.is_complete = true;
                    state.completion_reason = analysis.reason.clone();
                }
            }
            state.quality_progression.push(entry);
            state.apply_retention();
        })
    }

    /// Overwrite the single prompt-context slot.
    pub fn store_prompt_context(
        &self,
        id: &str,
        context: serde_json::Value,
    ) -> Result<SessionState, AuditError> {
        self.mutate(id, |state| {
            state.prompt_context = Some(PromptContext {
                context,
                stored_at: Utc::now(),
                session_loop: state.current_loop,
            });
        })
    }

    pub fn get_prompt_context(&self, id: &str) -> Result<Option<PromptContext>, AuditError> {
        Ok(self
            .get_session(id)?
            .ok_or_else(|| AuditError::SessionNotFound(id.to_string()))?
            .prompt_context)
    }

    /// Record a judge failure against the session. Never propagates its own
    /// write failure; a broken state directory must not mask the audit error
    /// being recorded.
    pub fn record_codex_failure(
        &self,
        id: &str,
        thought_number: u32,
        error: &str,
        context: Option<String>,
    ) {
        let outcome = self.mutate(id, |state| {
            state.codex_failures.push(JudgeFailure {
                timestamp: Utc::now(),
                thought_number,
                error: error.to_string(),
                context,
            });
            state.has_codex_issues = true;
            state.last_codex_failure = Some(Utc::now());
        });
        if let Err(e) = outcome {
            warn!(session = id, error = %e, "failed to record judge failure; swallowing");
        }
    }

    pub fn delete_session(&self, id: &str) -> Result<(), AuditError> {
        validate_session_id(id)?;
        let path = self.session_path(id);
        if !path.exists() {
            return Err(AuditError::SessionNotFound(id.to_string()));
        }
        std::fs::remove_file(&path).map_err(|e| AuditError::SessionPersistence {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Every loadable session in the state directory. Corrupt files are
    /// skipped, not repaired, so listing stays read-only.
    pub fn get_all_sessions(&self) -> Result<Vec<SessionState>, AuditError> {
        let mut sessions = Vec::new();
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => {
                return Err(AuditError::SessionPersistence {
                    id: "*".into(),
                    reason: e.to_string(),
                });
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<SessionState>(&text) {
                Ok(state) => sessions.push(state),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unparsable session file")
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    pub fn session_stats(&self) -> Result<StoreStats, AuditError> {
        let sessions = self.get_all_sessions()?;
        Ok(StoreStats {
            sessions: sessions.len(),
            total_audits: sessions.iter().map(|s| s.history.len()).sum(),
            oldest_updated_at: sessions.iter().map(|s| s.updated_at).min(),
            newest_updated_at: sessions.iter().map(|s| s.updated_at).max(),
        })
    }

    /// Remove sessions older than the configured age, plus files that are
    /// neither loadable nor repairable. Returns how many files were removed.
    pub fn cleanup_stale_sessions(&self) -> Result<usize, AuditError> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AuditError::SessionPersistence {
                    id: "*".into(),
                    reason: e.to_string(),
                });
            }
        };
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.max_session_age)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = match std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<SessionState>(&text).ok())
            {
                Some(state) => state.updated_at < cutoff,
                // Unparsable and no identity to repair against: sweep it.
                None => true,
            };
            if stale {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                    debug!(path = %path.display(), "swept stale session file");
                }
            }
        }
        Ok(removed)
    }

    /// Hourly sweep until the handle is aborted.
    pub fn start_cleanup_task(store: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = store.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh store
            // does not sweep at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.cleanup_stale_sessions() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "session cleanup sweep finished"),
                    Err(e) => warn!(error = %e, "session cleanup sweep failed"),
                }
            }
        })
    }

    /// Score progression, average improvement, and stagnation for a session.
    pub fn analyze_progress(&self, id: &str) -> Result<ProgressAnalysis, AuditError> {
        let state = self
            .get_session(id)?
            .ok_or_else(|| AuditError::SessionNotFound(id.to_string()))?;
        let scores = state.score_progression();
        Ok(ProgressAnalysis {
            current_loop: state.current_loop,
            average_improvement: analysis::average_improvement(&scores),
            is_stagnant: analysis::is_stagnant(&scores),
            trend: classify_trend(&scores),
            score_progression: scores,
        })
    }

    pub fn detect_stagnation(&self, id: &str) -> Result<StagnationReport, AuditError> {
        let state = self
            .get_session(id)?
            .ok_or_else(|| AuditError::SessionNotFound(id.to_string()))?;
        let scores = state.score_progression();
        let stagnant = analysis::is_stagnant(&scores);
        Ok(StagnationReport {
            is_stagnant: stagnant,
            detected_at_loop: state.current_loop,
            similarity_score: analysis::similarity_score(&scores),
            recommendation: stagnation_recommendation(stagnant),
        })
    }

    /// Completion decision for the latest score, using the session's config.
    pub fn evaluate_completion(
        &self,
        id: &str,
        latest_score: u32,
    ) -> Result<CompletionAnalysis, AuditError> {
        let state = self
            .get_session(id)?
            .ok_or_else(|| AuditError::SessionNotFound(id.to_string()))?;
        let stagnant = analysis::is_stagnant(&state.score_progression());
        Ok(analysis::evaluate_completion(
            latest_score,
            state.current_loop,
            &state.config,
            stagnant,
        ))
    }

    // ── persistence plumbing ─────────────────────────────────────────

    fn mutate<F>(&self, id: &str, apply: F) -> Result<SessionState, AuditError>
    where
        F: FnOnce(&mut SessionState),
    {
        let mut state = self
            .get_session(id)?
            .ok_or_else(|| AuditError::SessionNotFound(id.to_string()))?;
        apply(&mut state);
        state.updated_at = Utc::now();
        self.write_state(&state)?;
        Ok(state)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    fn ensure_dir(&self) -> Result<(), AuditError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| AuditError::DirectoryCreation {
            path: self.base_dir.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn read_file(&self, id: &str) -> Result<Option<String>, AuditError> {
        let path = self.session_path(id);
        let mut last_error = None;
        for _ in 0..=self.config.io_retries {
            match std::fs::read_to_string(&path) {
                Ok(text) => return Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => last_error = Some(e),
            }
        }
        Err(AuditError::SessionPersistence {
            id: id.to_string(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "read failed".into()),
        })
    }

    fn write_state(&self, state: &SessionState) -> Result<(), AuditError> {
        self.ensure_dir()?;
        let path = self.session_path(&state.id);
        let json =
            serde_json::to_string_pretty(state).map_err(|e| AuditError::SessionPersistence {
                id: state.id.clone(),
                reason: format!("serialization failed: {e}"),
            })?;

        let mut last_error = None;
        for _ in 0..=self.config.io_retries {
            match self.atomic_write(&path, &json) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(AuditError::SessionPersistence {
            id: state.id.clone(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "write failed".into()),
        })
    }

    /// Write-to-temp then rename within the state directory; the rename is
    /// the crash-safety boundary.
    fn atomic_write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// The prompt builder reaches the context slot through this seam.
impl gavel_core::collab::PromptContextSink for SessionStore {
    fn store_prompt_context(
        &self,
        session_id: &str,
        context: serde_json::Value,
    ) -> Result<(), AuditError> {
        SessionStore::store_prompt_context(self, session_id, context).map(|_| ())
    }

    fn get_prompt_context(
        &self,
        session_id: &str,
    ) -> Result<Option<serde_json::Value>, AuditError> {
        Ok(SessionStore::get_prompt_context(self, session_id)?.map(|slot| slot.context))
    }
}

fn recover_list<T: serde::de::DeserializeOwned>(value: Option<&serde_json::Value>) -> Vec<T> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<T>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Generated ids are 16 lowercase hex chars; caller-supplied ids must stay
/// filesystem-safe.
fn validate_session_id(id: &str) -> Result<(), AuditError> {
    if id.is_empty() || id.len() > 128 {
        return Err(AuditError::InvalidRequest(format!(
            "session id '{id}' has invalid length"
        )));
    }
    if id.starts_with('.') {
        return Err(AuditError::InvalidRequest(format!(
            "session id '{id}' must not start with '.'"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AuditError::InvalidRequest(format!(
            "session id '{id}' contains filesystem-unsafe characters"
        )));
    }
    Ok(())
}

fn resolve_state_dir(configured: &Path) -> PathBuf {
    if let Ok(stripped) = configured.strip_prefix("~") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(stripped);
        }
    }
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(configured))
            .unwrap_or_else(|_| configured.to_path_buf())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
