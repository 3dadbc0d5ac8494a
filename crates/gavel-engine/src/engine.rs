//! The synchronous audit engine: the single entry point the outer system
//! calls. Always hands back a canonical review; when the judge cannot
//! produce one, the engine is the only layer allowed to synthesize a
//! fallback.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use gavel_core::collab::{ContextPacker, SessionConfigProvider, StaticConfigProvider};
use gavel_core::request::{AuditBudget, default_rubric};
use gavel_core::types::{
    DEFAULT_RUBRIC_DIMENSIONS, DimensionScore, JudgeCard, Review, ReviewBody, SessionConfig,
    Thought, Verdict,
};
use gavel_core::{AuditError, AuditRequest};
use gavel_judge::JudgeClient;
use gavel_session::{QualityEntry, SessionStore};

use crate::cache::AuditCache;
use crate::detect;
use crate::progress::{AuditStage, ProgressTracker};
use crate::queue::{AuditJobRunner, AuditPriority, AuditQueue, AuditQueueConfig, QueueStats};

/// Judge-card model recorded on engine-synthesized reviews.
pub const FALLBACK_JUDGE_MODEL: &str = "synchronous-audit-engine-fallback";

pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(30);

const NEUTRAL_SCORE: u32 = 50;
const SKIP_SCORE: u32 = 100;

#[derive(Debug, Clone)]
pub struct AuditEngineConfig {
    /// Disabled engines return a perfect-score skipped review immediately.
    pub enabled: bool,
    /// Engine-level deadline, enforced above the queue and child timeouts.
    pub audit_timeout: Duration,
    pub priority: AuditPriority,
    /// Strict mode throws typed errors instead of synthesizing fallbacks.
    pub strict: bool,
}

impl Default for AuditEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_timeout: DEFAULT_AUDIT_TIMEOUT,
            priority: AuditPriority::Normal,
            strict: false,
        }
    }
}

/// What `audit_and_wait` hands back: a review plus the outcome facts.
#[derive(Debug, Clone)]
pub struct AuditResult {
    pub review: Review,
    pub success: bool,
    pub timed_out: bool,
    pub duration: Duration,
    pub error: Option<String>,
    pub session_id: Option<String>,
}

/// Top-level orchestrator wiring cache, queue, progress, and sessions.
pub struct AuditEngine {
    config: AuditEngineConfig,
    cache: AuditCache,
    queue: Arc<AuditQueue>,
    sessions: Arc<SessionStore>,
    progress: ProgressTracker,
    config_provider: Arc<dyn SessionConfigProvider>,
    context_packer: Option<Arc<dyn ContextPacker>>,
    audit_seq: AtomicU64,
}

/// The judge client is the production job runner.
#[async_trait]
impl AuditJobRunner for JudgeClient {
    async fn run(&self, request: &AuditRequest) -> Result<Review, AuditError> {
        self.audit(request).await
    }
}

impl AuditEngine {
    pub fn new(
        config: AuditEngineConfig,
        runner: Arc<dyn AuditJobRunner>,
        queue_config: AuditQueueConfig,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            config,
            cache: AuditCache::with_defaults(),
            queue: AuditQueue::new(queue_config, runner),
            sessions,
            progress: ProgressTracker::with_defaults(),
            config_provider: Arc::new(StaticConfigProvider::default()),
            context_packer: None,
            audit_seq: AtomicU64::new(0),
        }
    }

    pub fn with_config_provider(mut self, provider: Arc<dyn SessionConfigProvider>) -> Self {
        self.config_provider = provider;
        self
    }

    pub fn with_context_packer(mut self, packer: Arc<dyn ContextPacker>) -> Self {
        self.context_packer = Some(packer);
        self
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    pub fn progress_tracker(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Tear down the queue; pending and running audits are rejected.
    pub fn shutdown(&self) {
        self.queue.destroy();
    }

    /// Audit one thought and block until a review exists.
    ///
    /// In the default (non-strict) mode every failure becomes a synthesized
    /// fallback review with `success = false`; only strict mode and
    /// session-persistence failures surface as errors.
    pub async fn audit_and_wait(
        &self,
        thought: &Thought,
        session_id: Option<&str>,
    ) -> Result<AuditResult, AuditError> {
        let started = Instant::now();

        if !self.config.enabled {
            return Ok(self.skip_result(
                "Audit skipped: auditing is disabled",
                started,
                session_id,
            ));
        }
        if !detect::contains_code_like_content(&thought.text) {
            return Ok(self.skip_result(
                "Audit skipped: no code-like content detected in the submission",
                started,
                session_id,
            ));
        }

        let format = detect::validate_format(&thought.text);
        for issue in &format.issues {
            debug!(
                issue = %issue,
                format = format.format.as_str(),
                thought = thought.thought_number,
                "submission format issue; continuing on cleaned text"
            );
        }

        let session_config = self.config_provider.session_config(session_id);
        let context_pack = match &self.context_packer {
            Some(packer) => match packer.build_context_pack(&session_config).await {
                Ok(pack) => pack,
                Err(e) => {
                    warn!(error = %e, "context packer failed; auditing without context");
                    String::new()
                }
            },
            None => String::new(),
        };

        let request = build_request(&format.cleaned, &session_config, context_pack);
        if let Err(e) = request.validate() {
            return self.failure(e, thought, session_id, started);
        }

        if let Some(hit) = self.cache.get(&request) {
            debug!(thought = thought.thought_number, "returning cached review");
            return Ok(AuditResult {
                review: hit,
                success: true,
                timed_out: false,
                duration: started.elapsed(),
                error: None,
                session_id: session_id.map(String::from),
            });
        }

        let audit_id = format!(
            "audit-{}-{}",
            thought.thought_number,
            self.audit_seq.fetch_add(1, Ordering::SeqCst)
        );
        self.progress.start_tracking(&audit_id);
        self.progress
            .update_stage(&audit_id, AuditStage::RunningChecks, Some("judge running"));

        let outcome = match tokio::time::timeout(
            self.config.audit_timeout,
            self.queue.submit(request.clone(), self.config.priority),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(AuditError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
                limit_ms: self.config.audit_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(review) => {
                self.progress.complete_tracking(&audit_id, true);
                self.cache.set(&request, &review);
                self.record_success(thought, session_id, &session_config, &review)?;
                Ok(AuditResult {
                    review,
                    success: true,
                    timed_out: false,
                    duration: started.elapsed(),
                    error: None,
                    session_id: session_id.map(String::from),
                })
            }
            Err(e) => {
                self.progress.complete_tracking(&audit_id, false);
                self.failure(e, thought, session_id, started)
            }
        }
    }

    /// Classify the failure and synthesize the matching fallback, unless
    /// strict mode asked for the raw error.
    fn failure(
        &self,
        error: AuditError,
        thought: &Thought,
        session_id: Option<&str>,
        started: Instant,
    ) -> Result<AuditResult, AuditError> {
        if self.config.strict {
            return Err(error);
        }
        if let Some(sid) = session_id {
            self.sessions
                .record_codex_failure(sid, thought.thought_number, &error.to_string(), None);
        }

        let class = classify_failure(&error);
        let summary = match class {
            FailureClass::ServiceUnavailable => format!(
                "Audit service unavailable: {error}. Install the judge CLI and verify PATH, \
                 then retry."
            ),
            FailureClass::TimedOut => format!(
                "Audit timed out: {error}. The judge did not respond within the configured \
                 limit; reduce the submission size or raise the timeout."
            ),
            FailureClass::Generic => format!("Audit failed: {error}."),
        };
        warn!(
            thought = thought.thought_number,
            kind = error.kind(),
            "synthesizing fallback review"
        );

        Ok(AuditResult {
            review: fallback_review(NEUTRAL_SCORE, Verdict::Revise, &summary),
            success: false,
            timed_out: matches!(class, FailureClass::TimedOut),
            duration: started.elapsed(),
            error: Some(error.to_string()),
            session_id: session_id.map(String::from),
        })
    }

    fn skip_result(
        &self,
        summary: &str,
        started: Instant,
        session_id: Option<&str>,
    ) -> AuditResult {
        AuditResult {
            review: fallback_review(SKIP_SCORE, Verdict::Pass, summary),
            success: true,
            timed_out: false,
            duration: started.elapsed(),
            error: None,
            session_id: session_id.map(String::from),
        }
    }

    /// Persist a successful audit: history entry plus a quality sample with
    /// its completion decision. Write failures here surface to the caller.
    fn record_success(
        &self,
        thought: &Thought,
        session_id: Option<&str>,
        config: &SessionConfig,
        review: &Review,
    ) -> Result<(), AuditError> {
        let Some(sid) = session_id else {
            return Ok(());
        };
        if self.sessions.get_session(sid)?.is_none() {
            self.sessions.create_session(sid, config.clone())?;
        }
        self.sessions
            .add_audit_to_history(sid, thought.thought_number, review, config)?;
        let completion = self.sessions.evaluate_completion(sid, review.overall)?;
        self.sessions.track_quality_progression(
            sid,
            QualityEntry {
                timestamp: Utc::now(),
                thought_number: Some(thought.thought_number),
                overall_score: review.overall,
                completion_analysis: Some(completion),
            },
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    ServiceUnavailable,
    TimedOut,
    Generic,
}

/// Dispatch on kind first; message probing is the tolerant tail for errors
/// that arrive pre-stringified from the judge.
fn classify_failure(error: &AuditError) -> FailureClass {
    match error {
        AuditError::NotAvailable { .. } => FailureClass::ServiceUnavailable,
        AuditError::Timeout { .. } | AuditError::QueueTimeout { .. } => FailureClass::TimedOut,
        other => {
            let message = other.to_string().to_lowercase();
            if message.contains("timed out") {
                FailureClass::TimedOut
            } else if message.contains("not available")
                || message.contains("connection refused")
                || message.contains("network")
            {
                FailureClass::ServiceUnavailable
            } else {
                FailureClass::Generic
            }
        }
    }
}

/// A canonical review synthesized by the engine. Never cached.
fn fallback_review(score: u32, verdict: Verdict, summary: &str) -> Review {
    Review {
        overall: score,
        dimensions: DEFAULT_RUBRIC_DIMENSIONS
            .iter()
            .map(|name| DimensionScore {
                name: (*name).to_string(),
                score,
            })
            .collect(),
        verdict,
        review: ReviewBody {
            summary: summary.to_string(),
            inline: Vec::new(),
            citations: Vec::new(),
        },
        proposed_diff: None,
        iterations: 1,
        judge_cards: vec![JudgeCard {
            model: FALLBACK_JUDGE_MODEL.to_string(),
            score,
            notes: None,
        }],
    }
}

fn build_request(
    candidate: &str,
    config: &SessionConfig,
    context_pack: String,
) -> AuditRequest {
    let task = if config.task.is_empty() {
        "Audit the submitted code for correctness, completeness, and clarity.".to_string()
    } else {
        config.task.clone()
    };
    AuditRequest {
        task,
        candidate: candidate.to_string(),
        context_pack,
        rubric: default_rubric(),
        budget: AuditBudget {
            max_cycles: config.max_cycles,
            candidates: config.candidates,
            threshold: config.threshold,
        },
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
