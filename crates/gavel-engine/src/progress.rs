//! Stage-weighted progress reporting for long-running audits.
//!
//! Audits shorter than the activation threshold never surface; beyond it, a
//! periodic emitter publishes percentage, stage, and a remaining-time
//! estimate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_ACTIVATION_THRESHOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_TRACKED: usize = 10;

/// Audit stages with relative weights summing to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    Initializing,
    ParsingCode,
    AnalyzingStructure,
    RunningChecks,
    EvaluatingQuality,
    GeneratingFeedback,
    Finalizing,
    Completed,
    Failed,
}

impl AuditStage {
    /// Ordered working stages, terminal states excluded.
    pub const WORKING: &'static [AuditStage] = &[
        AuditStage::Initializing,
        AuditStage::ParsingCode,
        AuditStage::AnalyzingStructure,
        AuditStage::RunningChecks,
        AuditStage::EvaluatingQuality,
        AuditStage::GeneratingFeedback,
        AuditStage::Finalizing,
    ];

    pub fn weight(&self) -> u32 {
        match self {
            AuditStage::Initializing => 5,
            AuditStage::ParsingCode => 10,
            AuditStage::AnalyzingStructure => 15,
            AuditStage::RunningChecks => 40,
            AuditStage::EvaluatingQuality => 20,
            AuditStage::GeneratingFeedback => 8,
            AuditStage::Finalizing => 2,
            AuditStage::Completed | AuditStage::Failed => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuditStage::Initializing => "initializing",
            AuditStage::ParsingCode => "parsing_code",
            AuditStage::AnalyzingStructure => "analyzing_structure",
            AuditStage::RunningChecks => "running_checks",
            AuditStage::EvaluatingQuality => "evaluating_quality",
            AuditStage::GeneratingFeedback => "generating_feedback",
            AuditStage::Finalizing => "finalizing",
            AuditStage::Completed => "completed",
            AuditStage::Failed => "failed",
        }
    }

    /// Sum of weights of the stages before this one.
    fn cumulative_before(&self) -> u32 {
        let mut total = 0;
        for stage in Self::WORKING {
            if stage == self {
                break;
            }
            total += stage.weight();
        }
        total
    }
}

/// One published progress sample.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub audit_id: String,
    /// Rounded whole percentage in `[0, 100]`.
    pub percentage: u32,
    pub stage: AuditStage,
    pub message: Option<String>,
    pub estimated_remaining: Option<Duration>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ProgressTrackerConfig {
    /// Audits finishing before this are never reported.
    pub activation_threshold: Duration,
    pub emit_interval: Duration,
    /// Audits beyond this are silently untracked, never failed.
    pub max_tracked: usize,
}

impl Default for ProgressTrackerConfig {
    fn default() -> Self {
        Self {
            activation_threshold: DEFAULT_ACTIVATION_THRESHOLD,
            emit_interval: DEFAULT_EMIT_INTERVAL,
            max_tracked: DEFAULT_MAX_TRACKED,
        }
    }
}

struct Tracked {
    started_at: Instant,
    stage: AuditStage,
    /// Progress within the current stage, `[0, 100]`.
    stage_progress: u32,
    message: Option<String>,
}

/// Tracks in-flight audits and publishes [`ProgressUpdate`]s.
pub struct ProgressTracker {
    config: ProgressTrackerConfig,
    tracked: Arc<Mutex<HashMap<String, Tracked>>>,
    tx: broadcast::Sender<ProgressUpdate>,
}

impl ProgressTracker {
    pub fn new(config: ProgressTrackerConfig) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            config,
            tracked: Arc::new(Mutex::new(HashMap::new())),
            tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProgressTrackerConfig::default())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Begin tracking. Over-capacity audits are ignored, not failed.
    pub fn start_tracking(&self, audit_id: &str) {
        let mut tracked = self.tracked.lock().expect("progress lock");
        if tracked.len() >= self.config.max_tracked {
            debug!(audit_id, "progress tracker at capacity; not tracking");
            return;
        }
        tracked.insert(
            audit_id.to_string(),
            Tracked {
                started_at: Instant::now(),
                stage: AuditStage::Initializing,
                stage_progress: 0,
                message: None,
            },
        );
    }

    /// Advance to a new stage, resetting intra-stage progress.
    pub fn update_stage(&self, audit_id: &str, stage: AuditStage, message: Option<&str>) {
        let mut tracked = self.tracked.lock().expect("progress lock");
        if let Some(entry) = tracked.get_mut(audit_id) {
            entry.stage = stage;
            entry.stage_progress = 0;
            entry.message = message.map(String::from);
        }
    }

    /// Refine progress within the current stage.
    pub fn update_progress(&self, audit_id: &str, stage_progress: u32, message: Option<&str>) {
        let mut tracked = self.tracked.lock().expect("progress lock");
        if let Some(entry) = tracked.get_mut(audit_id) {
            entry.stage_progress = stage_progress.min(100);
            if let Some(message) = message {
                entry.message = Some(message.to_string());
            }
        }
    }

    /// Emit a terminal update and stop tracking.
    pub fn complete_tracking(&self, audit_id: &str, success: bool) {
        let entry = self.tracked.lock().expect("progress lock").remove(audit_id);
        if let Some(entry) = entry {
            let stage = if success {
                AuditStage::Completed
            } else {
                AuditStage::Failed
            };
            let _ = self.tx.send(ProgressUpdate {
                audit_id: audit_id.to_string(),
                percentage: 100,
                stage,
                message: entry.message,
                estimated_remaining: None,
                elapsed: entry.started_at.elapsed(),
            });
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().expect("progress lock").len()
    }

    /// Publish one update per active (threshold-exceeded) audit.
    pub fn emit_active(&self) {
        let updates: Vec<ProgressUpdate> = {
            let tracked = self.tracked.lock().expect("progress lock");
            tracked
                .iter()
                .filter(|(_, entry)| entry.started_at.elapsed() >= self.config.activation_threshold)
                .map(|(id, entry)| self.build_update(id, entry))
                .collect()
        };
        for update in updates {
            let _ = self.tx.send(update);
        }
    }

    /// Periodic emitter task; abort the handle to stop it.
    pub fn start_emitter(&self) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone_handle();
        let interval = self.config.emit_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracker.emit_active();
            }
        })
    }

    fn clone_handle(&self) -> ProgressTracker {
        ProgressTracker {
            config: self.config.clone(),
            tracked: Arc::clone(&self.tracked),
            tx: self.tx.clone(),
        }
    }

    fn build_update(&self, audit_id: &str, entry: &Tracked) -> ProgressUpdate {
        let percentage = percentage_of(entry.stage, entry.stage_progress);
        let elapsed = entry.started_at.elapsed();
        let estimated_remaining = if percentage > 0 && percentage < 100 {
            let per_point = elapsed.as_secs_f64() / percentage as f64;
            Some(Duration::from_secs_f64(
                per_point * (100 - percentage) as f64,
            ))
        } else {
            None
        };
        ProgressUpdate {
            audit_id: audit_id.to_string(),
            percentage,
            stage: entry.stage,
            message: entry.message.clone(),
            estimated_remaining,
            elapsed,
        }
    }
}

fn percentage_of(stage: AuditStage, stage_progress: u32) -> u32 {
    match stage {
        AuditStage::Completed | AuditStage::Failed => 100,
        working => {
            let base = working.cumulative_before() as f64;
            let within = working.weight() as f64 * stage_progress.min(100) as f64 / 100.0;
            (base + within).round() as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_weights_sum_to_100() {
        let total: u32 = AuditStage::WORKING.iter().map(|s| s.weight()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_percentage_accumulates_across_stages() {
        assert_eq!(percentage_of(AuditStage::Initializing, 0), 0);
        assert_eq!(percentage_of(AuditStage::ParsingCode, 0), 5);
        assert_eq!(percentage_of(AuditStage::RunningChecks, 0), 30);
        assert_eq!(percentage_of(AuditStage::RunningChecks, 50), 50);
        assert_eq!(percentage_of(AuditStage::Finalizing, 100), 100);
        assert_eq!(percentage_of(AuditStage::Completed, 0), 100);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(AuditStage::RunningChecks.name(), "running_checks");
        assert_eq!(AuditStage::Failed.name(), "failed");
    }

    #[tokio::test]
    async fn test_short_audits_are_silent() {
        let tracker = ProgressTracker::with_defaults();
        let mut rx = tracker.subscribe();

        tracker.start_tracking("audit-1");
        tracker.emit_active();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_active_audits_emit_updates() {
        let tracker = ProgressTracker::new(ProgressTrackerConfig {
            activation_threshold: Duration::from_millis(0),
            ..ProgressTrackerConfig::default()
        });
        let mut rx = tracker.subscribe();

        tracker.start_tracking("audit-1");
        tracker.update_stage("audit-1", AuditStage::RunningChecks, Some("invoking judge"));
        tracker.update_progress("audit-1", 50, None);
        tracker.emit_active();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.audit_id, "audit-1");
        assert_eq!(update.percentage, 50);
        assert_eq!(update.stage, AuditStage::RunningChecks);
        assert_eq!(update.message.as_deref(), Some("invoking judge"));
        assert!(update.estimated_remaining.is_some());
    }

    #[tokio::test]
    async fn test_complete_tracking_emits_terminal_update() {
        let tracker = ProgressTracker::with_defaults();
        let mut rx = tracker.subscribe();

        tracker.start_tracking("audit-1");
        tracker.complete_tracking("audit-1", true);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.stage, AuditStage::Completed);
        assert_eq!(update.percentage, 100);
        assert_eq!(tracker.tracked_count(), 0);

        tracker.start_tracking("audit-2");
        tracker.complete_tracking("audit-2", false);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.stage, AuditStage::Failed);
    }

    #[tokio::test]
    async fn test_capacity_overflow_is_ignored_not_failed() {
        let tracker = ProgressTracker::new(ProgressTrackerConfig {
            max_tracked: 2,
            ..ProgressTrackerConfig::default()
        });
        tracker.start_tracking("a");
        tracker.start_tracking("b");
        tracker.start_tracking("c");
        assert_eq!(tracker.tracked_count(), 2);
        // Completing the untracked audit is a no-op.
        tracker.complete_tracking("c", true);
    }

    #[tokio::test]
    async fn test_emitter_task_publishes_periodically() {
        let tracker = ProgressTracker::new(ProgressTrackerConfig {
            activation_threshold: Duration::from_millis(0),
            emit_interval: Duration::from_millis(20),
            ..ProgressTrackerConfig::default()
        });
        let mut rx = tracker.subscribe();
        tracker.start_tracking("audit-1");
        let handle = tracker.start_emitter();

        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("an update within the window")
            .expect("update");
        assert_eq!(update.audit_id, "audit-1");
        handle.abort();
    }

    #[tokio::test]
    async fn test_zero_progress_has_no_estimate() {
        let tracker = ProgressTracker::new(ProgressTrackerConfig {
            activation_threshold: Duration::from_millis(0),
            ..ProgressTrackerConfig::default()
        });
        let mut rx = tracker.subscribe();
        tracker.start_tracking("audit-1");
        tracker.emit_active();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.percentage, 0);
        assert!(update.estimated_remaining.is_none());
    }
}
