//! Progress, stagnation, and completion analysis over quality scores.

use serde::{Deserialize, Serialize};

use gavel_core::types::SessionConfig;

/// How many trailing scores the stagnation window covers.
pub const STAGNATION_WINDOW: usize = 5;
/// Stagnant when the window's spread (max - min) is at most this.
pub const STAGNATION_SCORE_SPREAD: u32 = 2;
/// Scores needed before stagnation is meaningful.
pub const STAGNATION_MIN_SAMPLES: usize = 3;

/// Completion decision recorded alongside a quality sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionAnalysis {
    /// `"completed"` or `"in_progress"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CompletionAnalysis {
    pub fn completed(reason: &str) -> Self {
        Self {
            status: "completed".into(),
            reason: Some(reason.into()),
        }
    }

    pub fn in_progress() -> Self {
        Self {
            status: "in_progress".into(),
            reason: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// Direction of the recent quality movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTrend {
    Improving,
    Declining,
    Stable,
}

/// Output of `SessionStore::analyze_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAnalysis {
    pub current_loop: u32,
    pub score_progression: Vec<u32>,
    pub average_improvement: f64,
    pub is_stagnant: bool,
    pub trend: QualityTrend,
}

/// Output of `SessionStore::detect_stagnation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagnationReport {
    pub is_stagnant: bool,
    pub detected_at_loop: u32,
    /// `[0, 1]`; 1.0 means recent scores are effectively identical.
    pub similarity_score: f64,
    pub recommendation: String,
}

/// Mean of consecutive deltas over the whole progression.
pub fn average_improvement(scores: &[u32]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let total: f64 = scores
        .windows(2)
        .map(|pair| pair[1] as f64 - pair[0] as f64)
        .sum();
    total / (scores.len() - 1) as f64
}

/// Stagnant when at least three scores exist and the last window's spread
/// is within [`STAGNATION_SCORE_SPREAD`].
pub fn is_stagnant(scores: &[u32]) -> bool {
    if scores.len() < STAGNATION_MIN_SAMPLES {
        return false;
    }
    let window = trailing_window(scores);
    let max = window.iter().max().copied().unwrap_or(0);
    let min = window.iter().min().copied().unwrap_or(0);
    max - min <= STAGNATION_SCORE_SPREAD
}

/// `max(0, 1 - avg|delta|/10)` over the trailing window.
pub fn similarity_score(scores: &[u32]) -> f64 {
    let window = trailing_window(scores);
    if window.len() < 2 {
        return 0.0;
    }
    let total: f64 = window
        .windows(2)
        .map(|pair| (pair[1] as f64 - pair[0] as f64).abs())
        .sum();
    let avg_delta = total / (window.len() - 1) as f64;
    (1.0 - avg_delta / 10.0).max(0.0)
}

/// Improving above +1 average delta, declining below -1, stable between.
pub fn classify_trend(scores: &[u32]) -> QualityTrend {
    let avg = average_improvement(scores);
    if avg > 1.0 {
        QualityTrend::Improving
    } else if avg < -1.0 {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    }
}

/// Decide whether a session is done after the latest audit.
pub fn evaluate_completion(
    latest_score: u32,
    current_loop: u32,
    config: &SessionConfig,
    stagnant: bool,
) -> CompletionAnalysis {
    if latest_score >= config.threshold {
        return CompletionAnalysis::completed("threshold_reached");
    }
    if current_loop >= config.max_cycles {
        return CompletionAnalysis::completed("max_cycles_reached");
    }
    if stagnant {
        return CompletionAnalysis::completed("stagnation");
    }
    CompletionAnalysis::in_progress()
}

pub(crate) fn stagnation_recommendation(stagnant: bool) -> String {
    if stagnant {
        "Recent scores have plateaued; change the approach or finalize the session".into()
    } else {
        "Scores are still moving; continue iterating".into()
    }
}

fn trailing_window(scores: &[u32]) -> &[u32] {
    let start = scores.len().saturating_sub(STAGNATION_WINDOW);
    &scores[start..]
}
