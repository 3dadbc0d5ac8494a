//! Execution counters and the healthy/unhealthy predicate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling window for the execution-time average.
const ROLLING_WINDOW: usize = 100;

/// Activity newer than this keeps a busy manager "healthy".
const RECENT_ACTIVITY: Duration = Duration::from_secs(5 * 60);

/// Below this many executions the success-rate is not yet meaningful.
const WARMUP_EXECUTIONS: u64 = 5;

const HEALTHY_SUCCESS_RATE: f64 = 0.8;

/// Point-in-time view of the manager's health, safe to ship across tasks.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Mean over the last 100 completions, in milliseconds.
    pub average_execution_ms: f64,
    /// Milliseconds since the last completion, if any.
    pub last_activity_ms_ago: Option<u64>,
    /// Children currently alive.
    pub active: usize,
    pub healthy: bool,
}

#[derive(Debug, Default)]
pub(crate) struct HealthMetrics {
    started: u64,
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    durations: VecDeque<Duration>,
    last_activity: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl HealthMetrics {
    pub(crate) fn record_started(&mut self) {
        self.started += 1;
        self.last_activity = Some(Instant::now());
    }

    pub(crate) fn record_completion(&mut self, duration: Duration, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
        self.durations.push_back(duration);
        while self.durations.len() > ROLLING_WINDOW {
            self.durations.pop_front();
        }
        self.last_activity = Some(Instant::now());
    }

    /// Spawn failures count against the success rate without a duration.
    pub(crate) fn record_spawn_failure(&mut self) {
        self.failed += 1;
        self.last_activity = Some(Instant::now());
    }

    fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    fn average_execution_ms(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        let total_ms: f64 = self.durations.iter().map(|d| d.as_millis() as f64).sum();
        total_ms / self.durations.len() as f64
    }

    pub(crate) fn is_healthy(&self) -> bool {
        let completed = self.completed();
        if completed == 0 {
            return true;
        }
        let success_rate = self.succeeded as f64 / completed as f64;
        if success_rate < HEALTHY_SUCCESS_RATE {
            return false;
        }
        let recent = self
            .last_activity
            .is_some_and(|at| at.elapsed() <= RECENT_ACTIVITY);
        recent || completed < WARMUP_EXECUTIONS
    }

    pub(crate) fn snapshot(&self, active: usize) -> HealthSnapshot {
        HealthSnapshot {
            started: self.started,
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            average_execution_ms: self.average_execution_ms(),
            last_activity_ms_ago: self.last_activity.map(|at| at.elapsed().as_millis() as u64),
            active,
            healthy: self.is_healthy(),
        }
    }
}
