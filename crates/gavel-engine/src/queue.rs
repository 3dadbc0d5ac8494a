//! Bounded priority queue that runs audit jobs against a runner.
//!
//! Priority-then-FIFO ordering, a periodic scheduler tick, per-job timeout,
//! and retry with re-insertion. The queue is independent of the process
//! manager's own concurrency cap; each bounds its own layer.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use gavel_core::{AuditError, AuditRequest, Review};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Completions tracked for the rolling stats window.
const STATS_WINDOW: usize = 100;

/// Executes one audit job. The judge client is the production runner; tests
/// substitute their own.
#[async_trait]
pub trait AuditJobRunner: Send + Sync {
    async fn run(&self, request: &AuditRequest) -> Result<Review, AuditError>;
}

/// Job priority, mapped to a numeric weight; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl AuditPriority {
    pub fn weight(&self) -> u32 {
        match self {
            AuditPriority::High => 100,
            AuditPriority::Normal => 50,
            AuditPriority::Low => 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditQueueConfig {
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub job_timeout: Duration,
    pub max_retries: u32,
    pub tick_interval: Duration,
}

impl Default for AuditQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub average_wait_ms: f64,
    pub average_execution_ms: f64,
    /// `running / max_concurrent`.
    pub utilization: f64,
}

struct Job {
    id: u64,
    request: AuditRequest,
    weight: u32,
    created_at: Instant,
    retry_count: u32,
    responder: oneshot::Sender<Result<Review, AuditError>>,
}

struct QueueInner {
    pending: Vec<Job>,
    running: HashMap<u64, tokio::task::JoinHandle<()>>,
    paused: bool,
    destroyed: bool,
    next_id: u64,
    completed: u64,
    failed: u64,
    wait_times: VecDeque<Duration>,
    exec_times: VecDeque<Duration>,
}

impl QueueInner {
    /// Insert preserving descending weight, stable for equal weights: a new
    /// job goes behind every existing job of the same weight.
    fn insert_by_priority(&mut self, job: Job) {
        let position = self
            .pending
            .iter()
            .position(|existing| existing.weight < job.weight)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, job);
    }

    fn record_completion(&mut self, wait: Duration, exec: Duration) {
        self.completed += 1;
        push_bounded(&mut self.wait_times, wait);
        push_bounded(&mut self.exec_times, exec);
    }
}

fn push_bounded(window: &mut VecDeque<Duration>, value: Duration) {
    window.push_back(value);
    while window.len() > STATS_WINDOW {
        window.pop_front();
    }
}

fn average_ms(window: &VecDeque<Duration>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(|d| d.as_millis() as f64).sum::<f64>() / window.len() as f64
}

/// The audit admission queue. Dropping the handle does not stop in-flight
/// jobs; call [`AuditQueue::destroy`] for that.
pub struct AuditQueue {
    inner: Arc<Mutex<QueueInner>>,
    runner: Arc<dyn AuditJobRunner>,
    config: AuditQueueConfig,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AuditQueue {
    /// Build the queue and start its scheduler tick.
    pub fn new(config: AuditQueueConfig, runner: Arc<dyn AuditJobRunner>) -> Arc<Self> {
        let queue = Arc::new(Self {
            inner: Arc::new(Mutex::new(QueueInner {
                pending: Vec::new(),
                running: HashMap::new(),
                paused: false,
                destroyed: false,
                next_id: 0,
                completed: 0,
                failed: 0,
                wait_times: VecDeque::new(),
                exec_times: VecDeque::new(),
            })),
            runner,
            config,
            tick_handle: Mutex::new(None),
        });

        let tick = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(queue.config.tick_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    queue.schedule();
                }
            })
        };
        *queue.tick_handle.lock().expect("tick lock") = Some(tick);
        queue
    }

    /// Submit a job and wait for its review.
    pub async fn submit(
        &self,
        request: AuditRequest,
        priority: AuditPriority,
    ) -> Result<Review, AuditError> {
        let rx = self.enqueue(request, priority)?;
        match rx.await {
            Ok(outcome) => outcome,
            // The responder was dropped without an answer: destroyed queue.
            Err(_) => Err(AuditError::QueueDestroyed),
        }
    }

    /// Admit a job without waiting. Fails when the pending list is full or
    /// the queue has been destroyed.
    pub fn enqueue(
        &self,
        request: AuditRequest,
        priority: AuditPriority,
    ) -> Result<oneshot::Receiver<Result<Review, AuditError>>, AuditError> {
        let mut inner = self.inner.lock().expect("queue lock");
        if inner.destroyed {
            return Err(AuditError::QueueDestroyed);
        }
        if inner.pending.len() >= self.config.max_queue_size {
            return Err(AuditError::QueueFull {
                capacity: self.config.max_queue_size,
            });
        }
        let (tx, rx) = oneshot::channel();
        inner.next_id += 1;
        let job = Job {
            id: inner.next_id,
            request,
            weight: priority.weight(),
            created_at: Instant::now(),
            retry_count: 0,
            responder: tx,
        };
        debug!(job = job.id, weight = job.weight, "enqueued audit job");
        inner.insert_by_priority(job);
        Ok(rx)
    }

    /// Move pending jobs into the running set up to the concurrency cap.
    fn schedule(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        if inner.paused || inner.destroyed {
            return;
        }
        while inner.running.len() < self.config.max_concurrent && !inner.pending.is_empty() {
            let job = inner.pending.remove(0);
            let id = job.id;
            let handle = self.spawn_job(job);
            inner.running.insert(id, handle);
        }
    }

    fn spawn_job(&self, mut job: Job) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let runner = Arc::clone(&self.runner);
        let job_timeout = self.config.job_timeout;
        let max_retries = self.config.max_retries;

        tokio::spawn(async move {
            let wait = job.created_at.elapsed();
            let exec_start = Instant::now();
            let outcome = match tokio::time::timeout(job_timeout, runner.run(&job.request)).await {
                Ok(result) => result,
                Err(_) => Err(AuditError::Timeout {
                    elapsed_ms: exec_start.elapsed().as_millis() as u64,
                    limit_ms: job_timeout.as_millis() as u64,
                }),
            };
            let exec = exec_start.elapsed();

            let mut guard = inner.lock().expect("queue lock");
            guard.running.remove(&job.id);
            match outcome {
                Ok(review) => {
                    guard.record_completion(wait, exec);
                    let _ = job.responder.send(Ok(review));
                }
                Err(error) if job.retry_count < max_retries && !guard.destroyed => {
                    job.retry_count += 1;
                    warn!(
                        job = job.id,
                        retry = job.retry_count,
                        error = %error,
                        "audit job failed, re-queueing"
                    );
                    guard.insert_by_priority(job);
                }
                Err(error) => {
                    guard.failed += 1;
                    let _ = job.responder.send(Err(error));
                }
            }
        })
    }

    /// Stop scheduling new jobs; running jobs finish.
    pub fn pause(&self) {
        self.inner.lock().expect("queue lock").paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().expect("queue lock").paused = false;
    }

    /// Reject every pending job. Running jobs are unaffected.
    pub fn clear_queue(&self) {
        let drained: Vec<Job> = {
            let mut inner = self.inner.lock().expect("queue lock");
            inner.pending.drain(..).collect()
        };
        for job in drained {
            let _ = job.responder.send(Err(AuditError::QueueCleared));
        }
    }

    /// Reject pending jobs, abort running ones, and stop the scheduler.
    /// Aborted jobs resolve their callers with a destroyed-queue error.
    pub fn destroy(&self) {
        let (drained, running): (Vec<Job>, Vec<tokio::task::JoinHandle<()>>) = {
            let mut inner = self.inner.lock().expect("queue lock");
            inner.destroyed = true;
            let drained = inner.pending.drain(..).collect();
            let running = inner.running.drain().map(|(_, handle)| handle).collect();
            (drained, running)
        };
        for job in drained {
            let _ = job.responder.send(Err(AuditError::QueueDestroyed));
        }
        for handle in running {
            handle.abort();
        }
        if let Some(tick) = self.tick_handle.lock().expect("tick lock").take() {
            tick.abort();
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock");
        QueueStats {
            pending: inner.pending.len(),
            running: inner.running.len(),
            completed: inner.completed,
            failed: inner.failed,
            average_wait_ms: average_ms(&inner.wait_times),
            average_execution_ms: average_ms(&inner.exec_times),
            utilization: inner.running.len() as f64 / self.config.max_concurrent as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::types::{DimensionScore, JudgeCard, ReviewBody, Verdict};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn review(overall: u32) -> Review {
        Review {
            overall,
            dimensions: vec![DimensionScore {
                name: "accuracy".into(),
                score: overall,
            }],
            verdict: Verdict::Pass,
            review: ReviewBody {
                summary: "done".into(),
                inline: vec![],
                citations: vec![],
            },
            proposed_diff: None,
            iterations: 1,
            judge_cards: vec![JudgeCard {
                model: "codex-cli".into(),
                score: overall,
                notes: None,
            }],
        }
    }

    fn request(tag: &str) -> AuditRequest {
        AuditRequest::new("task", format!("code {tag}"))
    }

    /// Runner that records call order and tracks peak concurrency.
    struct RecordingRunner {
        order: Mutex<Vec<String>>,
        active: AtomicU32,
        peak: AtomicU32,
        delay: Duration,
        failures_before_success: AtomicU32,
    }

    impl RecordingRunner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                active: AtomicU32::new(0),
                peak: AtomicU32::new(0),
                delay,
                failures_before_success: AtomicU32::new(0),
            })
        }

        fn failing(delay: Duration, failures: u32) -> Arc<Self> {
            let runner = Self::new(delay);
            runner.failures_before_success.store(failures, Ordering::SeqCst);
            runner
        }
    }

    #[async_trait]
    impl AuditJobRunner for RecordingRunner {
        async fn run(&self, request: &AuditRequest) -> Result<Review, AuditError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.order.lock().unwrap().push(request.candidate.clone());
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let remaining = self
                .failures_before_success
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .unwrap_or(0);
            if remaining > 0 {
                return Err(AuditError::NonZeroExit {
                    exit_code: 1,
                    stderr: "transient".into(),
                });
            }
            Ok(review(80))
        }
    }

    fn fast_config() -> AuditQueueConfig {
        AuditQueueConfig {
            tick_interval: Duration::from_millis(10),
            ..AuditQueueConfig::default()
        }
    }

    #[tokio::test]
    async fn test_submit_runs_job_and_returns_review() {
        let runner = RecordingRunner::new(Duration::from_millis(5));
        let queue = AuditQueue::new(fast_config(), runner.clone());
        let result = queue.submit(request("a"), AuditPriority::Normal).await;
        assert_eq!(result.unwrap().overall, 80);
        assert_eq!(queue.stats().completed, 1);
        queue.destroy();
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_tie_break() {
        let runner = RecordingRunner::new(Duration::from_millis(5));
        let queue = AuditQueue::new(
            AuditQueueConfig {
                max_concurrent: 1,
                tick_interval: Duration::from_millis(10),
                ..AuditQueueConfig::default()
            },
            runner.clone(),
        );
        queue.pause();

        let low = queue.enqueue(request("low"), AuditPriority::Low).unwrap();
        let normal_1 = queue.enqueue(request("normal-1"), AuditPriority::Normal).unwrap();
        let high = queue.enqueue(request("high"), AuditPriority::High).unwrap();
        let normal_2 = queue.enqueue(request("normal-2"), AuditPriority::Normal).unwrap();

        queue.resume();
        for rx in [low, normal_1, high, normal_2] {
            rx.await.unwrap().unwrap();
        }

        let order = runner.order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["code high", "code normal-1", "code normal-2", "code low"]
        );
        queue.destroy();
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let runner = RecordingRunner::new(Duration::from_millis(50));
        let queue = AuditQueue::new(fast_config(), runner.clone());

        let mut receivers = Vec::new();
        for i in 0..10 {
            receivers.push(queue.enqueue(request(&i.to_string()), AuditPriority::Normal).unwrap());
        }
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().completed, 10);
        queue.destroy();
    }

    #[tokio::test]
    async fn test_queue_full_rejects_admission() {
        let runner = RecordingRunner::new(Duration::from_secs(10));
        let queue = AuditQueue::new(
            AuditQueueConfig {
                max_queue_size: 2,
                tick_interval: Duration::from_millis(10),
                ..AuditQueueConfig::default()
            },
            runner,
        );
        queue.pause();

        queue.enqueue(request("a"), AuditPriority::Normal).unwrap();
        queue.enqueue(request("b"), AuditPriority::Normal).unwrap();
        let err = queue.enqueue(request("c"), AuditPriority::Normal).unwrap_err();
        assert!(matches!(err, AuditError::QueueFull { capacity: 2 }));
        queue.destroy();
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let runner = RecordingRunner::failing(Duration::from_millis(5), 2);
        let queue = AuditQueue::new(fast_config(), runner.clone());

        let result = queue.submit(request("flaky"), AuditPriority::Normal).await;
        assert_eq!(result.unwrap().overall, 80);
        assert_eq!(runner.order.lock().unwrap().len(), 3);
        assert_eq!(queue.stats().failed, 0);
        queue.destroy();
    }

    #[tokio::test]
    async fn test_retries_exhausted_rejects_with_last_error() {
        let runner = RecordingRunner::failing(Duration::from_millis(5), 99);
        let queue = AuditQueue::new(fast_config(), runner.clone());

        let err = queue
            .submit(request("doomed"), AuditPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::NonZeroExit { .. }));
        // First attempt plus max_retries.
        assert_eq!(runner.order.lock().unwrap().len(), 3);
        assert_eq!(queue.stats().failed, 1);
        queue.destroy();
    }

    #[tokio::test]
    async fn test_job_timeout_is_enforced() {
        let runner = RecordingRunner::new(Duration::from_secs(30));
        let queue = AuditQueue::new(
            AuditQueueConfig {
                job_timeout: Duration::from_millis(50),
                max_retries: 0,
                tick_interval: Duration::from_millis(10),
                ..AuditQueueConfig::default()
            },
            runner,
        );

        let err = queue
            .submit(request("slow"), AuditPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Timeout { .. }));
        queue.destroy();
    }

    #[tokio::test]
    async fn test_clear_queue_rejects_pending() {
        let runner = RecordingRunner::new(Duration::from_millis(5));
        let queue = AuditQueue::new(fast_config(), runner);
        queue.pause();

        let rx = queue.enqueue(request("parked"), AuditPriority::Normal).unwrap();
        queue.clear_queue();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, AuditError::QueueCleared));
        queue.destroy();
    }

    #[tokio::test]
    async fn test_destroy_rejects_everything() {
        let runner = RecordingRunner::new(Duration::from_secs(30));
        let queue = AuditQueue::new(fast_config(), runner);

        let running_rx = queue.enqueue(request("running"), AuditPriority::Normal).unwrap();
        // Give the scheduler a tick to start it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.pause();
        let pending_rx = queue.enqueue(request("pending"), AuditPriority::Normal).unwrap();

        queue.destroy();

        let err = pending_rx.await.unwrap().unwrap_err();
        assert!(matches!(err, AuditError::QueueDestroyed));
        // The running job was aborted; its responder was dropped.
        assert!(running_rx.await.is_err());

        let err = queue.enqueue(request("late"), AuditPriority::Normal).unwrap_err();
        assert!(matches!(err, AuditError::QueueDestroyed));
    }

    #[tokio::test]
    async fn test_stats_track_waits_and_utilization() {
        let runner = RecordingRunner::new(Duration::from_millis(20));
        let queue = AuditQueue::new(fast_config(), runner);

        queue.submit(request("one"), AuditPriority::Normal).await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.running, 0);
        assert!(stats.average_execution_ms >= 15.0);
        assert_eq!(stats.utilization, 0.0);
        queue.destroy();
    }
}
