//! The process manager: spawn, cap, time out, terminate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use gavel_core::AuditError;

use crate::events::{EventBus, ProcessEvent};
use crate::health::{HealthMetrics, HealthSnapshot, Outcome};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_BUF_SIZE: usize = 4096;

/// Tunables for one manager instance.
#[derive(Debug, Clone)]
pub struct ProcessManagerConfig {
    /// Cap on simultaneously live children.
    pub max_concurrent: usize,
    /// How long an execution may wait for a free slot.
    pub queue_timeout: Duration,
    /// Window between graceful and forceful termination.
    pub cleanup_timeout: Duration,
    /// Per-stream accumulation cap; excess output is discarded, not buffered.
    pub max_output_bytes: usize,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// One command to run under the manager's control.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// The child's complete environment; nothing is inherited.
    pub environment: HashMap<String, String>,
    pub timeout: Duration,
    /// Written to stdin then closed; stdin is closed immediately when absent.
    pub input: Option<String>,
}

impl CommandSpec {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
            timeout,
            input: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// What one execution produced.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time: Duration,
    pub timed_out: bool,
    pub process_id: Option<u32>,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Spawns and supervises judge children. Cloneable handle; all clones share
/// the same slots, registry, and metrics.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ProcessManagerConfig,
    slots: Semaphore,
    shutting_down: AtomicBool,
    waiting: AtomicUsize,
    next_token: AtomicU64,
    live: Mutex<HashMap<u64, u32>>,
    events: EventBus,
    health: std::sync::Mutex<HealthMetrics>,
}

impl ProcessManager {
    pub fn new(config: ProcessManagerConfig) -> Self {
        let slots = Semaphore::new(config.max_concurrent.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                slots,
                shutting_down: AtomicBool::new(false),
                waiting: AtomicUsize::new(0),
                next_token: AtomicU64::new(0),
                live: Mutex::new(HashMap::new()),
                events: EventBus::default(),
                health: std::sync::Mutex::new(HealthMetrics::default()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProcessManagerConfig::default())
    }

    /// Subscribe to lifecycle events. Delivery is best-effort.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    /// Number of children currently alive.
    pub async fn active_processes(&self) -> usize {
        self.inner.live.lock().await.len()
    }

    /// Executions parked waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> HealthSnapshot {
        let active = self.inner.live.try_lock().map(|m| m.len()).unwrap_or(0);
        self.inner.health.lock().expect("health lock").snapshot(active)
    }

    /// Emit a health-check event now, plus a warning when unhealthy.
    pub fn run_health_check(&self) {
        let snapshot = self.health();
        let healthy = snapshot.healthy;
        self.inner.events.emit(ProcessEvent::HealthCheck(snapshot));
        if !healthy {
            self.inner.events.emit(ProcessEvent::HealthWarning {
                reason: "success rate below threshold or activity stale".into(),
            });
        }
    }

    /// Periodic health emission until the manager shuts down.
    pub fn start_health_monitor(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if manager.inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                manager.run_health_check();
            }
        })
    }

    /// Run one command to completion under the concurrency cap.
    ///
    /// Timeouts never error: the synthesized result carries
    /// `timed_out = true`, `exit_code = -1`. Spawn and stdin failures, queue
    /// exhaustion, and shutdown are the error paths.
    pub async fn execute(&self, spec: CommandSpec) -> Result<ProcessResult, AuditError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(AuditError::ShuttingDown);
        }

        let _permit = self.acquire_slot().await?;

        // A shutdown may have started while this call was parked.
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(AuditError::ShuttingDown);
        }

        self.run_child(spec).await
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, AuditError> {
        match self.inner.slots.try_acquire() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::Closed) => Err(AuditError::ShuttingDown),
            Err(TryAcquireError::NoPermits) => {
                let waiting = self.inner.waiting.fetch_add(1, Ordering::SeqCst) + 1;
                self.inner.events.emit(ProcessEvent::Queued { waiting });
                let started = Instant::now();
                let acquired =
                    tokio::time::timeout(self.inner.config.queue_timeout, self.inner.slots.acquire())
                        .await;
                self.inner.waiting.fetch_sub(1, Ordering::SeqCst);
                match acquired {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_closed)) => Err(AuditError::ShuttingDown),
                    Err(_) => Err(AuditError::QueueTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    }),
                }
            }
        }
    }

    async fn run_child(&self, spec: CommandSpec) -> Result<ProcessResult, AuditError> {
        let started = Instant::now();
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args);
        cmd.env_clear();
        cmd.envs(&spec.environment);
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        if spec.input.is_some() {
            cmd.stdin(std::process::Stdio::piped());
        } else {
            cmd.stdin(std::process::Stdio::null());
        }
        cmd.kill_on_drop(true);

        // Isolate the child in its own process group so termination signals
        // reach its descendants too.
        // SAFETY: setsid() is async-signal-safe and runs before exec.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {e}", spec.executable.display());
                self.inner
                    .health
                    .lock()
                    .expect("health lock")
                    .record_spawn_failure();
                self.inner
                    .events
                    .emit(ProcessEvent::Failed { reason: reason.clone() });
                return Err(AuditError::Spawn(reason));
            }
        };

        let pid = child.id();
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        if let Some(pid) = pid {
            self.inner.live.lock().await.insert(token, pid);
            self.inner.events.emit(ProcessEvent::Started {
                pid,
                executable: spec.executable.display().to_string(),
            });
        }
        self.inner.health.lock().expect("health lock").record_started();

        let result = self.supervise(&mut child, &spec, pid, started).await;

        self.inner.live.lock().await.remove(&token);

        match &result {
            Ok(res) => {
                let outcome = if res.timed_out {
                    Outcome::TimedOut
                } else if res.exit_code == 0 {
                    Outcome::Succeeded
                } else {
                    Outcome::Failed
                };
                self.inner
                    .health
                    .lock()
                    .expect("health lock")
                    .record_completion(res.execution_time, outcome);
                // The timeout path already announced itself.
                if !res.timed_out {
                    self.inner.events.emit(ProcessEvent::Completed {
                        pid: res.process_id.unwrap_or(0),
                        exit_code: res.exit_code,
                        duration_ms: res.execution_time.as_millis() as u64,
                    });
                }
            }
            Err(e) => {
                self.inner
                    .health
                    .lock()
                    .expect("health lock")
                    .record_completion(started.elapsed(), Outcome::Failed);
                self.inner.events.emit(ProcessEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    async fn supervise(
        &self,
        child: &mut tokio::process::Child,
        spec: &CommandSpec,
        pid: Option<u32>,
        started: Instant,
    ) -> Result<ProcessResult, AuditError> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.inner.config.max_output_bytes;
        let out_task = tokio::spawn(drain_stream(stdout, cap));
        let err_task = tokio::spawn(drain_stream(stderr, cap));

        if let Some(input) = &spec.input {
            if let Some(mut stdin) = child.stdin.take() {
                let write = tokio::time::timeout(STDIN_WRITE_TIMEOUT, async {
                    stdin.write_all(input.as_bytes()).await?;
                    stdin.shutdown().await?;
                    Ok::<_, std::io::Error>(())
                })
                .await;
                match write {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        kill_process_group(pid, libc::SIGKILL);
                        let _ = child.wait().await;
                        return Err(AuditError::StdinWrite(e.to_string()));
                    }
                    Err(_) => {
                        kill_process_group(pid, libc::SIGKILL);
                        let _ = child.wait().await;
                        return Err(AuditError::StdinWrite(format!(
                            "stdin write timed out after {}s",
                            STDIN_WRITE_TIMEOUT.as_secs()
                        )));
                    }
                }
            }
        }

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(spec.timeout) => None,
        };

        let (status, timed_out) = match waited {
            Some(status) => (status, false),
            None => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(
                    pid,
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "child exceeded timeout, sending SIGTERM"
                );
                if let Some(pid) = pid {
                    self.inner
                        .events
                        .emit(ProcessEvent::Timeout { pid, elapsed_ms });
                }
                kill_process_group(pid, libc::SIGTERM);
                let status = match tokio::time::timeout(
                    self.inner.config.cleanup_timeout,
                    child.wait(),
                )
                .await
                {
                    Ok(status) => status,
                    Err(_) => {
                        if let Some(pid) = pid {
                            self.inner.events.emit(ProcessEvent::ForceKill { pid });
                        }
                        kill_process_group(pid, libc::SIGKILL);
                        child.wait().await
                    }
                };
                (status, true)
            }
        };

        let status = status.map_err(|e| AuditError::Spawn(format!("wait failed: {e}")))?;
        let stdout = out_task.await.unwrap_or_default();
        let stderr_text = err_task.await.unwrap_or_default();
        let execution_time = started.elapsed();

        if timed_out {
            debug!(pid, "synthesizing timeout result");
            return Ok(ProcessResult {
                stdout,
                stderr: "Process timed out".to_string(),
                exit_code: -1,
                execution_time,
                timed_out: true,
                process_id: pid,
            });
        }

        Ok(ProcessResult {
            stdout,
            stderr: stderr_text,
            exit_code: status.code().unwrap_or(-1),
            execution_time,
            timed_out: false,
            process_id: pid,
        })
    }

    /// Reject new work, reject parked waiters, and terminate every live
    /// child. Returns once all children are gone.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.terminate_all_processes().await;
        self.inner.events.emit(ProcessEvent::ShutdownComplete);
    }

    /// Accept work again after a completed shutdown.
    pub fn reenable(&self) {
        self.inner.shutting_down.store(false, Ordering::SeqCst);
    }

    /// SIGTERM every live child, escalate to SIGKILL after the cleanup
    /// window, and wait for the registry to drain.
    pub async fn terminate_all_processes(&self) {
        let pids: Vec<u32> = self.inner.live.lock().await.values().copied().collect();
        if pids.is_empty() {
            return;
        }
        debug!(count = pids.len(), "terminating all live children");
        for pid in &pids {
            kill_process_group(Some(*pid), libc::SIGTERM);
        }
        if !self.wait_drained(self.inner.config.cleanup_timeout).await {
            let survivors: Vec<u32> = self.inner.live.lock().await.values().copied().collect();
            for pid in survivors {
                self.inner.events.emit(ProcessEvent::ForceKill { pid });
                kill_process_group(Some(pid), libc::SIGKILL);
            }
            self.wait_drained(self.inner.config.cleanup_timeout).await;
        }
    }

    async fn wait_drained(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.inner.live.lock().await.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Read a child stream to completion, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn drain_stream<R>(stream: Option<R>, cap: usize) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut collected: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if collected.len() < cap {
                    let take = n.min(cap - collected.len());
                    collected.extend_from_slice(&buf[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

fn kill_process_group(pid: Option<u32>, signal: libc::c_int) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: kill() is async-signal-safe; the negative PID targets the
        // process group created by setsid in pre_exec.
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, signal);
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
