//! Observational process-lifecycle events.
//!
//! Emissions are decoupled from business logic: the bus drops events when
//! nobody is listening, and no code path depends on delivery.

use tokio::sync::broadcast;

use crate::health::HealthSnapshot;

/// Everything the manager announces about its children.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { pid: u32, executable: String },
    Queued { waiting: usize },
    Timeout { pid: u32, elapsed_ms: u64 },
    ForceKill { pid: u32 },
    Completed { pid: u32, exit_code: i32, duration_ms: u64 },
    Failed { reason: String },
    HealthCheck(HealthSnapshot),
    HealthWarning { reason: String },
    ShutdownComplete,
}

impl ProcessEvent {
    /// Stable string name for log routing and test assertions.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessEvent::Started { .. } => "process-started",
            ProcessEvent::Queued { .. } => "process-queued",
            ProcessEvent::Timeout { .. } => "process-timeout",
            ProcessEvent::ForceKill { .. } => "process-force-kill",
            ProcessEvent::Completed { .. } => "process-completed",
            ProcessEvent::Failed { .. } => "process-failed",
            ProcessEvent::HealthCheck(_) => "health-check",
            ProcessEvent::HealthWarning { .. } => "health-warning",
            ProcessEvent::ShutdownComplete => "shutdown-complete",
        }
    }
}

/// Drop-tolerant broadcast bus for [`ProcessEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProcessEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe for subsequent events. Slow consumers lose old events
    /// rather than backpressuring the manager.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProcessEvent) {
        tracing::debug!(event = event.name(), "process event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
