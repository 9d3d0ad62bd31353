// ABOUTME: Runtime event channel decoupling lifecycle producers from subscribers
// ABOUTME: Broadcast semantics so metrics publishers and audit loggers consume independently

use crate::driver::ResourceUsage;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Why an environment was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop request from a user
    Requested,
    /// Stopped as the first half of a restart
    Restarting,
    /// Reclaimed by the idle sweep
    IdleTimeout,
}

/// Notifications emitted by the orchestrator and monitor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    EnvironmentStarted {
        project_id: String,
        environment_id: String,
        template: String,
    },
    EnvironmentStopped {
        project_id: String,
        environment_id: String,
        reason: StopReason,
    },
    EnvironmentErrored {
        project_id: String,
        environment_id: String,
        detail: String,
    },
    ExecCompleted {
        project_id: String,
        environment_id: String,
        exit_code: i64,
        duration_ms: u64,
    },
    MetricsSampled {
        environment_id: String,
        usage: ResourceUsage,
        unavailable: bool,
    },
}

/// Fan-out channel for [`RuntimeEvent`]s.
///
/// Cloning shares the underlying channel. Publishing never blocks and never
/// fails: with no subscribers the event is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RuntimeEvent) {
        debug!("Runtime event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
