// ABOUTME: Runtime driver contract for environment backends
// ABOUTME: Defines the abstract interface the orchestrator and pool drive sandboxes through

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerDriver;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

type Result<T> = std::result::Result<T, DriverError>;

/// Named configuration an environment is provisioned from: base image plus
/// resource limits and baseline process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub image: String,
    pub cpu_cores: f32,
    pub memory_mb: u64,
    pub env_vars: HashMap<String, String>,
    pub working_dir: String,
}

impl Template {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cpu_cores: 1.0,
            memory_mb: 1024,
            env_vars: HashMap::new(),
            working_dir: "/workspace".to_string(),
        }
    }
}

/// Opaque reference to a provisioned environment, valid until `destroy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub id: String,
}

impl EnvironmentHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Command to run inside an environment. Timeout enforcement lives with the
/// caller; the driver just runs the command to completion.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env_vars: HashMap<String, String>,
}

/// Raw result of a completed command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Resource usage sampled from a running environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_usage_mb: u64,
    pub memory_limit_mb: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Which stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

/// One line of live log output
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: LogSource,
    pub line: String,
}

/// Live log feed: lazy, finite (ends when the environment goes away or the
/// driver task stops), and not restartable once consumed.
pub struct LogStream {
    pub receiver: tokio::sync::mpsc::UnboundedReceiver<LogChunk>,
}

/// Abstract capability that actually creates, destroys, and execs inside
/// environments. The orchestration layer never talks to a backend directly;
/// production wires [`DockerDriver`], tests substitute a fake.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Check the backend is reachable and usable.
    async fn ping(&self) -> Result<bool>;

    /// Create and start a fresh environment from a template. `name` is a
    /// human-traceable identifier, `labels` are attached for later
    /// reconciliation.
    async fn provision(
        &self,
        template: &Template,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<EnvironmentHandle>;

    /// Return an environment to a clean baseline so it can be handed to a
    /// different project.
    async fn reset(&self, handle: &EnvironmentHandle) -> Result<()>;

    /// Stop and remove an environment. The handle is invalid afterwards.
    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<()>;

    /// Run a command to completion inside a running environment.
    async fn exec(&self, handle: &EnvironmentHandle, request: ExecRequest) -> Result<ExecOutput>;

    /// The most recent `tail` log lines.
    async fn logs(&self, handle: &EnvironmentHandle, tail: usize) -> Result<Vec<String>>;

    /// Follow log output as it is produced.
    async fn stream_logs(&self, handle: &EnvironmentHandle) -> Result<LogStream>;

    /// Sample current resource usage.
    async fn stats(&self, handle: &EnvironmentHandle) -> Result<ResourceUsage>;

    /// List handles of environments carrying the given label, whether or not
    /// this process created them. Used by orphan reconciliation.
    async fn list_labeled(&self, label: &str) -> Result<Vec<EnvironmentHandle>>;
}
