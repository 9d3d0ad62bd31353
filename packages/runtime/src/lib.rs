// ABOUTME: Runtime orchestration core: pooling, lifecycle, monitoring, events
// ABOUTME: Drives abstract runtime drivers; Docker wiring included for production

pub mod auth;
pub mod driver;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod pool;

pub use auth::{AccessPolicy, ProjectDirectory, SessionAccessPolicy};
pub use driver::{
    DockerDriver, DriverError, EnvironmentHandle, ExecOutput, ExecRequest, LogChunk, LogSource,
    LogStream, ResourceUsage, RuntimeDriver, Template,
};
pub use events::{EventBus, RuntimeEvent, StopReason};
pub use monitor::{MetricsRegistry, MonitorConfig, ResourceMonitor, SampledUsage};
pub use orchestrator::{
    CommandExecution, EnvironmentRecord, ExecOptions, OrchestratorConfig, ProjectOrchestrator,
    RuntimeError, RuntimeState, SweepStats,
};
pub use pool::{EnvironmentPool, PoolConfig, PoolError, PoolStatus, PooledEnvironment};
