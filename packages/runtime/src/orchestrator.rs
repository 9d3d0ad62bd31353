// ABOUTME: Per-project runtime lifecycle orchestration and command execution
// ABOUTME: State machine over pooled environments with authorization, sweeps, and persistence

use crate::auth::AccessPolicy;
use crate::driver::{
    DriverError, EnvironmentHandle, ExecRequest, LogStream, RuntimeDriver, Template,
};
use crate::events::{EventBus, RuntimeEvent, StopReason};
use crate::monitor::{MetricsRegistry, SampledUsage};
use crate::pool::{EnvironmentPool, PoolError, PooledEnvironment};
use chrono::{DateTime, Utc};
use codedock_collab::Action;
use codedock_storage::{RecordStore, StorageError, ENVIRONMENTS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Project {0} already has an active environment")]
    AlreadyRunning(String),

    #[error("Project {0} has no running environment")]
    NotRunning(String),

    #[error("Provisioning for template '{template}' timed out after {waited_ms}ms")]
    ProvisionTimeout { template: String, waited_ms: u64 },

    #[error("Command timed out after {timeout_ms}ms")]
    ExecTimeout { timeout_ms: u64 },

    #[error("Concurrent command limit ({limit}) reached for project {project_id}")]
    ExecLimitExceeded { project_id: String, limit: u32 },

    #[error("User {user_id} may not perform {action:?} on project {project_id}")]
    PermissionDenied {
        project_id: String,
        user_id: String,
        action: Action,
    },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<PoolError> for RuntimeError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::ProvisionTimeout {
                template,
                waited_ms,
            } => RuntimeError::ProvisionTimeout {
                template,
                waited_ms,
            },
            PoolError::Driver(e) => RuntimeError::Driver(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Lifecycle state of a project's environment. A project with no entry at
/// all has never been started (or has been removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Provisioning,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Provisioning => "provisioning",
            RuntimeState::Running => "running",
            RuntimeState::Paused => "paused",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Error => "error",
        }
    }

    /// Non-terminal states holding (or about to hold) a live environment
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RuntimeState::Provisioning | RuntimeState::Running | RuntimeState::Paused
        )
    }
}

/// Persisted environment record, upserted on every state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub template: String,
    pub state: RuntimeState,
    pub handle: Option<EnvironmentHandle>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Options for a single command execution
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub working_dir: Option<String>,
    pub env_vars: HashMap<String, String>,
    /// Falls back to the orchestrator's default when unset
    pub timeout: Option<Duration>,
}

/// Terminal outcome of one command: it either completed with an exit code or
/// the call failed with a timeout or driver error, never both.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default bound on a single exec call
    pub exec_timeout: Duration,
    /// Running projects idle longer than this are reclaimed by the sweep
    pub idle_timeout: Duration,
    /// Provisioning/stopping entries older than this are force-resolved
    pub transition_timeout: Duration,
    /// How often the reclamation sweep runs
    pub sweep_interval: Duration,
    /// Per-project cap on simultaneous execs; 0 means unlimited
    pub max_concurrent_execs: u32,
    /// Lines of recent output retained for post-stop log queries
    pub log_buffer_lines: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30 * 60),
            transition_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            max_concurrent_execs: 0,
            log_buffer_lines: 1000,
        }
    }
}

/// Outcome of one reclamation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub idle_reclaimed: usize,
    pub transitions_recovered: usize,
}

struct ProjectRuntime {
    record: EnvironmentRecord,
    template: Template,
    env: Option<PooledEnvironment>,
    active_execs: u32,
    recent_logs: VecDeque<String>,
}

#[derive(Default)]
struct ProjectSlot {
    current: Option<ProjectRuntime>,
}

type ProjectMap = Arc<RwLock<HashMap<String, Arc<Mutex<ProjectSlot>>>>>;

/// Owns the lifecycle state machine for every project's environment.
///
/// Each project gets its own slot mutex, so lifecycle traffic is serialized
/// per project and fully parallel across projects. The mutex is held only
/// for in-memory transitions; driver and pool I/O happens outside it, with
/// transitional states (`provisioning`, `stopping`) acting as the
/// single-writer guard in the meantime.
pub struct ProjectOrchestrator {
    pool: Arc<EnvironmentPool>,
    driver: Arc<dyn RuntimeDriver>,
    store: Arc<dyn RecordStore>,
    policy: Arc<dyn AccessPolicy>,
    metrics: MetricsRegistry,
    events: EventBus,
    projects: ProjectMap,
    config: OrchestratorConfig,
    sweeping: Arc<RwLock<bool>>,
}

impl ProjectOrchestrator {
    pub fn new(
        pool: Arc<EnvironmentPool>,
        driver: Arc<dyn RuntimeDriver>,
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        metrics: MetricsRegistry,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            driver,
            store,
            policy,
            metrics,
            events,
            projects: Arc::new(RwLock::new(HashMap::new())),
            config,
            sweeping: Arc::new(RwLock::new(false)),
        }
    }

    async fn authorize(&self, project_id: &str, user_id: &str, action: Action) -> Result<()> {
        if self.policy.allows(project_id, user_id, action).await {
            Ok(())
        } else {
            Err(RuntimeError::PermissionDenied {
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
                action,
            })
        }
    }

    async fn slot(&self, project_id: &str) -> Arc<Mutex<ProjectSlot>> {
        {
            let projects = self.projects.read().await;
            if let Some(slot) = projects.get(project_id) {
                return slot.clone();
            }
        }
        let mut projects = self.projects.write().await;
        projects
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing_slot(&self, project_id: &str) -> Option<Arc<Mutex<ProjectSlot>>> {
        self.projects.read().await.get(project_id).cloned()
    }

    async fn persist(&self, record: &EnvironmentRecord) -> Result<()> {
        let value = serde_json::to_value(record).map_err(StorageError::Json)?;
        self.store.upsert(ENVIRONMENTS, &record.id, value).await?;
        Ok(())
    }

    /// Start a project's environment. Fails with `AlreadyRunning` while an
    /// environment is active; retrying after an `error` or `stopped` outcome
    /// starts a fresh environment with a new id.
    pub async fn start(
        &self,
        project_id: &str,
        user_id: &str,
        template: Template,
    ) -> Result<EnvironmentRecord> {
        self.authorize(project_id, user_id, Action::Write).await?;
        self.start_internal(project_id, user_id, template).await
    }

    async fn start_internal(
        &self,
        project_id: &str,
        user_id: &str,
        template: Template,
    ) -> Result<EnvironmentRecord> {
        let slot = self.slot(project_id).await;

        let record = {
            let mut guard = slot.lock().await;
            if let Some(runtime) = &guard.current {
                let state = runtime.record.state;
                if state.is_active() || state == RuntimeState::Stopping {
                    return Err(RuntimeError::AlreadyRunning(project_id.to_string()));
                }
            }

            let now = Utc::now();
            let record = EnvironmentRecord {
                id: format!("env_{}", Uuid::new_v4().simple()),
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
                template: template.name.clone(),
                state: RuntimeState::Provisioning,
                handle: None,
                created_at: now,
                started_at: None,
                last_activity_at: now,
                state_changed_at: now,
                error_message: None,
            };
            guard.current = Some(ProjectRuntime {
                record: record.clone(),
                template: template.clone(),
                env: None,
                active_execs: 0,
                recent_logs: VecDeque::new(),
            });
            record
        };
        self.persist(&record).await?;
        info!(
            "Starting project {} with template {} (environment {})",
            project_id, template.name, record.id
        );

        match self.pool.acquire(&template).await {
            Ok(env) => {
                let record = {
                    let mut guard = slot.lock().await;
                    let Some(runtime) = guard.current.as_mut() else {
                        // Entry vanished mid-start; do not leak the instance
                        drop(guard);
                        let _ = self.pool.release(env).await;
                        return Err(RuntimeError::NotRunning(project_id.to_string()));
                    };
                    let now = Utc::now();
                    runtime.record.state = RuntimeState::Running;
                    runtime.record.handle = Some(env.handle.clone());
                    runtime.record.started_at = Some(now);
                    runtime.record.last_activity_at = now;
                    runtime.record.state_changed_at = now;
                    runtime.env = Some(env);
                    runtime.record.clone()
                };
                self.persist(&record).await?;
                self.events.publish(RuntimeEvent::EnvironmentStarted {
                    project_id: project_id.to_string(),
                    environment_id: record.id.clone(),
                    template: record.template.clone(),
                });
                Ok(record)
            }
            Err(e) => {
                let err: RuntimeError = e.into();
                let failed = {
                    let mut guard = slot.lock().await;
                    guard.current.as_mut().map(|runtime| {
                        runtime.record.state = RuntimeState::Error;
                        runtime.record.error_message = Some(err.to_string());
                        runtime.record.state_changed_at = Utc::now();
                        runtime.record.clone()
                    })
                };
                if let Some(record) = failed {
                    // Best effort: the provisioning failure is what the
                    // caller needs to see
                    if let Err(pe) = self.persist(&record).await {
                        warn!("Failed to persist error state for {}: {}", project_id, pe);
                    }
                    self.events.publish(RuntimeEvent::EnvironmentErrored {
                        project_id: project_id.to_string(),
                        environment_id: record.id,
                        detail: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Stop a project's environment and return it to the pool. Stopping an
    /// already-stopped (or never-started) project is a no-op.
    pub async fn stop(&self, project_id: &str, user_id: &str) -> Result<()> {
        self.authorize(project_id, user_id, Action::Write).await?;
        self.stop_internal(project_id, StopReason::Requested).await
    }

    async fn stop_internal(&self, project_id: &str, reason: StopReason) -> Result<()> {
        let Some(slot) = self.existing_slot(project_id).await else {
            return Ok(());
        };

        let (env, record) = {
            let mut guard = slot.lock().await;
            let Some(runtime) = guard.current.as_mut() else {
                return Ok(());
            };
            match runtime.record.state {
                RuntimeState::Stopped => return Ok(()),
                RuntimeState::Provisioning | RuntimeState::Stopping => {
                    // A transition is in flight; the caller retries once it
                    // settles (or the sweep force-resolves it)
                    return Err(RuntimeError::NotRunning(project_id.to_string()));
                }
                RuntimeState::Running | RuntimeState::Paused | RuntimeState::Error => {}
            }
            let env = runtime.env.take();
            runtime.record.state = RuntimeState::Stopping;
            runtime.record.state_changed_at = Utc::now();
            (env, runtime.record.clone())
        };
        self.persist(&record).await?;

        // Snapshot final output so logs stay queryable after the instance is
        // reset or destroyed
        if let Some(env) = &env {
            match self.driver.logs(&env.handle, self.config.log_buffer_lines).await {
                Ok(lines) => {
                    let mut guard = slot.lock().await;
                    if let Some(runtime) = guard.current.as_mut() {
                        runtime.recent_logs = lines.into();
                    }
                }
                Err(e) => debug!("Could not capture final logs for {}: {}", project_id, e),
            }
        }

        let release_result = match env {
            Some(env) => self.pool.release(env).await,
            None => Ok(()),
        };

        match release_result {
            Ok(()) => {
                let record = {
                    let mut guard = slot.lock().await;
                    let Some(runtime) = guard.current.as_mut() else {
                        return Ok(());
                    };
                    runtime.record.state = RuntimeState::Stopped;
                    runtime.record.handle = None;
                    runtime.record.state_changed_at = Utc::now();
                    runtime.active_execs = 0;
                    runtime.record.clone()
                };
                self.metrics.remove(&record.id).await;
                self.persist(&record).await?;
                info!("Stopped project {} ({:?})", project_id, reason);
                self.events.publish(RuntimeEvent::EnvironmentStopped {
                    project_id: project_id.to_string(),
                    environment_id: record.id,
                    reason,
                });
                Ok(())
            }
            Err(e) => {
                let err: RuntimeError = e.into();
                let record = {
                    let mut guard = slot.lock().await;
                    guard.current.as_mut().map(|runtime| {
                        runtime.record.state = RuntimeState::Error;
                        runtime.record.error_message = Some(err.to_string());
                        runtime.record.state_changed_at = Utc::now();
                        runtime.record.clone()
                    })
                };
                if let Some(record) = record {
                    if let Err(pe) = self.persist(&record).await {
                        warn!("Failed to persist error state for {}: {}", project_id, pe);
                    }
                    self.events.publish(RuntimeEvent::EnvironmentErrored {
                        project_id: project_id.to_string(),
                        environment_id: record.id,
                        detail: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Stop (if needed) and start again on the same template. The new
    /// environment gets a fresh id.
    pub async fn restart(&self, project_id: &str, user_id: &str) -> Result<EnvironmentRecord> {
        self.authorize(project_id, user_id, Action::Write).await?;

        let slot = self
            .existing_slot(project_id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
        let (template, running) = {
            let guard = slot.lock().await;
            let runtime = guard
                .current
                .as_ref()
                .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
            (
                runtime.template.clone(),
                runtime.record.state == RuntimeState::Running,
            )
        };

        if running {
            self.stop_internal(project_id, StopReason::Restarting).await?;
        }
        self.start_internal(project_id, user_id, template).await
    }

    /// Run a command inside a project's running environment, bounded by a
    /// timeout. A timeout abandons only the in-flight command; the
    /// environment keeps running.
    pub async fn exec(
        &self,
        project_id: &str,
        user_id: &str,
        command: Vec<String>,
        options: ExecOptions,
    ) -> Result<CommandExecution> {
        self.authorize(project_id, user_id, Action::Terminal).await?;

        let slot = self
            .existing_slot(project_id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;

        let (handle, environment_id) = {
            let mut guard = slot.lock().await;
            let runtime = guard
                .current
                .as_mut()
                .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
            if runtime.record.state != RuntimeState::Running {
                return Err(RuntimeError::NotRunning(project_id.to_string()));
            }
            let handle = runtime
                .record
                .handle
                .clone()
                .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;

            let limit = self.config.max_concurrent_execs;
            if limit > 0 && runtime.active_execs >= limit {
                return Err(RuntimeError::ExecLimitExceeded {
                    project_id: project_id.to_string(),
                    limit,
                });
            }
            runtime.active_execs += 1;
            runtime.record.last_activity_at = Utc::now();
            (handle, runtime.record.id.clone())
        };

        let timeout = options.timeout.unwrap_or(self.config.exec_timeout);
        let request = ExecRequest {
            command,
            working_dir: options.working_dir,
            env_vars: options.env_vars,
        };
        let started = std::time::Instant::now();
        let outcome = time::timeout(timeout, self.driver.exec(&handle, request)).await;

        {
            let mut guard = slot.lock().await;
            if let Some(runtime) = guard.current.as_mut() {
                runtime.active_execs = runtime.active_execs.saturating_sub(1);
            }
        }

        match outcome {
            Err(_) => {
                debug!(
                    "Exec on project {} abandoned after {}ms",
                    project_id,
                    timeout.as_millis()
                );
                Err(RuntimeError::ExecTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(RuntimeError::Driver(e)),
            Ok(Ok(output)) => {
                let execution = CommandExecution {
                    exit_code: output.exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration: started.elapsed(),
                };
                self.events.publish(RuntimeEvent::ExecCompleted {
                    project_id: project_id.to_string(),
                    environment_id,
                    exit_code: execution.exit_code,
                    duration_ms: execution.duration.as_millis() as u64,
                });
                Ok(execution)
            }
        }
    }

    /// The most recent `tail` log lines. Served live from the driver while
    /// the environment runs, from the captured buffer afterwards.
    pub async fn get_logs(
        &self,
        project_id: &str,
        user_id: &str,
        tail: usize,
    ) -> Result<Vec<String>> {
        self.authorize(project_id, user_id, Action::Read).await?;

        let slot = self
            .existing_slot(project_id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;

        let (handle, buffered) = {
            let guard = slot.lock().await;
            let runtime = guard
                .current
                .as_ref()
                .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
            let handle = if runtime.record.state == RuntimeState::Running {
                runtime.record.handle.clone()
            } else {
                None
            };
            let buffered: Vec<String> = runtime.recent_logs.iter().cloned().collect();
            (handle, buffered)
        };

        match handle {
            Some(handle) => {
                let lines = self.driver.logs(&handle, tail).await?;
                let mut guard = slot.lock().await;
                if let Some(runtime) = guard.current.as_mut() {
                    runtime.recent_logs = lines.clone().into();
                    let cap = self.config.log_buffer_lines;
                    while runtime.recent_logs.len() > cap {
                        runtime.recent_logs.pop_front();
                    }
                }
                Ok(lines)
            }
            None => {
                let start = buffered.len().saturating_sub(tail);
                Ok(buffered[start..].to_vec())
            }
        }
    }

    /// Follow live output. The returned stream is lazy, finite, and cannot
    /// be restarted once consumed.
    pub async fn stream_logs(&self, project_id: &str, user_id: &str) -> Result<LogStream> {
        self.authorize(project_id, user_id, Action::Read).await?;

        let handle = self
            .running_handle(project_id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
        Ok(self.driver.stream_logs(&handle).await?)
    }

    /// Latest monitor reading for the project's environment. `None` when the
    /// monitor has not sampled it yet.
    pub async fn get_metrics(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<Option<SampledUsage>> {
        self.authorize(project_id, user_id, Action::Read).await?;

        let slot = self
            .existing_slot(project_id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
        let environment_id = {
            let guard = slot.lock().await;
            let runtime = guard
                .current
                .as_ref()
                .ok_or_else(|| RuntimeError::NotRunning(project_id.to_string()))?;
            if runtime.record.state != RuntimeState::Running {
                return Err(RuntimeError::NotRunning(project_id.to_string()));
            }
            runtime.record.id.clone()
        };
        Ok(self.metrics.latest(&environment_id).await)
    }

    /// Current lifecycle state; `None` means the project has no environment
    /// record at all.
    pub async fn state_of(&self, project_id: &str) -> Option<RuntimeState> {
        let slot = self.existing_slot(project_id).await?;
        let guard = slot.lock().await;
        guard.current.as_ref().map(|runtime| runtime.record.state)
    }

    /// Snapshot of the project's environment record.
    pub async fn get_record(&self, project_id: &str) -> Option<EnvironmentRecord> {
        let slot = self.existing_slot(project_id).await?;
        let guard = slot.lock().await;
        guard.current.as_ref().map(|runtime| runtime.record.clone())
    }

    async fn running_handle(&self, project_id: &str) -> Option<EnvironmentHandle> {
        let slot = self.existing_slot(project_id).await?;
        let guard = slot.lock().await;
        let runtime = guard.current.as_ref()?;
        if runtime.record.state == RuntimeState::Running {
            runtime.record.handle.clone()
        } else {
            None
        }
    }

    /// (environment id, handle) for every running environment; consumed by
    /// the resource monitor.
    pub async fn running_environments(&self) -> Vec<(String, EnvironmentHandle)> {
        let slots: Vec<Arc<Mutex<ProjectSlot>>> =
            { self.projects.read().await.values().cloned().collect() };

        let mut environments = Vec::new();
        for slot in slots {
            let guard = slot.lock().await;
            if let Some(runtime) = &guard.current {
                if runtime.record.state == RuntimeState::Running {
                    if let Some(handle) = &runtime.record.handle {
                        environments.push((runtime.record.id.clone(), handle.clone()));
                    }
                }
            }
        }
        environments
    }

    /// Tear down a project entirely: stop its environment, drop its record,
    /// and forget its state. Used when the owner deletes the project.
    pub async fn remove_project(&self, project_id: &str, user_id: &str) -> Result<()> {
        self.authorize(project_id, user_id, Action::Admin).await?;

        if self.state_of(project_id).await == Some(RuntimeState::Running) {
            self.stop_internal(project_id, StopReason::Requested).await?;
        }

        let removed = { self.projects.write().await.remove(project_id) };
        if let Some(slot) = removed {
            let guard = slot.lock().await;
            if let Some(runtime) = &guard.current {
                self.store.delete(ENVIRONMENTS, &runtime.record.id).await?;
                self.metrics.remove(&runtime.record.id).await;
            }
        }
        info!("Removed project {}", project_id);
        Ok(())
    }

    /// Destroy driver environments carrying our label that neither a project
    /// nor the pool knows about. Crash debris from interrupted transitions.
    /// Returns (orphans found, orphans removed, errors).
    pub async fn reclaim_orphans(
        &self,
        label: &str,
        dry_run: bool,
    ) -> Result<(usize, usize, Vec<String>)> {
        let labeled = self.driver.list_labeled(label).await?;

        let mut known: HashSet<String> = self
            .pool
            .idle_handles()
            .await
            .into_iter()
            .map(|h| h.id)
            .collect();
        let slots: Vec<Arc<Mutex<ProjectSlot>>> =
            { self.projects.read().await.values().cloned().collect() };
        for slot in slots {
            let guard = slot.lock().await;
            if let Some(handle) = guard.current.as_ref().and_then(|r| r.record.handle.as_ref()) {
                known.insert(handle.id.clone());
            }
        }

        let mut found = 0;
        let mut removed = 0;
        let mut errors = Vec::new();
        for handle in labeled {
            if known.contains(&handle.id) {
                continue;
            }
            found += 1;
            warn!("Found orphaned environment {}", handle.id);
            if dry_run {
                continue;
            }
            match self.driver.destroy(&handle).await {
                Ok(()) => removed += 1,
                Err(e) => errors.push(format!("Failed to remove {}: {}", handle.id, e)),
            }
        }

        info!(
            "Orphan reclamation: found {}, removed {} (dry run: {})",
            found, removed, dry_run
        );
        Ok((found, removed, errors))
    }

    /// Start the periodic idle-reclamation sweep.
    pub async fn start_sweeper(self: &Arc<Self>) {
        let mut sweeping = self.sweeping.write().await;
        if *sweeping {
            return;
        }
        *sweeping = true;
        drop(sweeping);

        let orchestrator = self.clone();
        tokio::spawn(async move {
            info!("Idle reclamation sweep started");
            loop {
                time::sleep(orchestrator.config.sweep_interval).await;
                if !*orchestrator.sweeping.read().await {
                    info!("Idle reclamation sweep stopped");
                    break;
                }
                orchestrator.sweep_now().await;
            }
        });
    }

    /// Stop the periodic sweep.
    pub async fn stop_sweeper(&self) {
        let mut sweeping = self.sweeping.write().await;
        *sweeping = false;
    }

    /// One reclamation pass: stop idle projects and force-resolve
    /// transitional states that outlived the transition timeout (crash
    /// recovery).
    pub async fn sweep_now(&self) -> SweepStats {
        let now = Utc::now();
        let idle_cutoff = now
            - chrono::Duration::from_std(self.config.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let transition_cutoff = now
            - chrono::Duration::from_std(self.config.transition_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        let entries: Vec<(String, Arc<Mutex<ProjectSlot>>)> = {
            self.projects
                .read()
                .await
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        let mut stats = SweepStats::default();
        for (project_id, slot) in entries {
            enum SweepAction {
                None,
                StopIdle,
                Destroy(Option<PooledEnvironment>, EnvironmentRecord, StopReason),
            }

            let action = {
                let mut guard = slot.lock().await;
                match guard.current.as_mut() {
                    None => SweepAction::None,
                    Some(runtime) => match runtime.record.state {
                        RuntimeState::Running
                            if runtime.record.last_activity_at < idle_cutoff =>
                        {
                            SweepAction::StopIdle
                        }
                        RuntimeState::Provisioning
                            if runtime.record.state_changed_at < transition_cutoff =>
                        {
                            runtime.record.state = RuntimeState::Error;
                            runtime.record.error_message =
                                Some("Provisioning did not complete".to_string());
                            runtime.record.state_changed_at = now;
                            SweepAction::Destroy(
                                runtime.env.take(),
                                runtime.record.clone(),
                                StopReason::Requested,
                            )
                        }
                        RuntimeState::Stopping
                            if runtime.record.state_changed_at < transition_cutoff =>
                        {
                            runtime.record.state = RuntimeState::Stopped;
                            runtime.record.handle = None;
                            runtime.record.state_changed_at = now;
                            SweepAction::Destroy(
                                runtime.env.take(),
                                runtime.record.clone(),
                                StopReason::Requested,
                            )
                        }
                        _ => SweepAction::None,
                    },
                }
            };

            match action {
                SweepAction::None => {}
                SweepAction::StopIdle => {
                    info!("Reclaiming idle project {}", project_id);
                    if let Err(e) = self.stop_internal(&project_id, StopReason::IdleTimeout).await
                    {
                        warn!("Idle reclamation of {} failed: {}", project_id, e);
                    } else {
                        stats.idle_reclaimed += 1;
                    }
                }
                SweepAction::Destroy(env, record, reason) => {
                    warn!(
                        "Force-resolved stale transition for project {} -> {}",
                        project_id,
                        record.state.as_str()
                    );
                    if let Some(env) = env {
                        if let Err(e) = self.driver.destroy(&env.handle).await {
                            warn!("Failed to destroy stale environment: {}", e);
                        }
                    }
                    if let Err(e) = self.persist(&record).await {
                        warn!("Failed to persist swept record: {}", e);
                    }
                    match record.state {
                        RuntimeState::Stopped => {
                            self.events.publish(RuntimeEvent::EnvironmentStopped {
                                project_id: project_id.clone(),
                                environment_id: record.id,
                                reason,
                            })
                        }
                        _ => self.events.publish(RuntimeEvent::EnvironmentErrored {
                            project_id: project_id.clone(),
                            environment_id: record.id,
                            detail: record
                                .error_message
                                .unwrap_or_else(|| "stale transition".to_string()),
                        }),
                    }
                    stats.transitions_recovered += 1;
                }
            }
        }
        stats
    }
}
