// ABOUTME: Integration tests for the full runtime stack: pool, orchestrator, monitor
// ABOUTME: A fake driver substitutes the environment backend and counts every call

use async_trait::async_trait;
use codedock_collab::{Action, Role, SessionConfig, SessionManager, SessionManagerConfig};
use codedock_runtime::{
    AccessPolicy, DriverError, EnvironmentHandle, EnvironmentPool, EventBus, ExecOptions,
    ExecOutput, ExecRequest, LogStream, MetricsRegistry, MonitorConfig, OrchestratorConfig,
    PoolConfig, ProjectDirectory, ProjectOrchestrator, ResourceMonitor, ResourceUsage,
    RuntimeDriver, RuntimeError, RuntimeState, SessionAccessPolicy, StopReason, Template,
};
use codedock_storage::{MemoryStore, RecordStore, ENVIRONMENTS};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fake environment backend: hands out numbered handles and records every
/// call so tests can assert what the orchestration layer actually did.
struct FakeDriver {
    provisions: AtomicUsize,
    resets: AtomicUsize,
    destroys: AtomicUsize,
    execs: AtomicUsize,
    fail_provision: AtomicBool,
    provision_delay: Duration,
    exec_delay: Duration,
    log_lines: Vec<String>,
    /// Handle ids whose stats calls fail
    fail_stats: Mutex<HashSet<String>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            provisions: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            execs: AtomicUsize::new(0),
            fail_provision: AtomicBool::new(false),
            provision_delay: Duration::ZERO,
            exec_delay: Duration::ZERO,
            log_lines: vec![
                "server listening on :3000".to_string(),
                "GET / 200".to_string(),
                "GET /health 200".to_string(),
            ],
            fail_stats: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl RuntimeDriver for FakeDriver {
    async fn ping(&self) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn provision(
        &self,
        _template: &Template,
        _name: &str,
        _labels: HashMap<String, String>,
    ) -> Result<EnvironmentHandle, DriverError> {
        tokio::time::sleep(self.provision_delay).await;
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(DriverError::Environment("backend unavailable".to_string()));
        }
        let n = self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(EnvironmentHandle::new(format!("ctr-{}", n)))
    }

    async fn reset(&self, _handle: &EnvironmentHandle) -> Result<(), DriverError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, _handle: &EnvironmentHandle) -> Result<(), DriverError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exec(
        &self,
        _handle: &EnvironmentHandle,
        request: ExecRequest,
    ) -> Result<ExecOutput, DriverError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.exec_delay).await;
        Ok(ExecOutput {
            exit_code: 0,
            stdout: request.command.join(" ").into_bytes(),
            stderr: vec![],
        })
    }

    async fn logs(
        &self,
        _handle: &EnvironmentHandle,
        tail: usize,
    ) -> Result<Vec<String>, DriverError> {
        let lines = &self.log_lines;
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].to_vec())
    }

    async fn stream_logs(&self, _handle: &EnvironmentHandle) -> Result<LogStream, DriverError> {
        let (tx, receiver) = tokio::sync::mpsc::unbounded_channel();
        for line in &self.log_lines {
            let _ = tx.send(codedock_runtime::LogChunk {
                timestamp: chrono::Utc::now(),
                source: codedock_runtime::LogSource::Stdout,
                line: line.clone(),
            });
        }
        Ok(LogStream { receiver })
    }

    async fn stats(&self, handle: &EnvironmentHandle) -> Result<ResourceUsage, DriverError> {
        if self.fail_stats.lock().unwrap().contains(&handle.id) {
            return Err(DriverError::Environment("stats unavailable".to_string()));
        }
        Ok(ResourceUsage {
            cpu_percent: 5.0,
            memory_usage_mb: 256,
            memory_limit_mb: 1024,
            network_rx_bytes: 1000,
            network_tx_bytes: 2000,
        })
    }

    async fn list_labeled(&self, _label: &str) -> Result<Vec<EnvironmentHandle>, DriverError> {
        Ok(vec![])
    }
}

struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn allows(&self, _project_id: &str, _user_id: &str, _action: Action) -> bool {
        true
    }
}

struct StaticDirectory {
    owners: HashMap<String, String>,
}

#[async_trait]
impl ProjectDirectory for StaticDirectory {
    async fn owner_of(&self, project_id: &str) -> Option<String> {
        self.owners.get(project_id).cloned()
    }
}

struct Harness {
    driver: Arc<FakeDriver>,
    pool: Arc<EnvironmentPool>,
    store: Arc<MemoryStore>,
    metrics: MetricsRegistry,
    events: EventBus,
    orchestrator: Arc<ProjectOrchestrator>,
}

fn harness_with(
    driver: FakeDriver,
    pool_config: PoolConfig,
    config: OrchestratorConfig,
    policy: Arc<dyn AccessPolicy>,
) -> Harness {
    let driver = Arc::new(driver);
    let pool = Arc::new(EnvironmentPool::new(driver.clone(), pool_config));
    let store = Arc::new(MemoryStore::new());
    let metrics = MetricsRegistry::new();
    let events = EventBus::default();
    let orchestrator = Arc::new(ProjectOrchestrator::new(
        pool.clone(),
        driver.clone(),
        store.clone(),
        policy,
        metrics.clone(),
        events.clone(),
        config,
    ));
    Harness {
        driver,
        pool,
        store,
        metrics,
        events,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeDriver::default(),
        PoolConfig::default(),
        OrchestratorConfig::default(),
        Arc::new(AllowAll),
    )
}

fn node_template() -> Template {
    Template::new("node-18", "node:18-alpine")
}

#[tokio::test]
async fn test_start_then_stop_ends_stopped_and_never_shrinks_the_pool() {
    let h = harness();
    let mut events = h.events.subscribe();

    let idle_before = h
        .pool
        .status()
        .await
        .get("node-18")
        .map(|s| s.idle)
        .unwrap_or(0);

    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .expect("Failed to start");
    assert_eq!(record.state, RuntimeState::Running);
    assert!(record.handle.is_some());

    h.orchestrator.stop("project-1", "alice").await.unwrap();
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Stopped)
    );

    // The instance went back to its pool (or was destroyed at capacity);
    // the idle count must not have shrunk
    let idle_after = h.pool.status().await["node-18"].idle;
    assert!(idle_after >= idle_before);
    assert_eq!(idle_after, 1);

    // Lifecycle events came out in order
    use codedock_runtime::RuntimeEvent;
    match events.recv().await.unwrap() {
        RuntimeEvent::EnvironmentStarted { project_id, .. } => assert_eq!(project_id, "project-1"),
        other => panic!("Unexpected event: {:?}", other),
    }
    match events.recv().await.unwrap() {
        RuntimeEvent::EnvironmentStopped { reason, .. } => {
            assert_eq!(reason, StopReason::Requested)
        }
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_is_a_noop_when_already_stopped() {
    let h = harness();
    // Never started at all
    h.orchestrator.stop("project-1", "alice").await.unwrap();

    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    h.orchestrator.stop("project-1", "alice").await.unwrap();
    // Second stop: still fine
    h.orchestrator.stop("project-1", "alice").await.unwrap();
    assert_eq!(h.driver.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_double_start_fails_already_running() {
    let h = harness();
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let result = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await;
    assert!(matches!(result, Err(RuntimeError::AlreadyRunning(_))));
}

#[tokio::test]
async fn test_provision_failure_lands_in_error_state_and_is_retryable() {
    let h = harness();
    h.driver.fail_provision.store(true, Ordering::SeqCst);

    let result = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await;
    assert!(matches!(result, Err(RuntimeError::Driver(_))));
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Error)
    );
    let errored = h.orchestrator.get_record("project-1").await.unwrap();
    assert!(errored.error_message.is_some());

    // Retry from error is allowed and produces a fresh environment id
    h.driver.fail_provision.store(false, Ordering::SeqCst);
    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    assert_eq!(record.state, RuntimeState::Running);
    assert_ne!(record.id, errored.id);
}

#[tokio::test]
async fn test_slow_provisioning_times_out() {
    let h = harness_with(
        FakeDriver {
            provision_delay: Duration::from_millis(100),
            ..Default::default()
        },
        PoolConfig {
            provision_timeout: Duration::from_millis(5),
            ..Default::default()
        },
        OrchestratorConfig::default(),
        Arc::new(AllowAll),
    );

    let result = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await;
    assert!(matches!(result, Err(RuntimeError::ProvisionTimeout { .. })));
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Error)
    );
}

#[tokio::test]
async fn test_exec_outside_running_never_reaches_the_driver() {
    let h = harness();

    // Never started
    let result = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["echo".to_string(), "hi".to_string()],
            ExecOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(RuntimeError::NotRunning(_))));

    // Started then stopped
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    h.orchestrator.stop("project-1", "alice").await.unwrap();
    let result = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["echo".to_string(), "hi".to_string()],
            ExecOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(RuntimeError::NotRunning(_))));

    // Only the reset's exec-free path ran; no user command hit the driver
    assert_eq!(h.driver.execs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_exec_returns_captured_output() {
    let h = harness();
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let execution = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["echo".to_string(), "hi".to_string()],
            ExecOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(execution.exit_code, 0);
    assert_eq!(execution.stdout, "echo hi");
    assert!(execution.stderr.is_empty());
}

#[tokio::test]
async fn test_exec_timeout_abandons_command_but_not_environment() {
    let h = harness_with(
        FakeDriver {
            exec_delay: Duration::from_millis(50),
            ..Default::default()
        },
        PoolConfig::default(),
        OrchestratorConfig::default(),
        Arc::new(AllowAll),
    );

    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let result = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["sleep".to_string(), "10".to_string()],
            ExecOptions {
                timeout: Some(Duration::from_millis(5)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(RuntimeError::ExecTimeout { timeout_ms: 5 })
    ));

    // The environment survived the abandoned command
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Running)
    );
    let record = h.orchestrator.get_record("project-1").await.unwrap();
    assert!(record.handle.is_some());

    // And still accepts commands given a generous enough bound
    let execution = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["true".to_string()],
            ExecOptions {
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(execution.exit_code, 0);
}

#[tokio::test]
async fn test_exec_concurrency_cap_is_enforced() {
    let h = harness_with(
        FakeDriver {
            exec_delay: Duration::from_millis(100),
            ..Default::default()
        },
        PoolConfig::default(),
        OrchestratorConfig {
            max_concurrent_execs: 1,
            ..Default::default()
        },
        Arc::new(AllowAll),
    );

    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let orchestrator = h.orchestrator.clone();
    let slow = tokio::spawn(async move {
        orchestrator
            .exec(
                "project-1",
                "alice",
                vec!["build".to_string()],
                ExecOptions::default(),
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = h
        .orchestrator
        .exec(
            "project-1",
            "alice",
            vec!["ls".to_string()],
            ExecOptions::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(RuntimeError::ExecLimitExceeded { limit: 1, .. })
    ));

    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_restart_provisions_a_fresh_environment_id() {
    let h = harness();
    let first = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let second = h.orchestrator.restart("project-1", "alice").await.unwrap();
    assert_eq!(second.state, RuntimeState::Running);
    assert_eq!(second.template, first.template);
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_logs_come_from_driver_while_running_and_buffer_after_stop() {
    let h = harness();
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let live = h
        .orchestrator
        .get_logs("project-1", "alice", 2)
        .await
        .unwrap();
    assert_eq!(live, vec!["GET / 200", "GET /health 200"]);

    h.orchestrator.stop("project-1", "alice").await.unwrap();

    // Served from the captured buffer now; driver no longer holds the env
    let after = h
        .orchestrator
        .get_logs("project-1", "alice", 1)
        .await
        .unwrap();
    assert_eq!(after, vec!["GET /health 200"]);

    let unknown = h.orchestrator.get_logs("project-x", "alice", 10).await;
    assert!(matches!(unknown, Err(RuntimeError::NotRunning(_))));
}

#[tokio::test]
async fn test_stream_logs_is_lazy_and_finite() {
    let h = harness();
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let mut stream = h
        .orchestrator
        .stream_logs("project-1", "alice")
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Some(chunk) = stream.receiver.recv().await {
        lines.push(chunk.line);
    }
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "server listening on :3000");
}

#[tokio::test]
async fn test_metrics_flow_from_monitor_to_orchestrator() {
    let h = harness();
    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let monitor = ResourceMonitor::new(
        h.orchestrator.clone(),
        h.driver.clone(),
        h.metrics.clone(),
        h.events.clone(),
        MonitorConfig::default(),
    );

    // Nothing sampled yet
    assert!(h
        .orchestrator
        .get_metrics("project-1", "alice")
        .await
        .unwrap()
        .is_none());

    monitor.sample_now().await;
    let sample = h
        .orchestrator
        .get_metrics("project-1", "alice")
        .await
        .unwrap()
        .expect("Expected a reading");
    assert_eq!(sample.usage.cpu_percent, 5.0);
    assert!(!sample.unavailable);

    // A failing driver flags the reading stale but keeps the numbers
    h.driver
        .fail_stats
        .lock()
        .unwrap()
        .insert(record.handle.clone().unwrap().id);
    monitor.sample_now().await;
    let stale = h
        .orchestrator
        .get_metrics("project-1", "alice")
        .await
        .unwrap()
        .unwrap();
    assert!(stale.unavailable);
    assert_eq!(stale.usage.cpu_percent, 5.0);
}

#[tokio::test]
async fn test_one_failing_environment_does_not_block_sampling_of_others() {
    let h = harness();
    let failing = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    h.orchestrator
        .start("project-2", "bob", node_template())
        .await
        .unwrap();

    h.driver
        .fail_stats
        .lock()
        .unwrap()
        .insert(failing.handle.clone().unwrap().id);

    let monitor = ResourceMonitor::new(
        h.orchestrator.clone(),
        h.driver.clone(),
        h.metrics.clone(),
        h.events.clone(),
        MonitorConfig::default(),
    );
    monitor.sample_now().await;

    // project-2 sampled fine despite project-1's failure
    let healthy = h
        .orchestrator
        .get_metrics("project-2", "bob")
        .await
        .unwrap()
        .expect("Expected a reading");
    assert!(!healthy.unavailable);
}

#[tokio::test]
async fn test_get_metrics_requires_running_state() {
    let h = harness();
    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    h.orchestrator.stop("project-1", "alice").await.unwrap();

    let result = h.orchestrator.get_metrics("project-1", "alice").await;
    assert!(matches!(result, Err(RuntimeError::NotRunning(_))));
}

#[tokio::test]
async fn test_idle_sweep_reclaims_inactive_projects() {
    let h = harness_with(
        FakeDriver::default(),
        PoolConfig::default(),
        OrchestratorConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        },
        Arc::new(AllowAll),
    );
    let mut events = h.events.subscribe();

    h.orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let stats = h.orchestrator.sweep_now().await;
    assert_eq!(stats.idle_reclaimed, 1);
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Stopped)
    );

    // The stop event records the idle-timeout reason
    use codedock_runtime::RuntimeEvent;
    let reason = loop {
        match events.recv().await.unwrap() {
            RuntimeEvent::EnvironmentStopped { reason, .. } => break reason,
            _ => continue,
        }
    };
    assert_eq!(reason, StopReason::IdleTimeout);
}

#[tokio::test]
async fn test_stale_provisioning_is_force_failed_by_the_sweep() {
    let h = harness_with(
        FakeDriver {
            provision_delay: Duration::from_millis(200),
            ..Default::default()
        },
        PoolConfig::default(),
        OrchestratorConfig {
            transition_timeout: Duration::ZERO,
            ..Default::default()
        },
        Arc::new(AllowAll),
    );

    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move {
        orchestrator
            .start("project-1", "alice", node_template())
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Provisioning)
    );

    let stats = h.orchestrator.sweep_now().await;
    assert_eq!(stats.transitions_recovered, 1);
    assert_eq!(
        h.orchestrator.state_of("project-1").await,
        Some(RuntimeState::Error)
    );

    let _ = pending.await;
}

#[tokio::test]
async fn test_permission_gate_rejects_before_any_driver_call() {
    let sessions = Arc::new(SessionManager::new(
        Arc::new(MemoryStore::new()),
        SessionManagerConfig::default(),
    ));
    let directory = Arc::new(StaticDirectory {
        owners: HashMap::from([("project-1".to_string(), "alice".to_string())]),
    });
    let policy = Arc::new(SessionAccessPolicy::new(directory, sessions.clone()));

    let h = harness_with(
        FakeDriver::default(),
        PoolConfig::default(),
        OrchestratorConfig::default(),
        policy,
    );

    // The owner can start; a stranger cannot even read logs
    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();
    let denied = h.orchestrator.get_logs("project-1", "mallory", 10).await;
    assert!(matches!(denied, Err(RuntimeError::PermissionDenied { .. })));

    let denied = h
        .orchestrator
        .exec(
            "project-1",
            "mallory",
            vec!["cat".to_string(), "/etc/passwd".to_string()],
            ExecOptions::default(),
        )
        .await;
    assert!(matches!(denied, Err(RuntimeError::PermissionDenied { .. })));
    assert_eq!(h.driver.execs.load(Ordering::SeqCst), 0);

    // Joining a session as editor grants terminal access, viewer does not
    let session = sessions
        .create_session("project-1", &record.id, SessionConfig::default())
        .await
        .unwrap();
    sessions.join(&session.id, "erin", Role::Editor).await.unwrap();
    sessions.join(&session.id, "vera", Role::Viewer).await.unwrap();

    h.orchestrator
        .exec(
            "project-1",
            "erin",
            vec!["ls".to_string()],
            ExecOptions::default(),
        )
        .await
        .unwrap();

    let denied = h
        .orchestrator
        .exec(
            "project-1",
            "vera",
            vec!["ls".to_string()],
            ExecOptions::default(),
        )
        .await;
    assert!(matches!(denied, Err(RuntimeError::PermissionDenied { .. })));

    // Viewers may still read
    h.orchestrator
        .get_logs("project-1", "vera", 10)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_state_changes_are_persisted() {
    let h = harness();
    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    let stored = h
        .store
        .get(ENVIRONMENTS, &record.id)
        .await
        .unwrap()
        .expect("Expected persisted record");
    assert_eq!(stored["state"], "running");
    assert_eq!(stored["project_id"], "project-1");

    h.orchestrator.stop("project-1", "alice").await.unwrap();
    let stored = h.store.get(ENVIRONMENTS, &record.id).await.unwrap().unwrap();
    assert_eq!(stored["state"], "stopped");
}

#[tokio::test]
async fn test_remove_project_deletes_record_and_state() {
    let h = harness();
    let record = h
        .orchestrator
        .start("project-1", "alice", node_template())
        .await
        .unwrap();

    h.orchestrator
        .remove_project("project-1", "alice")
        .await
        .unwrap();

    assert_eq!(h.orchestrator.state_of("project-1").await, None);
    assert!(h
        .store
        .get(ENVIRONMENTS, &record.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_projects_operate_independently() {
    let h = harness();

    let mut handles = Vec::new();
    for i in 0..3 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let project = format!("project-{}", i);
            orchestrator
                .start(&project, "alice", node_template())
                .await
                .unwrap();
            orchestrator
                .exec(
                    &project,
                    "alice",
                    vec!["true".to_string()],
                    ExecOptions::default(),
                )
                .await
                .unwrap();
            orchestrator.stop(&project, "alice").await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..3 {
        assert_eq!(
            h.orchestrator.state_of(&format!("project-{}", i)).await,
            Some(RuntimeState::Stopped)
        );
    }
}
