// ABOUTME: Background resource sampling for running environments
// ABOUTME: Latest-reading registry with per-environment failure isolation

use crate::driver::{ResourceUsage, RuntimeDriver};
use crate::events::{EventBus, RuntimeEvent};
use crate::orchestrator::ProjectOrchestrator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often every running environment is sampled
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Latest resource reading for one environment. `unavailable` is set when the
/// most recent sampling attempt failed; the usage numbers then come from the
/// last successful sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledUsage {
    pub usage: ResourceUsage,
    pub sampled_at: DateTime<Utc>,
    pub unavailable: bool,
}

/// Shared map of latest readings, written by the monitor loop and read by
/// the orchestrator's metrics query. Overwrite semantics: no history kept.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<RwLock<HashMap<String, SampledUsage>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self, environment_id: &str) -> Option<SampledUsage> {
        self.inner.read().await.get(environment_id).cloned()
    }

    pub async fn record(&self, environment_id: &str, usage: ResourceUsage) {
        let mut inner = self.inner.write().await;
        inner.insert(
            environment_id.to_string(),
            SampledUsage {
                usage,
                sampled_at: Utc::now(),
                unavailable: false,
            },
        );
    }

    /// Flag the reading stale after a failed sample. The previous usage
    /// numbers stay visible until the next successful sample replaces them.
    pub async fn mark_unavailable(&self, environment_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(sample) = inner.get_mut(environment_id) {
            sample.unavailable = true;
        }
    }

    pub async fn remove(&self, environment_id: &str) {
        self.inner.write().await.remove(environment_id);
    }

    /// Drop readings for environments that are no longer live.
    pub async fn retain(&self, live: &HashSet<String>) {
        let mut inner = self.inner.write().await;
        inner.retain(|id, _| live.contains(id));
    }
}

/// Periodic sampler for every environment the orchestrator reports as
/// running. One environment's driver failure never aborts the rest of the
/// pass.
pub struct ResourceMonitor {
    orchestrator: Arc<ProjectOrchestrator>,
    driver: Arc<dyn RuntimeDriver>,
    registry: MetricsRegistry,
    events: EventBus,
    config: MonitorConfig,
    running: Arc<RwLock<bool>>,
}

impl ResourceMonitor {
    pub fn new(
        orchestrator: Arc<ProjectOrchestrator>,
        driver: Arc<dyn RuntimeDriver>,
        registry: MetricsRegistry,
        events: EventBus,
        config: MonitorConfig,
    ) -> Self {
        Self {
            orchestrator,
            driver,
            registry,
            events,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the sampling loop.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let orchestrator = self.orchestrator.clone();
        let driver = self.driver.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let interval = self.config.interval;
        let running_flag = self.running.clone();

        tokio::spawn(async move {
            info!("Resource monitor started");
            loop {
                if !*running_flag.read().await {
                    info!("Resource monitor stopped");
                    break;
                }

                Self::sample_all(&orchestrator, &driver, &registry, &events).await;
                time::sleep(interval).await;
            }
        });
    }

    /// Stop the sampling loop.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Run one sampling pass immediately. Used by tests and by callers that
    /// want a fresh reading without waiting out the interval.
    pub async fn sample_now(&self) {
        Self::sample_all(&self.orchestrator, &self.driver, &self.registry, &self.events).await;
    }

    async fn sample_all(
        orchestrator: &Arc<ProjectOrchestrator>,
        driver: &Arc<dyn RuntimeDriver>,
        registry: &MetricsRegistry,
        events: &EventBus,
    ) {
        let environments = orchestrator.running_environments().await;

        let live: HashSet<String> = environments.iter().map(|(id, _)| id.clone()).collect();
        registry.retain(&live).await;

        for (environment_id, handle) in environments {
            match driver.stats(&handle).await {
                Ok(usage) => {
                    registry.record(&environment_id, usage.clone()).await;
                    events.publish(RuntimeEvent::MetricsSampled {
                        environment_id,
                        usage,
                        unavailable: false,
                    });
                }
                Err(e) => {
                    warn!("Failed to sample environment {}: {}", environment_id, e);
                    registry.mark_unavailable(&environment_id).await;
                }
            }
        }
    }
}
