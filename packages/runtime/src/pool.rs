// ABOUTME: Warm-environment pool amortizing cold-start cost per template
// ABOUTME: Hands out idle instances, re-pools released ones, and pre-warms in the background

use crate::driver::{DriverError, EnvironmentHandle, RuntimeDriver, Template};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Provisioning for template '{template}' timed out after {waited_ms}ms")]
    ProvisionTimeout { template: String, waited_ms: u64 },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle instances kept per template; releases beyond this are destroyed
    pub max_idle_per_template: usize,
    /// Upper bound on a single provisioning call
    pub provision_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_template: 2,
            provision_timeout: Duration::from_secs(60),
        }
    }
}

/// An environment owned by whoever holds this value. Returned by `acquire`,
/// given back through `release`.
#[derive(Debug, Clone)]
pub struct PooledEnvironment {
    pub handle: EnvironmentHandle,
    pub template: Template,
    pub created_at: DateTime<Utc>,
}

/// Idle/max counts reported by the status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub max: usize,
}

struct TemplatePool {
    template: Template,
    max_idle: usize,
    slots: Mutex<Vec<PooledEnvironment>>,
}

/// Bounded pool of pre-warmed environments, one slot set per template.
///
/// Slot sets are serialized individually: acquire, release, and pre-warm on
/// one template never contend with another template's traffic. Driver calls
/// always happen outside the slot lock.
pub struct EnvironmentPool {
    driver: Arc<dyn RuntimeDriver>,
    templates: RwLock<HashMap<String, Arc<TemplatePool>>>,
    config: PoolConfig,
}

impl EnvironmentPool {
    pub fn new(driver: Arc<dyn RuntimeDriver>, config: PoolConfig) -> Self {
        Self {
            driver,
            templates: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn template_pool(&self, template: &Template) -> Arc<TemplatePool> {
        {
            let templates = self.templates.read().await;
            if let Some(pool) = templates.get(&template.name) {
                return pool.clone();
            }
        }

        let mut templates = self.templates.write().await;
        templates
            .entry(template.name.clone())
            .or_insert_with(|| {
                Arc::new(TemplatePool {
                    template: template.clone(),
                    max_idle: self.config.max_idle_per_template,
                    slots: Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    /// Take a warm instance if one is idle, otherwise provision a fresh one
    /// synchronously. Never waits longer than the configured provisioning
    /// timeout.
    pub async fn acquire(&self, template: &Template) -> Result<PooledEnvironment> {
        let pool = self.template_pool(template).await;

        if let Some(env) = pool.slots.lock().await.pop() {
            debug!(
                "Handing out warm environment {} for template {}",
                env.handle.id, template.name
            );
            return Ok(env);
        }

        debug!("No idle slot for template {}, provisioning", template.name);
        Self::provision_fresh(&self.driver, template, self.config.provision_timeout).await
    }

    /// Give an instance back. Below capacity it is reset to baseline and
    /// re-pooled; at capacity, or when the reset fails, it is torn down.
    pub async fn release(&self, env: PooledEnvironment) -> Result<()> {
        let pool = self.template_pool(&env.template).await;

        let below_capacity = { pool.slots.lock().await.len() < pool.max_idle };
        if below_capacity {
            match self.driver.reset(&env.handle).await {
                Ok(()) => {
                    let mut slots = pool.slots.lock().await;
                    if slots.len() < pool.max_idle {
                        debug!(
                            "Re-pooled environment {} for template {}",
                            env.handle.id, env.template.name
                        );
                        slots.push(env);
                        return Ok(());
                    }
                    // Pre-warm filled the pool while we were resetting
                    drop(slots);
                }
                Err(e) => {
                    warn!(
                        "Reset failed for environment {}, destroying: {}",
                        env.handle.id, e
                    );
                }
            }
        }

        self.driver.destroy(&env.handle).await?;
        Ok(())
    }

    /// Ensure `count` idle slots exist for the template, filling them from a
    /// background task. Failures are logged and never reach `acquire`
    /// callers.
    pub async fn prewarm(&self, template: Template, count: usize) {
        let pool = self.template_pool(&template).await;
        let driver = self.driver.clone();
        let provision_timeout = self.config.provision_timeout;

        tokio::spawn(async move {
            let target = count.min(pool.max_idle);
            loop {
                let deficit = {
                    let slots = pool.slots.lock().await;
                    target.saturating_sub(slots.len())
                };
                if deficit == 0 {
                    break;
                }

                match Self::provision_fresh(&driver, &pool.template, provision_timeout).await {
                    Ok(env) => {
                        info!(
                            "Pre-warmed environment {} for template {}",
                            env.handle.id, pool.template.name
                        );
                        pool.slots.lock().await.push(env);
                    }
                    Err(e) => {
                        warn!(
                            "Pre-warm provisioning failed for template {}: {}",
                            pool.template.name, e
                        );
                        break;
                    }
                }
            }
        });
    }

    /// Idle/max counts per template.
    pub async fn status(&self) -> HashMap<String, PoolStatus> {
        let templates: Vec<Arc<TemplatePool>> =
            { self.templates.read().await.values().cloned().collect() };

        let mut status = HashMap::new();
        for pool in templates {
            let idle = pool.slots.lock().await.len();
            status.insert(
                pool.template.name.clone(),
                PoolStatus {
                    idle,
                    max: pool.max_idle,
                },
            );
        }
        status
    }

    /// Handles of every idle instance across all templates. Orphan
    /// reconciliation needs these so pooled spares are not mistaken for
    /// leaked environments.
    pub async fn idle_handles(&self) -> Vec<EnvironmentHandle> {
        let templates: Vec<Arc<TemplatePool>> =
            { self.templates.read().await.values().cloned().collect() };

        let mut handles = Vec::new();
        for pool in templates {
            let slots = pool.slots.lock().await;
            handles.extend(slots.iter().map(|env| env.handle.clone()));
        }
        handles
    }

    /// Tear down every idle instance. Called on shutdown.
    pub async fn drain(&self) {
        let templates: Vec<Arc<TemplatePool>> =
            { self.templates.read().await.values().cloned().collect() };

        for pool in templates {
            let drained: Vec<PooledEnvironment> = pool.slots.lock().await.drain(..).collect();
            for env in drained {
                if let Err(e) = self.driver.destroy(&env.handle).await {
                    warn!("Failed to destroy idle environment {}: {}", env.handle.id, e);
                }
            }
        }
    }

    async fn provision_fresh(
        driver: &Arc<dyn RuntimeDriver>,
        template: &Template,
        provision_timeout: Duration,
    ) -> Result<PooledEnvironment> {
        let name = format!(
            "cdk-{}-{}",
            template.name,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        // The driver attaches its own managed/template labels
        match timeout(
            provision_timeout,
            driver.provision(template, &name, HashMap::new()),
        )
        .await
        {
            Ok(Ok(handle)) => Ok(PooledEnvironment {
                handle,
                template: template.clone(),
                created_at: Utc::now(),
            }),
            Ok(Err(e)) => Err(PoolError::Driver(e)),
            Err(_) => Err(PoolError::ProvisionTimeout {
                template: template.name.clone(),
                waited_ms: provision_timeout.as_millis() as u64,
            }),
        }
    }
}
