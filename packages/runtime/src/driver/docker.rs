// ABOUTME: Docker implementation of the runtime driver using bollard
// ABOUTME: Maps environment provisioning, exec, logs, and stats onto the Docker API

use super::{
    DriverError, EnvironmentHandle, ExecOutput, ExecRequest, LogChunk, LogSource, LogStream,
    Result, RuntimeDriver, Template,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct DockerDriver {
    client: Docker,
    label_prefix: String,
    /// Directory wiped when an environment is reset to baseline
    workspace_dir: String,
}

impl DockerDriver {
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            label_prefix: "codedock.environment".to_string(),
            workspace_dir: "/workspace".to_string(),
        }
    }

    /// Label identifying environments managed by this driver, usable with
    /// [`RuntimeDriver::list_labeled`].
    pub fn managed_label(&self) -> String {
        format!("{}.managed=true", self.label_prefix)
    }

    fn to_container_config(
        &self,
        template: &Template,
        name: &str,
        mut labels: HashMap<String, String>,
    ) -> Config<String> {
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(format!("{}.name", self.label_prefix), name.to_string());
        labels.insert(
            format!("{}.template", self.label_prefix),
            template.name.clone(),
        );

        let env: Vec<String> = template
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = bollard::models::HostConfig {
            cpu_shares: Some((template.cpu_cores * 1024.0) as i64),
            memory: Some((template.memory_mb * 1024 * 1024) as i64),
            ..Default::default()
        };

        Config {
            image: Some(template.image.clone()),
            env: Some(env),
            working_dir: Some(template.working_dir.clone()),
            labels: Some(labels),
            // Keep a shell-less image alive between execs
            tty: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.client.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress.map_err(|e| DriverError::Image(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn ping(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn provision(
        &self,
        template: &Template,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<EnvironmentHandle> {
        info!("Provisioning environment {} from template {}", name, template.name);

        self.ensure_image(&template.image).await?;

        let config = self.to_container_config(template, name, labels);
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        debug!("Provisioned container {}", container.id);
        Ok(EnvironmentHandle::new(container.id))
    }

    async fn reset(&self, handle: &EnvironmentHandle) -> Result<()> {
        debug!("Resetting environment {}", handle.id);

        self.client
            .restart_container(&handle.id, None::<RestartContainerOptions>)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        // Restart restores processes; the workspace contents need an explicit wipe
        let wipe = format!(
            "rm -rf {dir}/* {dir}/.[!.]* 2>/dev/null || true",
            dir = self.workspace_dir
        );
        self.exec(
            handle,
            ExecRequest {
                command: vec!["sh".to_string(), "-c".to_string(), wipe],
                working_dir: None,
                env_vars: HashMap::new(),
            },
        )
        .await?;
        Ok(())
    }

    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<()> {
        info!("Destroying environment {}", handle.id);

        if let Err(e) = self
            .client
            .stop_container(&handle.id, Some(StopContainerOptions { t: 5 }))
            .await
        {
            debug!("Stop before remove failed for {}: {}", handle.id, e);
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.client
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;
        Ok(())
    }

    async fn exec(&self, handle: &EnvironmentHandle, request: ExecRequest) -> Result<ExecOutput> {
        let env: Vec<String> = request
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec = self
            .client
            .create_exec(
                &handle.id,
                CreateExecOptions {
                    cmd: Some(request.command),
                    working_dir: request.working_dir,
                    env: if env.is_empty() { None } else { Some(env) },
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| DriverError::Environment(e.to_string()))? {
                        LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(DriverError::Internal(
                    "Exec unexpectedly detached".to_string(),
                ))
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn logs(&self, handle: &EnvironmentHandle, tail: usize) -> Result<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(&handle.id, Some(options));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DriverError::Environment(e.to_string()))?;
            let bytes = chunk.into_bytes();
            let text = String::from_utf8_lossy(&bytes);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(lines)
    }

    async fn stream_logs(&self, handle: &EnvironmentHandle) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "0".to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(&handle.id, Some(options));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!("Log stream ended: {}", e);
                        break;
                    }
                };
                let source = match chunk {
                    LogOutput::StdErr { .. } => LogSource::Stderr,
                    _ => LogSource::Stdout,
                };
                let line = String::from_utf8_lossy(&chunk.into_bytes())
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx
                    .send(LogChunk {
                        timestamp: Utc::now(),
                        source,
                        line,
                    })
                    .is_err()
                {
                    break; // Receiver dropped
                }
            }
        });

        Ok(LogStream { receiver: rx })
    }

    async fn stats(&self, handle: &EnvironmentHandle) -> Result<super::ResourceUsage> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.client.stats(&handle.id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| DriverError::Environment("No stats sample available".to_string()))?
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
            - stats.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
            (cpu_delta / system_delta) * 100.0 * stats.cpu_stats.online_cpus.unwrap_or(1) as f64
        } else {
            0.0
        };

        let (rx_bytes, tx_bytes) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks
                    .values()
                    .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
            })
            .unwrap_or((0, 0));

        Ok(super::ResourceUsage {
            cpu_percent,
            memory_usage_mb: stats.memory_stats.usage.unwrap_or(0) / (1024 * 1024),
            memory_limit_mb: stats.memory_stats.limit.unwrap_or(0) / (1024 * 1024),
            network_rx_bytes: rx_bytes,
            network_tx_bytes: tx_bytes,
        })
    }

    async fn list_labeled(&self, label: &str) -> Result<Vec<EnvironmentHandle>> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![label.to_string()])]),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .map(EnvironmentHandle::new)
            .collect())
    }
}
