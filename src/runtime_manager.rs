use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::command_channel::{CommandChannel, Delivery};
use crate::engine::{ByteStream, ContainerEngine, ContainerSpec, NetworkMode};
use crate::file_manager::FileManager;
use crate::instance::{validate_instance_id, EnvTransforms, EnvironmentMap, InstanceSpec, PortBindings};
use crate::{AgentError, AgentResult};

const ONE_SHOT_PREFIX: &str = "installer-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The container was absent or already stopped; no engine calls were made.
    NotRunning,
}

/// Separate results of removing the container and purging its volume.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub container_removed: bool,
    pub volume_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_error: Option<String>,
}

impl PurgeReport {
    pub fn is_success(&self) -> bool {
        self.container_error.is_none() && self.volume_error.is_none()
    }
}

/// Name of the installer container that runs alongside instance `id`.
pub fn one_shot_name(id: &str) -> String {
    format!("{}{}", ONE_SHOT_PREFIX, id)
}

/// Drives the container lifecycle of every instance on this node.
///
/// Concurrent `start` calls for the same id are not serialized; callers must
/// not issue them.
#[derive(Clone)]
pub struct InstanceManager {
    engine: Arc<dyn ContainerEngine>,
    files: Arc<FileManager>,
    commands: CommandChannel,
    transforms: Arc<EnvTransforms>,
    mount_path: String,
    pull_on_start: bool,
}

impl InstanceManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        files: Arc<FileManager>,
        transforms: EnvTransforms,
        mount_path: String,
        pull_on_start: bool,
    ) -> Self {
        Self {
            commands: CommandChannel::new(engine.clone()),
            engine,
            files,
            transforms: Arc::new(transforms),
            mount_path,
            pull_on_start,
        }
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn files(&self) -> &Arc<FileManager> {
        &self.files
    }

    pub async fn provision_volume(&self, id: &str) -> AgentResult<PathBuf> {
        self.files.provision_volume(id).await
    }

    /// Removes any container named `name`. Returns whether one existed.
    pub async fn ensure_absent(&self, name: &str) -> AgentResult<bool> {
        match self.engine.inspect(name).await? {
            Some(_) => {
                info!("Removing existing container {}", name);
                match self.engine.remove(name).await {
                    Ok(()) => Ok(true),
                    // Removed underneath us.
                    Err(e) if e.is_not_found() => Ok(true),
                    Err(e) => Err(e),
                }
            }
            None => Ok(false),
        }
    }

    /// Replaces whatever container exists for the instance with a fresh one
    /// built from `spec`, and starts it.
    pub async fn start(&self, spec: InstanceSpec) -> AgentResult<String> {
        validate_instance_id(&spec.id)?;
        info!("Starting container: {} from image: {}", spec.id, spec.image);

        let result = self.create_and_start(spec.clone()).await;
        if let Err(e) = &result {
            error!("Failed to start container {}: {}", spec.id, e);
        }
        result
    }

    async fn create_and_start(&self, spec: InstanceSpec) -> AgentResult<String> {
        self.ensure_absent(&spec.id).await?;
        let volume = self.bind_source(&spec.id).await?;

        let mut env = spec.env;
        let applied = self.transforms.apply(&mut env);
        if !applied.is_empty() {
            debug!("Environment transforms for {}: {:?}", spec.id, applied);
        }

        if self.pull_on_start {
            self.engine.pull_image(&spec.image).await?;
        }

        let container = ContainerSpec {
            name: spec.id.clone(),
            image: spec.image,
            env: env.to_docker_env(),
            binds: vec![format!("{}:{}", volume, self.mount_path)],
            ports: spec.ports,
            memory_bytes: memory_limit_bytes(spec.memory_mib),
            nano_cpus: nano_cpus(spec.cpu_count),
            network: NetworkMode::Host,
            auto_remove: false,
            entrypoint: None,
            interactive: true,
        };

        let container_id = self.engine.create(&container).await?;
        self.engine.start(&spec.id).await?;

        info!("Container {} started ({})", spec.id, container_id);
        Ok(container_id)
    }

    /// Runs `script` once in an auto-removing, networkless container with the
    /// instance volume mounted.
    pub async fn create_one_shot(
        &self,
        id: &str,
        image: &str,
        script: &str,
        env: EnvironmentMap,
    ) -> AgentResult<String> {
        validate_instance_id(id)?;
        let name = one_shot_name(id);
        info!("Creating installer container {} from image: {}", name, image);

        let result = async {
            self.ensure_absent(&name).await?;
            let volume = self.bind_source(id).await?;

            if self.pull_on_start {
                self.engine.pull_image(image).await?;
            }

            let container = ContainerSpec {
                name: name.clone(),
                image: image.to_string(),
                env: env.to_docker_env(),
                binds: vec![format!("{}:{}", volume, self.mount_path)],
                ports: PortBindings::default(),
                memory_bytes: None,
                nano_cpus: None,
                network: NetworkMode::Disabled,
                auto_remove: true,
                entrypoint: Some(vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    script.to_string(),
                ]),
                interactive: false,
            };

            let container_id = self.engine.create(&container).await?;
            self.engine.start(&name).await?;
            Ok(container_id)
        }
        .await;

        match &result {
            Ok(container_id) => info!("Installer {} started ({})", name, container_id),
            Err(e) => error!("Failed to run installer for {}: {}", id, e),
        }
        result
    }

    /// Gracefully stops a running instance and removes its container. The
    /// volume is kept.
    pub async fn stop(&self, id: &str, stop_command: Option<&str>) -> AgentResult<StopOutcome> {
        validate_instance_id(id)?;

        let running = self
            .engine
            .inspect(id)
            .await?
            .map(|state| state.running)
            .unwrap_or(false);
        if !running {
            info!("Container {} is not running; nothing to stop", id);
            return Ok(StopOutcome::NotRunning);
        }

        if let Some(command) = stop_command.filter(|c| !c.trim().is_empty()) {
            match self.commands.send_command(id, command).await {
                Ok(Delivery::Delivered) => debug!("Stop command sent to {}", id),
                Ok(Delivery::NotRunning) => debug!("Container {} exited before stop command", id),
                Err(e) => warn!("Failed to send stop command to {}: {}", id, e),
            }
        }

        let result = async {
            match self.engine.stop(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
            match self.engine.remove(id).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        }
        .await;

        match result {
            Ok(()) => {
                info!("Container {} stopped", id);
                Ok(StopOutcome::Stopped)
            }
            Err(e) => {
                error!("Failed to stop container {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Forced removal without inspection. An already-absent container is fine.
    pub async fn kill(&self, id: &str) -> AgentResult<()> {
        validate_instance_id(id)?;
        info!("Killing container: {}", id);

        match self.engine.remove(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Container {} was already gone", id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to kill container {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Removes the container and recursively deletes the volume. Absence of
    /// either counts as success.
    pub async fn delete_and_purge(&self, id: &str) -> AgentResult<PurgeReport> {
        validate_instance_id(id)?;
        info!("Deleting container and volume: {}", id);

        let mut report = PurgeReport::default();

        match self.engine.remove(id).await {
            Ok(()) => report.container_removed = true,
            Err(e) if e.is_not_found() => debug!("Container {} not present", id),
            Err(e) => {
                error!("Failed to remove container {}: {}", id, e);
                report.container_error = Some(e.to_string());
            }
        }

        match self.files.remove_volume(id).await {
            Ok(removed) => report.volume_removed = removed,
            Err(e) => {
                error!("Failed to remove volume for {}: {}", id, e);
                report.volume_error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    /// Last `tail` lines of output, then live output until the container stops.
    pub fn log_stream(&self, id: &str, tail: usize) -> ByteStream {
        self.engine.logs(id, tail)
    }

    /// Provisions the volume and returns its absolute host path for binding.
    async fn bind_source(&self, id: &str) -> AgentResult<String> {
        let path = self.files.provision_volume(id).await?;
        let absolute = tokio::fs::canonicalize(&path).await.map_err(|e| {
            AgentError::FileSystemError(format!("Failed to resolve volume {:?}: {}", path, e))
        })?;
        Ok(absolute.to_string_lossy().to_string())
    }
}

fn memory_limit_bytes(memory_mib: Option<u64>) -> Option<i64> {
    memory_mib
        .filter(|mib| *mib > 0)
        .map(|mib| mib.saturating_mul(1024 * 1024).min(i64::MAX as u64) as i64)
}

fn nano_cpus(cpu_count: Option<f64>) -> Option<i64> {
    cpu_count
        .filter(|cpus| cpus.is_finite() && *cpus > 0.0)
        .map(|cpus| (cpus * 1_000_000_000.0) as i64)
}
