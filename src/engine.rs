//! Container engine seam.
//!
//! Every component talks to the engine through [`ContainerEngine`] so the
//! lifecycle, command, stats and gateway logic can run against a recording
//! fake in tests. [`BollardEngine`] is the Docker implementation.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, Stats, StatsOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::config::DockerConfig;
use crate::instance::PortBindings;
use crate::{AgentError, AgentResult};

/// Lazy sequence of raw output chunks, FIFO per stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = AgentResult<Bytes>> + Send>>;

/// Hijacked container streams returned by an attach call.
pub struct AttachedIo {
    pub output: ByteStream,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl AttachOptions {
    /// stdin + stdout, used to inject console commands.
    pub fn command() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: false,
        }
    }

    pub fn interactive() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
}

/// One engine stats read, carrying the current and the preceding CPU window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Host,
    Disabled,
}

/// Engine-agnostic description of a container to create.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub ports: PortBindings,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub network: NetworkMode,
    pub auto_remove: bool,
    pub entrypoint: Option<Vec<String>>,
    /// Keep stdin open with a TTY so the console can be driven.
    pub interactive: bool,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> AgentResult<()>;

    /// `None` when no container with this name exists.
    async fn inspect(&self, name: &str) -> AgentResult<Option<ContainerState>>;

    /// Force-removes a container. Missing containers yield `NotFound`.
    async fn remove(&self, name: &str) -> AgentResult<()>;

    /// Pulls an image, following progress until the engine reports completion.
    async fn pull_image(&self, image: &str) -> AgentResult<()>;

    async fn create(&self, spec: &ContainerSpec) -> AgentResult<String>;

    async fn start(&self, name: &str) -> AgentResult<()>;

    async fn stop(&self, name: &str) -> AgentResult<()>;

    /// Single non-streaming counter snapshot. Stopped containers yield `NotFound`.
    async fn stats(&self, name: &str) -> AgentResult<CounterSnapshot>;

    /// Last `tail` lines, then follows live output.
    fn logs(&self, name: &str, tail: usize) -> ByteStream;

    async fn attach(&self, name: &str, options: AttachOptions) -> AgentResult<AttachedIo>;
}

#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect(config: &DockerConfig) -> AgentResult<Self> {
        info!("Connecting to container engine at {}", config.socket_path);

        #[cfg(windows)]
        let docker = Docker::connect_with_named_pipe(
            &config.socket_path,
            config.request_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        );

        #[cfg(not(windows))]
        let docker = Docker::connect_with_unix(
            &config.socket_path,
            config.request_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        );

        let docker = docker.map_err(|e| {
            AgentError::ContainerError(format!(
                "Failed to connect to engine at {}: {}",
                config.socket_path, e
            ))
        })?;

        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn ping(&self) -> AgentResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> AgentResult<Option<ContainerState>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(Some(ContainerState {
                running: response
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false),
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> AgentResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> AgentResult<()> {
        let (repository, tag) = split_image_reference(image);
        info!("Pulling image {}:{}", repository, tag);

        let options = CreateImageOptions::<String> {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let progress = result?;
            if let Some(error) = progress.error {
                return Err(AgentError::ContainerError(format!(
                    "Failed to pull image {}: {}",
                    image, error
                )));
            }
            if let Some(status) = progress.status {
                debug!("Pull {}: {}", image, status);
            }
        }

        info!("Image {} is up to date", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> AgentResult<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;
        Ok(response.id)
    }

    async fn start(&self, name: &str) -> AgentResult<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> AgentResult<()> {
        match self.docker.stop_container(name, None).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stats(&self, name: &str) -> AgentResult<CounterSnapshot> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(name, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| AgentError::NotFound(format!("No stats returned for {}", name)))??;

        snapshot_from_stats(name, &stats)
    }

    fn logs(&self, name: &str, tail: usize) -> ByteStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        Box::pin(
            self.docker
                .logs(name, Some(options))
                .map(|item| item.map(LogOutput::into_bytes).map_err(AgentError::from)),
        )
    }

    async fn attach(&self, name: &str, options: AttachOptions) -> AgentResult<AttachedIo> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(options.stdin),
            stdout: Some(options.stdout),
            stderr: Some(options.stderr),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        };
        let AttachContainerResults { output, input } =
            self.docker.attach_container(name, Some(options)).await?;

        Ok(AttachedIo {
            output: Box::pin(
                output.map(|item| item.map(LogOutput::into_bytes).map_err(AgentError::from)),
            ),
            input,
        })
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|(container_port, host_ports)| {
            let bindings = host_ports
                .iter()
                .map(|host_port| PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                })
                .collect();
            (container_port.clone(), Some(bindings))
        })
        .collect();

    let network_mode = match spec.network {
        NetworkMode::Host => "host",
        NetworkMode::Disabled => "none",
    };

    let host_config = HostConfig {
        binds: Some(spec.binds.clone()),
        port_bindings: Some(port_bindings),
        memory: spec.memory_bytes,
        nano_cpus: spec.nano_cpus,
        network_mode: Some(network_mode.to_string()),
        auto_remove: Some(spec.auto_remove),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        entrypoint: spec.entrypoint.clone(),
        attach_stdin: Some(spec.interactive),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(spec.interactive),
        tty: Some(spec.interactive),
        network_disabled: Some(spec.network == NetworkMode::Disabled),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn snapshot_from_stats(name: &str, stats: &Stats) -> AgentResult<CounterSnapshot> {
    // The engine reports empty memory stats for containers that are not running.
    let (Some(memory_usage), Some(memory_limit)) =
        (stats.memory_stats.usage, stats.memory_stats.limit)
    else {
        return Err(AgentError::NotFound(format!("Container {} is not running", name)));
    };

    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or_else(|| {
        stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|cpus| cpus.len() as u64)
            .unwrap_or(1)
    });

    Ok(CounterSnapshot {
        memory_usage,
        memory_limit,
        cpu_total: stats.cpu_stats.cpu_usage.total_usage,
        precpu_total: stats.precpu_stats.cpu_usage.total_usage,
        system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        presystem_cpu: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
        online_cpus,
    })
}

/// Splits `repo[:tag]` so that an untagged pull fetches `latest` rather than
/// every tag. Digest references are passed through untouched.
fn split_image_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(offset) => {
            let split = last_segment_start + offset;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}
