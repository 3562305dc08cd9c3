use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub stats_log: StatsLogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub port: u16,
    /// Shared secret for WebSocket auth and HTTP basic auth.
    pub secret: String,
    #[serde(default = "default_auth_user")]
    pub auth_user: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Seconds to wait for in-flight HTTP requests during shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("secret", &"[REDACTED]")
            .field("auth_user", &self.auth_user)
            .field("remote", &self.remote)
            .field("version", &self.version)
            .field("environment", &self.environment)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_socket")]
    pub socket_path: String,
    #[serde(default = "default_true")]
    pub pull_on_start: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_docker_socket(),
            pull_on_start: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_volumes_root")]
    pub volumes_root: PathBuf,
    /// Where each instance volume is mounted inside its container.
    #[serde(default = "default_mount_path")]
    pub container_mount_path: String,
    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,
    /// Keyword of the `$KEYWORD(name)` template token.
    #[serde(default = "default_template_keyword")]
    pub template_keyword: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            volumes_root: default_volumes_root(),
            container_mount_path: default_mount_path(),
            stats_path: default_stats_path(),
            template_keyword: default_template_keyword(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_log_tail")]
    pub log_tail_lines: usize,
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_tail_lines: default_log_tail(),
            status_interval_ms: default_status_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsLogConfig {
    #[serde(default = "default_stats_interval")]
    pub interval_secs: u64,
}

impl Default for StatsLogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl AgentConfig {
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    pub fn from_env() -> Result<Self, String> {
        let port = env_var(&["PORT", "port"])
            .map(|value| {
                value
                    .parse::<u16>()
                    .map_err(|e| format!("Invalid PORT '{}': {}", value, e))
            })
            .transpose()?
            .unwrap_or(3002);

        Ok(Self {
            server: ServerConfig {
                bind_address: env_var(&["BIND_ADDRESS"]).unwrap_or_else(default_bind_address),
                port,
                secret: env_var(&["KEY", "key"]).ok_or_else(|| "KEY not set".to_string())?,
                auth_user: env_var(&["AUTH_USER"]).unwrap_or_else(default_auth_user),
                remote: env_var(&["REMOTE", "remote"]).unwrap_or_else(default_remote),
                version: env_var(&["VERSION", "version"]).unwrap_or_else(default_version),
                environment: env_var(&["ENVIRONMENT", "environment"])
                    .unwrap_or_else(default_environment),
                drain_timeout_secs: default_drain_timeout(),
            },
            docker: DockerConfig {
                socket_path: env_var(&["DOCKER_SOCKET"]).unwrap_or_else(default_docker_socket),
                ..DockerConfig::default()
            },
            storage: StorageConfig {
                volumes_root: env_var(&["VOLUMES_ROOT"])
                    .map(PathBuf::from)
                    .unwrap_or_else(default_volumes_root),
                ..StorageConfig::default()
            },
            gateway: GatewayConfig::default(),
            stats_log: StatsLogConfig::default(),
            logging: LoggingConfig {
                level: env_var(&["LOG_LEVEL"]).unwrap_or_else(|| "info".to_string()),
                format: env_var(&["LOG_FORMAT"]).unwrap_or_else(|| "plain".to_string()),
            },
        })
    }
}

fn env_var(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok())
        .filter(|value| !value.is_empty())
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_auth_user() -> String {
    "Airlink".to_string()
}

fn default_remote() -> String {
    "localhost".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_drain_timeout() -> u64 {
    10
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    120
}

fn default_volumes_root() -> PathBuf {
    PathBuf::from("volumes")
}

fn default_mount_path() -> String {
    "/app/data".to_string()
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("storage/systemStats.json")
}

fn default_template_keyword() -> String {
    "ALVKT".to_string()
}

fn default_log_tail() -> usize {
    100
}

fn default_status_interval() -> u64 {
    2000
}

fn default_stats_interval() -> u64 {
    60
}
