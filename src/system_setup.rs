use std::path::Path;

use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::engine::ContainerEngine;
use crate::{AgentError, AgentResult};

/// Outcome of the startup checks. Nothing here is fatal; the agent keeps
/// serving and later requests surface the concrete failure.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct SystemSetup;

impl SystemSetup {
    /// Verify the host is ready to run instances
    pub async fn initialize(config: &AgentConfig, engine: &dyn ContainerEngine) -> PreflightReport {
        info!("🚀 Starting system initialization...");
        let mut report = PreflightReport::default();

        match engine.ping().await {
            Ok(()) => info!("✓ Container engine reachable at {}", config.docker.socket_path),
            Err(e) => report.warnings.push(format!(
                "Container engine not reachable at {}: {}",
                config.docker.socket_path, e
            )),
        }

        let volumes_root = config.storage.volumes_root.as_path();
        match Self::ensure_directory(volumes_root).await {
            Ok(()) => info!("✓ Volumes root ready: {}", volumes_root.display()),
            Err(e) => report.warnings.push(e.to_string()),
        }

        if let Some(stats_dir) = config
            .storage
            .stats_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            if let Err(e) = Self::ensure_directory(stats_dir).await {
                report.warnings.push(e.to_string());
            }
        }

        for warning in &report.warnings {
            warn!("System setup warning: {}", warning);
        }
        if report.is_clean() {
            info!("✅ System initialization complete!");
        }
        report
    }

    async fn ensure_directory(path: &Path) -> AgentResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            AgentError::FileSystemError(format!("Failed to create {}: {}", path.display(), e))
        })
    }
}
