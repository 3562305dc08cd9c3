use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

mod command_channel;
mod config;
mod engine;
mod errors;
mod file_manager;
mod http_api;
mod instance;
mod runtime_manager;
mod shutdown;
mod stats_log;
mod stats_sampler;
mod system_setup;
mod websocket_handler;

pub use config::AgentConfig;
pub use errors::{AgentError, AgentResult};

use engine::{BollardEngine, ContainerEngine};
use file_manager::FileManager;
use http_api::{AppState, BasicCredentials, CoreInfo};
use instance::{EnvTransforms, HostPlatform, TemplateResolver};
use runtime_manager::InstanceManager;
use shutdown::{ListenerHandle, ShutdownCoordinator, ShutdownTrigger};
use stats_log::StatsLog;
use stats_sampler::StatsSampler;
use system_setup::SystemSetup;
use websocket_handler::{ConnectionRegistry, Gateway};

/// Fleet Agent - Main application state
pub struct FleetAgent {
    pub config: Arc<AgentConfig>,
    pub engine: Arc<dyn ContainerEngine>,
    pub manager: InstanceManager,
    pub stats_log: Arc<StatsLog>,
    pub resolver: TemplateResolver,
    pub gateway: Arc<Gateway>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl FleetAgent {
    pub async fn new(config: AgentConfig) -> AgentResult<Self> {
        info!("Initializing Fleet Agent");

        let config = Arc::new(config);
        let engine: Arc<dyn ContainerEngine> = Arc::new(BollardEngine::connect(&config.docker)?);
        let files = Arc::new(FileManager::new(config.storage.volumes_root.clone())?);

        let manager = InstanceManager::new(
            engine.clone(),
            files.clone(),
            EnvTransforms::builtin(HostPlatform::detect()),
            config.storage.container_mount_path.clone(),
            config.docker.pull_on_start,
        );

        let stats_log = Arc::new(StatsLog::open(config.storage.stats_path.clone()).await?);
        let resolver = TemplateResolver::new(&config.storage.template_keyword)?;

        let registry = ConnectionRegistry::new();
        let gateway = Arc::new(Gateway::new(
            &config.server.secret,
            manager.clone(),
            StatsSampler::new(engine.clone(), files),
            registry.clone(),
            config.gateway.log_tail_lines,
            Duration::from_millis(config.gateway.status_interval_ms),
        ));

        let shutdown = Arc::new(ShutdownCoordinator::new(
            registry,
            stats_log.clone(),
            engine.clone(),
            Duration::from_secs(config.server.drain_timeout_secs),
        ));

        Ok(Self {
            config,
            engine,
            manager,
            stats_log,
            resolver,
            gateway,
            shutdown,
        })
    }

    /// Serves until a shutdown signal or a server fault, then returns the
    /// process exit code.
    pub async fn run(&self) -> AgentResult<i32> {
        info!("Starting Fleet Agent");

        let state = AppState {
            manager: self.manager.clone(),
            stats_log: self.stats_log.clone(),
            resolver: self.resolver.clone(),
            info: CoreInfo::from_config(&self.config),
            credentials: Arc::new(BasicCredentials::new(
                &self.config.server.auth_user,
                &self.config.server.secret,
            )),
        };
        let app = http_api::router(state, self.gateway.clone());

        let addr = format!("{}:{}", self.config.server.bind_address, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            AgentError::NetworkError(format!("Failed to bind {}: {}", addr, e))
        })?;
        info!("HTTP server listening on {}", addr);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (fault_tx, mut fault_rx) = mpsc::channel::<String>(1);
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = &result {
                let _ = fault_tx.send(e.to_string()).await;
            }
            result
        });
        self.shutdown
            .attach_listener(ListenerHandle::new(stop_tx, server));

        // Capture a snapshot at startup, then one per interval
        let stats_log = self.stats_log.clone();
        let period = Duration::from_secs(self.config.stats_log.interval_secs.max(1));
        let stats_task = tokio::spawn(async move { stats_log.run(period).await });

        let trigger = tokio::select! {
            signal = wait_for_signal() => {
                info!("Received {}", signal);
                ShutdownTrigger::Signal(signal)
            }
            reason = fault_rx.recv() => {
                error!(
                    "HTTP server failed: {}",
                    reason.unwrap_or_else(|| "exited unexpectedly".to_string())
                );
                ShutdownTrigger::Fault
            }
        };
        stats_task.abort();

        let repeat_signals = tokio::spawn(async {
            loop {
                let signal = wait_for_signal().await;
                warn!("Received {} while shutting down; ignoring", signal);
            }
        });

        let code = match self.shutdown.run(trigger).await {
            Some(report) => {
                info!(
                    "Shutdown complete: {} connections closed, failed steps: {:?}, engine reachable: {}",
                    report.connections_closed, report.failed_steps, report.engine_reachable
                );
                report.exit_code()
            }
            None => 1,
        };
        repeat_signals.abort();

        Ok(code)
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

#[tokio::main]
async fn main() -> AgentResult<()> {
    let mut config_path: Option<String> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next();
        }
    }

    let config_path = config_path.as_deref().unwrap_or("./config.toml");
    // Load config first so logging level/format can be applied.
    let config = AgentConfig::from_file(config_path)
        .or_else(|_| AgentConfig::from_file("/etc/fleet-agent/config.toml"))
        .or_else(|_| AgentConfig::from_env())
        .map_err(AgentError::ConfigError)?;

    let filter = format!("fleet_agent={},tower_http=info", config.logging.level);
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Fleet Agent starting");
    info!("Configuration loaded: {:?}", config);

    let agent = FleetAgent::new(config).await?;

    info!("Running system setup checks...");
    let preflight = SystemSetup::initialize(&agent.config, agent.engine.as_ref()).await;
    if !preflight.is_clean() {
        warn!("Continuing despite {} setup warnings", preflight.warnings.len());
    }

    let code = agent.run().await?;
    info!("Fleet Agent stopped with exit code {}", code);
    std::process::exit(code);
}
