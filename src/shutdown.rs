use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::ContainerEngine;
use crate::stats_log::StatsLog;
use crate::websocket_handler::{ConnectionRegistry, NORMAL_CLOSURE};
use crate::AgentResult;

/// Persists one last host snapshot while the agent shuts down.
#[async_trait]
pub trait FinalSnapshot: Send + Sync {
    async fn record_final(&self) -> AgentResult<()>;
}

#[async_trait]
impl FinalSnapshot for StatsLog {
    async fn record_final(&self) -> AgentResult<()> {
        self.record_current().await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal(&'static str),
    /// The HTTP server task failed.
    Fault,
}

/// The running HTTP server and the switch that starts its graceful drain.
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
    server: JoinHandle<std::io::Result<()>>,
}

impl ListenerHandle {
    pub fn new(stop: watch::Sender<bool>, server: JoinHandle<std::io::Result<()>>) -> Self {
        Self { stop, server }
    }
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    pub connections_closed: usize,
    pub failed_steps: Vec<&'static str>,
    pub engine_reachable: bool,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> i32 {
        if self.trigger == ShutdownTrigger::Fault || !self.failed_steps.is_empty() {
            1
        } else {
            0
        }
    }
}

pub struct ShutdownCoordinator {
    in_progress: AtomicBool,
    registry: ConnectionRegistry,
    snapshot: Arc<dyn FinalSnapshot>,
    engine: Arc<dyn ContainerEngine>,
    listener: Mutex<Option<ListenerHandle>>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        registry: ConnectionRegistry,
        snapshot: Arc<dyn FinalSnapshot>,
        engine: Arc<dyn ContainerEngine>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            registry,
            snapshot,
            engine,
            listener: Mutex::new(None),
            drain_timeout,
        }
    }

    pub fn attach_listener(&self, listener: ListenerHandle) {
        *self.listener.lock() = Some(listener);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Runs the shutdown sequence once. Later triggers get `None`.
    pub async fn run(&self, trigger: ShutdownTrigger) -> Option<ShutdownReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Shutdown already in progress; ignoring {:?}", trigger);
            return None;
        }

        info!("Shutting down ({:?})", trigger);
        let mut failed_steps = Vec::new();

        let connections_closed = self
            .registry
            .close_all(NORMAL_CLOSURE, "Server shutting down");
        info!("Closed {} WebSocket connections", connections_closed);

        match self.snapshot.record_final().await {
            Ok(()) => info!("Final system stats saved"),
            Err(e) => {
                error!("Failed to save final system stats: {}", e);
                failed_steps.push("stats snapshot");
            }
        }

        if let Err(reason) = self.close_listener().await {
            error!("Failed to close HTTP listener: {}", reason);
            failed_steps.push("http listener");
        }

        let engine_reachable = match self.engine.ping().await {
            Ok(()) => {
                info!("Container engine reachable");
                true
            }
            Err(e) => {
                warn!("Container engine not reachable during shutdown: {}", e);
                false
            }
        };

        Some(ShutdownReport {
            trigger,
            connections_closed,
            failed_steps,
            engine_reachable,
        })
    }

    async fn close_listener(&self) -> Result<(), String> {
        let listener = self.listener.lock().take();
        let Some(listener) = listener else {
            return Ok(());
        };
        let ListenerHandle { stop, mut server } = listener;

        // The server may already have exited.
        let _ = stop.send(true);

        match tokio::time::timeout(self.drain_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => {
                info!("HTTP listener closed");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("server task failed: {}", e)),
            Err(_) => {
                server.abort();
                Err(format!(
                    "in-flight requests did not drain within {:?}",
                    self.drain_timeout
                ))
            }
        }
    }
}
