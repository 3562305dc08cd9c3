//! Console command injection and host-side interactive attach.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::engine::{AttachOptions, ByteStream, ContainerEngine};
use crate::{AgentError, AgentResult};

/// How long command output is drained before the attach is released.
const COMMAND_DRAIN_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The container was absent or stopped; nothing was written.
    NotRunning,
}

#[derive(Clone)]
pub struct CommandChannel {
    engine: Arc<dyn ContainerEngine>,
}

impl CommandChannel {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    async fn is_running(&self, id: &str) -> AgentResult<bool> {
        Ok(self
            .engine
            .inspect(id)
            .await?
            .map(|state| state.running)
            .unwrap_or(false))
    }

    /// Writes `command` followed by a newline to the container's stdin.
    /// Resolves once the write is flushed; the process's reaction is not awaited.
    pub async fn send_command(&self, id: &str, command: &str) -> AgentResult<Delivery> {
        if !self.is_running(id).await? {
            warn!("Container {} is not running; command not delivered", id);
            return Ok(Delivery::NotRunning);
        }

        let io = self.engine.attach(id, AttachOptions::command()).await?;
        let mut input = io.input;

        let line = format!("{}\n", command);
        let written = async {
            input.write_all(line.as_bytes()).await?;
            input.flush().await?;
            input.shutdown().await
        }
        .await;
        written.map_err(|e| {
            AgentError::ContainerError(format!("Failed to write command to {}: {}", id, e))
        })?;

        debug!("Command sent to {}: {}", id, command);
        tokio::spawn(drain(id.to_string(), io.output, Some(COMMAND_DRAIN_WINDOW)));

        Ok(Delivery::Delivered)
    }

    /// Attaches stdin/stdout/stderr and mirrors the container output onto the
    /// agent's own stdout until the container stream ends.
    pub async fn attach_interactive(&self, id: &str) -> AgentResult<Delivery> {
        if !self.is_running(id).await? {
            warn!("Container {} is not running; not attaching", id);
            return Ok(Delivery::NotRunning);
        }

        let io = self.engine.attach(id, AttachOptions::interactive()).await?;
        info!("Attached to container {}", id);

        let id = id.to_string();
        tokio::spawn(async move {
            // Holding the input keeps the attach session open.
            let _input = io.input;
            let mut output = io.output;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        if stdout.write_all(&bytes).await.is_err() {
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(e) => {
                        warn!("Attach stream error for {}: {}", id, e);
                        break;
                    }
                }
            }
            info!("Attach stream for {} ended", id);
        });

        Ok(Delivery::Delivered)
    }
}

async fn drain(id: String, mut output: ByteStream, window: Option<Duration>) {
    let consume = async {
        while let Some(chunk) = output.next().await {
            if let Err(e) = chunk {
                warn!("Command stream error for {}: {}", id, e);
                return;
            }
        }
        debug!("Command stream for {} ended", id);
    };

    match window {
        Some(window) => {
            if tokio::time::timeout(window, consume).await.is_err() {
                debug!("Released command attach for {}", id);
            }
        }
        None => consume.await,
    }
}
