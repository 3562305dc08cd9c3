//! WebSocket gateway: authenticated console relay, command injection and
//! stats polling over `/{route}/{instanceId}`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::UPGRADE;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command_channel::Delivery;
use crate::runtime_manager::InstanceManager;
use crate::stats_sampler::StatsSampler;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const POLICY_VIOLATION: u16 = 1008;

const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A frame queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Every open gateway connection, keyed by connection id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Uuid, OutboundSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, sender: OutboundSender) {
        self.connections.insert(id, sender);
    }

    pub fn deregister(&self, id: &Uuid) {
        self.connections.remove(id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queues a close frame on every connection. Returns how many accepted it.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut closed = 0;
        for entry in self.connections.iter() {
            let frame = Outbound::Close {
                code,
                reason: reason.to_string(),
            };
            if entry.value().send(frame).is_ok() {
                closed += 1;
            }
        }
        closed
    }
}

/// Shared state of all gateway connections.
pub struct Gateway {
    secret_digest: Vec<u8>,
    manager: InstanceManager,
    sampler: StatsSampler,
    registry: ConnectionRegistry,
    log_tail: usize,
    status_interval: Duration,
}

impl Gateway {
    pub fn new(
        secret: &str,
        manager: InstanceManager,
        sampler: StatsSampler,
        registry: ConnectionRegistry,
        log_tail: usize,
        status_interval: Duration,
    ) -> Self {
        Self {
            secret_digest: Sha256::digest(secret.as_bytes()).to_vec(),
            manager,
            sampler,
            registry,
            log_tail,
            status_interval,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn secret_matches(&self, candidate: &str) -> bool {
        Sha256::digest(candidate.as_bytes()).as_slice() == self.secret_digest.as_slice()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Per-socket protocol state. Dropping it cancels the connection's log relay
/// and stats timer and removes it from the registry.
pub struct Connection {
    id: Uuid,
    gateway: Arc<Gateway>,
    route: String,
    instance_id: Option<String>,
    authenticated: bool,
    tx: OutboundSender,
    relay: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        gateway: Arc<Gateway>,
        route: String,
        instance_id: Option<String>,
        tx: OutboundSender,
    ) -> Self {
        let id = Uuid::new_v4();
        gateway.registry.register(id, tx.clone());
        debug!("Gateway connection {} opened on /{}", id, route);

        Self {
            id,
            gateway,
            route,
            instance_id: instance_id.filter(|value| !value.is_empty()),
            authenticated: false,
            tx,
            relay: None,
            poller: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub async fn handle_text(&mut self, text: &str) -> Flow {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(_) => {
                self.send_error("Invalid JSON format");
                return Flow::Continue;
            }
        };

        let Some(instance_id) = self.instance_id.clone() else {
            self.send_error("Container ID is required in the URL");
            return self.close(POLICY_VIOLATION, "Container ID required");
        };

        let Some(event) = message.get("event").and_then(Value::as_str) else {
            self.send_error("Event is required");
            return self.close(POLICY_VIOLATION, "Event required");
        };

        if event == "auth" {
            let secret = message
                .get("args")
                .and_then(|args| args.get(0))
                .and_then(Value::as_str);

            match secret {
                Some(secret) if self.gateway.secret_matches(secret) => {
                    if !self.authenticated {
                        self.authenticated = true;
                        info!("Client authenticated for container {}", instance_id);
                        if self.dispatch(&instance_id) == Flow::Close {
                            return Flow::Close;
                        }
                    }
                }
                _ if !self.authenticated => return self.reject_unauthenticated(),
                _ => {}
            }
        } else if !self.authenticated {
            return self.reject_unauthenticated();
        }

        if event == "CMD" && self.route == "container" {
            match message.get("command").and_then(Value::as_str) {
                Some(command) => self.forward_command(&instance_id, command).await,
                None => self.send_error("Command is required"),
            }
        }

        Flow::Continue
    }

    /// Cancels relays and forgets authentication.
    pub fn shutdown(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.authenticated = false;
        self.gateway.registry.deregister(&self.id);
    }

    fn dispatch(&mut self, instance_id: &str) -> Flow {
        match self.route.as_str() {
            "container" => {
                self.relay = Some(self.spawn_log_relay(instance_id));
                Flow::Continue
            }
            "containerstatus" => {
                self.poller = Some(self.spawn_status_poller(instance_id));
                Flow::Continue
            }
            other => {
                let message = format!("Invalid route: {}", other);
                self.send_error(&message);
                self.close(POLICY_VIOLATION, "Invalid route")
            }
        }
    }

    fn spawn_log_relay(&self, instance_id: &str) -> JoinHandle<()> {
        let mut logs = self
            .gateway
            .manager
            .log_stream(instance_id, self.gateway.log_tail);
        let tx = self.tx.clone();
        let instance_id = instance_id.to_string();

        tokio::spawn(async move {
            debug!("Relaying logs of {}", instance_id);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if tx.send(Outbound::Text(text)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to attach to container {}: {}", instance_id, e);
                        let frame = json!({
                            "error": format!("Failed to attach to container {}: {}", instance_id, e)
                        });
                        let _ = tx.send(Outbound::Text(frame.to_string()));
                        break;
                    }
                }
            }
            debug!("Log relay for {} ended", instance_id);
        })
    }

    fn spawn_status_poller(&self, instance_id: &str) -> JoinHandle<()> {
        let sampler = self.gateway.sampler.clone();
        let period = self.gateway.status_interval;
        let tx = self.tx.clone();
        let instance_id = instance_id.to_string();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            // A slow sample must not be followed by a burst of catch-up frames.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if let Some(sample) = sampler.sample(&instance_id).await {
                    let frame = json!({ "event": "status", "data": sample.to_status_data() });
                    if tx.send(Outbound::Text(frame.to_string())).is_err() {
                        break;
                    }
                }
                interval.tick().await;
            }
        })
    }

    async fn forward_command(&self, instance_id: &str, command: &str) {
        info!("Command received for container {}: {}", instance_id, command);
        match self
            .gateway
            .manager
            .commands()
            .send_command(instance_id, command)
            .await
        {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::NotRunning) => {
                debug!("Dropped command for stopped container {}", instance_id)
            }
            Err(e) => warn!("Failed to send command to {}: {}", instance_id, e),
        }
    }

    fn reject_unauthenticated(&self) -> Flow {
        self.send_error("Authentication required");
        self.close(POLICY_VIOLATION, "Authentication required")
    }

    fn send_error(&self, message: &str) {
        let frame = json!({ "error": message });
        let _ = self.tx.send(Outbound::Text(frame.to_string()));
    }

    fn close(&self, code: u16, reason: &str) -> Flow {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        Flow::Close
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
        debug!("Gateway connection {} closed", self.id);
    }
}

/// Splits `/{route}/{instanceId}` into its first two segments. An empty or
/// absent id segment means no instance was named.
fn socket_target(path: &str) -> (String, Option<String>) {
    let mut segments = path.split('/').skip(1);
    let route = segments.next().unwrap_or_default().to_string();
    let instance_id = segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    (route, instance_id)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Hands every WebSocket upgrade to the gateway ahead of the panel routes.
/// Other requests pass through.
pub async fn dispatch_upgrades(
    State(gateway): State<Arc<Gateway>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let (route, instance_id) = socket_target(request.uri().path());
    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, gateway, route, instance_id))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(
    socket: WebSocket,
    gateway: Arc<Gateway>,
    route: String,
    instance_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(gateway, route, instance_id, tx);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                };
                if connection.handle_text(&text).await == Flow::Close {
                    break;
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    // Let queued frames, including a close, reach the socket.
    drop(connection);
    if !writer_done
        && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer)
            .await
            .is_err()
    {
        writer.abort();
    }
    debug!("WebSocket connection closed. Authentication reset.");
}
