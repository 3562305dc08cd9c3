//! Panel-facing HTTP surface.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::command_channel::Delivery;
use crate::config::AgentConfig;
use crate::instance::{
    validate_instance_id, EnvironmentMap, InstanceSpec, PortBindings, TemplateResolver, START_KEY,
};
use crate::runtime_manager::{InstanceManager, StopOutcome};
use crate::stats_log::StatsLog;
use crate::websocket_handler::{self, Gateway};
use crate::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreInfo {
    pub version_family: u8,
    pub version_release: String,
    pub status: &'static str,
    pub remote: String,
}

impl CoreInfo {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            version_family: 1,
            version_release: format!("Airlink {}", config.server.version),
            status: "Online",
            remote: config.server.remote.clone(),
        }
    }
}

/// Basic-auth user and shared secret, held as digests.
pub struct BasicCredentials {
    user: String,
    secret_digest: Vec<u8>,
}

impl BasicCredentials {
    pub fn new(user: &str, secret: &str) -> Self {
        Self {
            user: user.to_string(),
            secret_digest: Sha256::digest(secret.as_bytes()).to_vec(),
        }
    }

    fn matches(&self, user: &str, password: &str) -> bool {
        let password_ok =
            Sha256::digest(password.as_bytes()).as_slice() == self.secret_digest.as_slice();
        password_ok && user == self.user
    }
}

#[derive(Clone)]
pub struct AppState {
    pub manager: InstanceManager,
    pub stats_log: Arc<StatsLog>,
    pub resolver: TemplateResolver,
    pub info: CoreInfo,
    pub credentials: Arc<BasicCredentials>,
}

pub fn router(state: AppState, gateway: Arc<Gateway>) -> Router {
    let api = Router::new()
        .route("/", get(core_info))
        .route("/stats", get(stats_history))
        .route("/container/start", post(start_container))
        .route("/container/stop", post(stop_container))
        .route("/container/kill", delete(kill_container))
        .route("/container/delete", delete(delete_container))
        .route("/container/command", post(send_command))
        .route("/container/attach", post(attach_container))
        .route("/container/installer", post(run_installer))
        .route("/container/install", post(install_container))
        .route_layer(middleware::from_fn_with_state(
            state.credentials.clone(),
            require_basic_auth,
        ))
        .fallback(route_not_found)
        .with_state(state);

    api.layer(middleware::from_fn_with_state(
        gateway,
        websocket_handler::dispatch_upgrades,
    ))
    .layer(TraceLayer::new_for_http())
}

async fn route_not_found() -> AgentError {
    AgentError::NotFound("Route not found".to_string())
}

async fn require_basic_auth(
    State(credentials): State<Arc<BasicCredentials>>,
    request: Request,
    next: Next,
) -> Response {
    let supplied = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic);

    match supplied {
        Some((user, password)) => {
            debug!("Login attempt: username = {}", user);
            if credentials.matches(&user, &password) {
                return next.run(request).await;
            }
            warn!("Rejected credentials for user {}", user);
        }
        None => debug!("Login attempt: no Authorization header provided"),
    }

    let mut response =
        AgentError::Unauthorized("Valid credentials are required".to_string()).into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"fleet-agent\""),
    );
    response
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> AgentResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AgentError::InvalidRequest(rejection.body_text()))
}

/// Returns the trimmed value, or an `InvalidRequest` carrying `message`.
fn required(value: Option<String>, message: &str) -> AgentResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AgentError::InvalidRequest(message.to_string())),
    }
}

fn required_id(id: Option<String>) -> AgentResult<String> {
    let id = required(id, "Container ID is required.")?;
    validate_instance_id(&id)?;
    Ok(id)
}

/// Accepts JSON numbers and numeric strings.
fn lenient_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn message(text: String) -> Json<Value> {
    Json(json!({ "message": text }))
}

async fn core_info(State(state): State<AppState>) -> Json<CoreInfo> {
    Json(state.info.clone())
}

async fn stats_history(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.stats_log.history().await))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    id: Option<String>,
    image: Option<String>,
    #[serde(default)]
    ports: Value,
    #[serde(default)]
    env: Value,
    #[serde(rename = "Memory")]
    memory: Option<Value>,
    #[serde(rename = "Cpu")]
    cpu: Option<Value>,
    #[serde(rename = "StartCommand")]
    start_command: Option<String>,
}

async fn start_container(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let request = parse_body(payload)?;
    let (id, image) = match (
        required(request.id, "").ok(),
        required(request.image, "").ok(),
    ) {
        (Some(id), Some(image)) => (id, image),
        _ => {
            return Err(AgentError::InvalidRequest(
                "Container ID and Image are required.".to_string(),
            ))
        }
    };
    validate_instance_id(&id)?;

    let mut env = EnvironmentMap::from_json(&request.env);
    if let Some(template) = request.start_command {
        let resolved = state.resolver.resolve(&template, &env);
        if !resolved.is_empty() {
            env.insert(START_KEY, resolved);
        }
    }

    let ports = match &request.ports {
        Value::String(ports) => PortBindings::parse(ports),
        Value::Null => PortBindings::default(),
        other => PortBindings::parse(&other.to_string()),
    };

    let spec = InstanceSpec {
        id: id.clone(),
        image,
        env,
        ports,
        memory_mib: lenient_number(request.memory.as_ref())
            .filter(|mib| *mib > 0.0)
            .map(|mib| mib as u64),
        cpu_count: lenient_number(request.cpu.as_ref()),
    };

    state.manager.start(spec).await?;
    Ok(message(format!("Container {} started successfully.", id)))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    id: Option<String>,
    #[serde(rename = "stopCmd")]
    stop_cmd: Option<String>,
}

async fn stop_container(
    State(state): State<AppState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let request = parse_body(payload)?;
    let id = required_id(request.id)?;

    let text = match state.manager.stop(&id, request.stop_cmd.as_deref()).await? {
        StopOutcome::Stopped => format!("Container {} stopped successfully.", id),
        StopOutcome::NotRunning => format!("Container {} is not running.", id),
    };
    Ok(message(text))
}

#[derive(Debug, Deserialize)]
struct IdRequest {
    id: Option<String>,
}

async fn kill_container(
    State(state): State<AppState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let id = required_id(parse_body(payload)?.id)?;
    state.manager.kill(&id).await?;
    Ok(message(format!("Container {} killed successfully.", id)))
}

async fn delete_container(
    State(state): State<AppState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> AgentResult<Response> {
    let id = required_id(parse_body(payload)?.id)?;
    let report = state.manager.delete_and_purge(&id).await?;

    if report.is_success() {
        Ok(Json(json!({
            "message": format!("Container {} deleted successfully.", id),
            "result": report,
        }))
        .into_response())
    } else {
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Failed to delete container {}.", id),
                "result": report,
            })),
        )
            .into_response())
    }
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    id: Option<String>,
    command: Option<String>,
}

async fn send_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let request = parse_body(payload)?;
    let (id, command) = match (
        request.id.filter(|id| !id.is_empty()),
        request.command.filter(|c| !c.is_empty()),
    ) {
        (Some(id), Some(command)) => (id, command),
        _ => {
            return Err(AgentError::InvalidRequest(
                "Container ID and Command are required.".to_string(),
            ))
        }
    };
    validate_instance_id(&id)?;

    let text = match state.manager.commands().send_command(&id, &command).await? {
        Delivery::Delivered => format!("Command sent to container {}: {}", id, command),
        Delivery::NotRunning => {
            format!("Container {} is not running; command not delivered.", id)
        }
    };
    Ok(message(text))
}

async fn attach_container(
    State(state): State<AppState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let id = required_id(parse_body(payload)?.id)?;

    let text = match state.manager.commands().attach_interactive(&id).await? {
        Delivery::Delivered => format!("Attached to container {}.", id),
        Delivery::NotRunning => format!("Container {} is not running.", id),
    };
    Ok(message(text))
}

#[derive(Debug, Deserialize)]
struct InstallerRequest {
    id: Option<String>,
    script: Option<String>,
    container: Option<String>,
    #[serde(default)]
    env: Value,
}

async fn run_installer(
    State(state): State<AppState>,
    payload: Result<Json<InstallerRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let request = parse_body(payload)?;
    let id = required_id(request.id)?;
    let (script, image) = match (
        request.script.filter(|s| !s.trim().is_empty()),
        request.container.filter(|c| !c.trim().is_empty()),
    ) {
        (Some(script), Some(image)) => (script, image),
        _ => {
            return Err(AgentError::InvalidRequest(
                "Script and Container are required.".to_string(),
            ))
        }
    };

    let env = EnvironmentMap::from_json(&request.env);
    state.manager.provision_volume(&id).await?;
    state
        .manager
        .create_one_shot(&id, &image, &script, env)
        .await?;

    Ok(message(format!("Container {} installed successfully.", id)))
}

#[derive(Debug, Deserialize)]
struct InstallScript {
    url: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    #[serde(rename = "ALVKT", default)]
    resolve_tokens: bool,
}

#[derive(Debug, Deserialize)]
struct InstallRequest {
    id: Option<String>,
    #[serde(default)]
    scripts: Vec<Value>,
    #[serde(default)]
    env: Value,
}

async fn install_container(
    State(state): State<AppState>,
    payload: Result<Json<InstallRequest>, JsonRejection>,
) -> AgentResult<Json<Value>> {
    let request = parse_body(payload)?;
    let id = required_id(request.id)?;
    let env = EnvironmentMap::from_json(&request.env);
    let files = state.manager.files().clone();

    files.provision_volume(&id).await?;

    for entry in request.scripts {
        let script: InstallScript = match serde_json::from_value(entry.clone()) {
            Ok(script) => script,
            Err(_) => {
                warn!("Invalid script entry: {}", entry);
                continue;
            }
        };
        let (Some(url), Some(file_name)) = (script.url, script.file_name) else {
            warn!("Invalid script entry: {}", entry);
            continue;
        };

        let resolved_url = state.resolver.resolve(&url, &env);
        if resolved_url.is_empty() {
            warn!("Failed to resolve URL for script: {}", entry);
            continue;
        }

        let templating = script
            .resolve_tokens
            .then_some((&state.resolver, &env));
        files
            .download(&id, &resolved_url, &file_name, templating)
            .await?;
        info!("Downloaded {} from {} for container {}", file_name, resolved_url, id);
    }

    files.write_install_marker(&id).await?;
    Ok(message(format!("Container {} installed successfully.", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingEngine;
    use crate::file_manager::FileManager;
    use crate::instance::{EnvTransforms, HostPlatform};
    use crate::stats_sampler::StatsSampler;
    use crate::websocket_handler::ConnectionRegistry;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    struct TestApp {
        dir: TempDir,
        engine: RecordingEngine,
        router: Router,
    }

    async fn test_app(engine: RecordingEngine) -> TestApp {
        let dir = TempDir::new().unwrap();
        let files = Arc::new(FileManager::new(dir.path().join("volumes")).unwrap());
        let manager = InstanceManager::new(
            Arc::new(engine.clone()),
            files.clone(),
            EnvTransforms::builtin(HostPlatform::Linux),
            "/app/data".to_string(),
            true,
        );
        let stats_log = Arc::new(
            StatsLog::open(dir.path().join("storage").join("systemStats.json"))
                .await
                .unwrap(),
        );
        let gateway = Arc::new(Gateway::new(
            SECRET,
            manager.clone(),
            StatsSampler::new(Arc::new(engine.clone()), files),
            ConnectionRegistry::new(),
            100,
            Duration::from_secs(2),
        ));
        let state = AppState {
            manager,
            stats_log,
            resolver: TemplateResolver::new("ALVKT").unwrap(),
            info: CoreInfo {
                version_family: 1,
                version_release: "Airlink 1.0.0".to_string(),
                status: "Online",
                remote: "panel.example.com".to_string(),
            },
            credentials: Arc::new(BasicCredentials::new("Airlink", SECRET)),
        };

        TestApp {
            dir,
            engine,
            router: router(state, gateway),
        }
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
    }

    fn request(method: &str, uri: &str, body: Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, basic("Airlink", SECRET))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &TestApp, request: axum::http::Request<Body>) -> (StatusCode, Value) {
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_missing_credentials_get_challenge() {
        let app = test_app(RecordingEngine::default()).await;
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let app = test_app(RecordingEngine::default()).await;
        let request = axum::http::Request::builder()
            .uri("/")
            .header(AUTHORIZATION, basic("Airlink", "nope"))
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_core_info() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(&app, request("GET", "/", Value::Null)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "versionFamily": 1,
                "versionRelease": "Airlink 1.0.0",
                "status": "Online",
                "remote": "panel.example.com",
            })
        );
    }

    #[tokio::test]
    async fn test_stats_history_is_a_list() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(&app, request("GET", "/stats", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_array());
    }

    #[tokio::test]
    async fn test_start_requires_id_and_image() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(
            &app,
            request("POST", "/container/start", json!({ "id": "mc-1" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("Container ID and Image are required."));
        assert!(app.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = test_app(RecordingEngine::default()).await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/container/stop")
            .header(AUTHORIZATION, basic("Airlink", SECRET))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{\"id\":"))
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unsafe_id_is_bad_request() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, _) = send(
            &app,
            request("DELETE", "/container/delete", json!({ "id": "../../etc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_resolves_start_command_template() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/container/start",
                json!({
                    "id": "mc-1",
                    "image": "paper:1.21",
                    "ports": "25565:25565,bad",
                    "env": { "SERVER_JAR": "paper.jar", "MEMORY": 2048 },
                    "Memory": "2048",
                    "Cpu": 2,
                    "StartCommand": "java -Xmx$ALVKT(MEMORY)M -jar $ALVKT(SERVER_JAR)",
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Container mc-1 started successfully.");

        let container = app.engine.container("mc-1").unwrap();
        assert!(container.running);
        assert_eq!(
            container.spec.env,
            vec![
                "SERVER_JAR=paper.jar",
                "MEMORY=2048",
                "START=java -Xmx2048M -jar paper.jar",
            ]
        );
        assert_eq!(container.spec.ports.len(), 1);
        assert_eq!(container.spec.memory_bytes, Some(2048 * 1024 * 1024));
        assert_eq!(container.spec.nano_cpus, Some(2_000_000_000));
    }

    #[tokio::test]
    async fn test_stop_absent_container_is_ok() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(
            &app,
            request("POST", "/container/stop", json!({ "id": "mc-1", "stopCmd": "stop" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Container mc-1 is not running.");
        assert_eq!(app.engine.calls(), vec!["inspect:mc-1"]);
    }

    #[tokio::test]
    async fn test_command_reports_delivery() {
        let engine = RecordingEngine::default().with_container("mc-1", "paper", true);
        let app = test_app(engine).await;

        let (status, body) = send(
            &app,
            request("POST", "/container/command", json!({ "id": "mc-1", "command": "list" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Command sent to container mc-1: list");

        let (status, body) = send(
            &app,
            request("POST", "/container/command", json!({ "id": "mc-2", "command": "list" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            "Container mc-2 is not running; command not delivered."
        );
    }

    #[tokio::test]
    async fn test_kill_and_delete() {
        let engine = RecordingEngine::default().with_container("mc-1", "paper", true);
        let app = test_app(engine).await;
        std::fs::create_dir_all(app.dir.path().join("volumes").join("mc-1")).unwrap();

        let (status, _) = send(&app, request("DELETE", "/container/kill", json!({ "id": "mc-1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.engine.container("mc-1").is_none());

        let (status, body) =
            send(&app, request("DELETE", "/container/delete", json!({ "id": "mc-1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["containerRemoved"], false);
        assert_eq!(body["result"]["volumeRemoved"], true);
        assert!(!app.dir.path().join("volumes").join("mc-1").exists());
    }

    #[tokio::test]
    async fn test_installer_requires_script_and_container() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, _) = send(
            &app,
            request("POST", "/container/installer", json!({ "id": "mc-1", "script": "echo" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request(
                "POST",
                "/container/installer",
                json!({ "id": "mc-1", "script": "echo ok", "container": "alpine:3" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.engine.container("installer-mc-1").is_some());
        assert!(app.dir.path().join("volumes").join("mc-1").is_dir());
    }

    #[tokio::test]
    async fn test_install_without_scripts_writes_marker() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/container/install",
                json!({ "id": "mc-1", "scripts": [{ "url": "" }, 5] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let marker = app
            .dir
            .path()
            .join("volumes")
            .join("mc-1")
            .join(crate::file_manager::INSTALL_MARKER_PATH);
        assert!(marker.is_file());
    }

    #[tokio::test]
    async fn test_socket_upgrade_wins_over_panel_routes() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as ClientMessage;

        let engine = RecordingEngine::default().with_container("start", "paper", true);
        engine.set_logs("start", &["Done (3.2s)!"]);
        let app = test_app(engine).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/container/start", addr))
                .await
                .unwrap();
        socket
            .send(ClientMessage::Text(
                json!({ "event": "auth", "args": [SECRET] }).to_string().into(),
            ))
            .await
            .unwrap();

        let Some(Ok(ClientMessage::Text(line))) = socket.next().await else {
            panic!("expected a log frame");
        };
        assert_eq!(line.as_str(), "Done (3.2s)!\n");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = test_app(RecordingEngine::default()).await;
        let (status, body) = send(&app, request("GET", "/container/mc-1", Value::Null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
