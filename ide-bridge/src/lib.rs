pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;
pub mod telemetry;

pub use adapters::{DiscoveryRecord, DiscoveryStore, FsEditorAdapter, IdeInfo};
pub use app::editor::EditorHandle;
pub use app::session::SessionRegistry;
pub use domain::session::{AuthToken, SessionId};
pub use ports::EditorPort;

use adapters::discovery::store::{parent_process_id, process_ids};
use anyhow::{Context, Result as AnyResult};
use app::context::ContextBroadcaster;
use app::diff::{DiffReviewService, PendingDiffView};
use app::editor::{spawn_editor_loop, EditorLoop, EditorLoopConfig};
use app::rpc::{DispatcherConfig, RpcDispatcher};
use app::session::session_event_stream;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use domain::context::SnapshotLimits;
use domain::session::CloseReason;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Settings {
    /// Port `0` reuses the remembered sticky port, or lets the OS pick.
    pub listen: SocketAddr,
    pub workspace: Vec<PathBuf>,
    pub discovery_dir: PathBuf,
    pub discovery_prefix: String,
    pub publish_discovery: bool,
    pub ide_name: String,
    pub ide_display_name: String,
    pub tool_namespace: String,
    pub auth_token: Option<String>,
    pub session_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub blocking_diff_timeout: Duration,
    pub context_debounce: Duration,
    pub client_ready_delay: Duration,
    pub max_open_files: usize,
    pub max_selection_bytes: usize,
    pub active_file_boost_ms: i64,
    pub otlp_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            workspace: env::current_dir().map(|dir| vec![dir]).unwrap_or_default(),
            discovery_dir: env::temp_dir().join("ide-bridge").join("ide"),
            discovery_prefix: "ide-bridge-server".to_string(),
            publish_discovery: true,
            ide_name: "ide-bridge".to_string(),
            ide_display_name: "IDE Bridge".to_string(),
            tool_namespace: "ide".to_string(),
            auth_token: None,
            session_queue_capacity: 100,
            heartbeat_interval: Duration::from_secs(1),
            blocking_diff_timeout: Duration::from_secs(600),
            context_debounce: Duration::from_millis(500),
            client_ready_delay: Duration::from_secs(1),
            max_open_files: 10,
            max_selection_bytes: 1024,
            active_file_boost_ms: 1000,
            otlp_endpoint: None,
        }
    }
}

impl Settings {
    /// Apply `IDE_BRIDGE_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(token) = read("IDE_BRIDGE_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(dir) = read("IDE_BRIDGE_DISCOVERY_DIR") {
            self.discovery_dir = PathBuf::from(dir);
        }
        if let Some(raw) = read("IDE_BRIDGE_BLOCKING_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.blocking_diff_timeout = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid IDE_BRIDGE_BLOCKING_TIMEOUT_SECS"),
            }
        }
        if let Some(flag) = read("IDE_BRIDGE_DISCOVERY") {
            self.publish_discovery = !is_disabled_flag(&flag);
        }
        self
    }

    fn snapshot_limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            max_files: self.max_open_files,
            max_selection_bytes: self.max_selection_bytes,
            active_boost_ms: self.active_file_boost_ms,
        }
    }
}

fn is_disabled_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "disable" | "disabled"
    )
}

#[derive(Clone)]
struct AppState {
    token: Arc<AuthToken>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<RpcDispatcher>,
    diffs: Arc<DiffReviewService>,
    editor: EditorHandle,
    listen: SocketAddr,
    heartbeat: Duration,
}

impl AppState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        self.token.verify_header(header).map_err(|err| {
            warn!(%err, "rejecting unauthenticated request");
            ApiError::unauthorized("unauthorized", err.to_string())
        })
    }

    fn endpoint_url(&self, session_id: &SessionId) -> String {
        endpoint_url(self.listen, session_id)
    }
}

fn endpoint_url(listen: SocketAddr, session_id: &SessionId) -> String {
    format!(
        "http://{}:{}/mcp?session_id={}",
        listen.ip(),
        listen.port(),
        session_id
    )
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/mcp", get(mcp_stream).post(mcp_post))
        .route("/review/pending", get(list_pending_reviews))
        .route("/review/resolve", post(resolve_review))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct McpQuery {
    session_id: Option<String>,
}

async fn mcp_stream(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    state.authorize(&headers)?;
    Ok(open_stream(&state, None))
}

async fn mcp_post(
    State(state): State<AppState>,
    Query(query): Query<McpQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.authorize(&headers)?;
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));
    if wants_stream && query.session_id.is_none() {
        let initial = serde_json::from_slice::<Value>(&body)
            .ok()
            .filter(|payload| !payload.is_null());
        return Ok(open_stream(&state, initial));
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|err| {
        debug!(%err, "request body is not JSON");
        Value::Null
    });
    let session_id = match query.session_id.as_deref() {
        Some(raw) => match raw.parse::<SessionId>() {
            Ok(id) if state.registry.contains(&id) => Some(id),
            _ => {
                debug!(session_id = %raw, "unknown session; dispatching without one");
                None
            }
        },
        None => state.registry.latest(),
    };
    match state.dispatcher.dispatch_value(payload, session_id).await {
        Some(response) => Ok(Json(response).into_response()),
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

/// Register a session and stream its queue; `initial` is answered over the stream.
fn open_stream(state: &AppState, initial: Option<Value>) -> Response {
    let opened = state.registry.open();
    let session_id = opened.session_id.clone();
    let stream = session_event_stream(
        state.registry.clone(),
        opened,
        state.endpoint_url(&session_id),
    );
    if let Some(payload) = initial {
        let dispatcher = state.dispatcher.clone();
        let registry = state.registry.clone();
        tokio::spawn(async move {
            if let Some(response) = dispatcher
                .dispatch_value(payload, Some(session_id.clone()))
                .await
            {
                if let Err(err) = registry.enqueue(&session_id, response.to_value()) {
                    debug!(%err, "initial response not delivered");
                }
            }
        });
    }
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.heartbeat)
                .text("heartbeat"),
        )
        .into_response()
}

async fn list_pending_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PendingDiffView>>, ApiError> {
    state.authorize(&headers)?;
    Ok(Json(state.diffs.list_pending()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveReviewRequest {
    file_path: String,
    accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveReviewResponse {
    file_path: String,
    accepted: bool,
}

async fn resolve_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ResolveReviewRequest>,
) -> Result<Json<ResolveReviewResponse>, ApiError> {
    state.authorize(&headers)?;
    if !state.diffs.is_pending(&payload.file_path) {
        return Err(ApiError::not_found(
            "diff_not_pending",
            format!("no diff pending for {}", payload.file_path),
        ));
    }
    if !state
        .editor
        .resolve_diff(payload.file_path.clone(), payload.accepted)
        .await
    {
        return Err(ApiError::not_found(
            "diff_not_pending",
            format!("diff for {} was already resolved", payload.file_path),
        ));
    }
    Ok(Json(ResolveReviewResponse {
        file_path: payload.file_path,
        accepted: payload.accepted,
    }))
}

/// A running bridge: HTTP server, editor loop and discovery records.
pub struct BridgeServer {
    listen: SocketAddr,
    token: Arc<AuthToken>,
    registry: Arc<SessionRegistry>,
    diffs: Arc<DiffReviewService>,
    editor_loop: EditorLoop,
    server_shutdown: oneshot::Sender<()>,
    server_task: JoinHandle<std::io::Result<()>>,
    discovery: Option<(DiscoveryStore, BTreeSet<u32>)>,
    discovery_files: Vec<PathBuf>,
    meter_provider: Option<SdkMeterProvider>,
}

impl BridgeServer {
    pub async fn start(settings: Settings, editor: Box<dyn EditorPort>) -> AnyResult<Self> {
        let (metrics, meter_provider) = match settings.otlp_endpoint.as_deref() {
            Some(endpoint) => {
                let (provider, metrics) = telemetry::init_metrics(endpoint, "ide-bridge")?;
                (Some(Arc::new(metrics)), Some(provider))
            }
            None => (None, None),
        };

        let store = DiscoveryStore::new(&settings.discovery_dir, &settings.discovery_prefix);
        let listener = bind_listener(&settings, &store).await?;
        let listen = listener
            .local_addr()
            .context("reading bound listener address")?;

        let token = match settings.auth_token.clone() {
            Some(raw) => AuthToken::new(raw).map_err(anyhow::Error::msg)?,
            None => AuthToken::generate(),
        };
        let token = Arc::new(token);

        let registry = Arc::new(SessionRegistry::new(
            settings.session_queue_capacity,
            metrics.clone(),
        ));
        let diffs = Arc::new(DiffReviewService::new(
            registry.clone(),
            settings.blocking_diff_timeout,
            metrics.clone(),
        ));
        let broadcaster = Arc::new(ContextBroadcaster::new(
            registry.clone(),
            settings.workspace.clone(),
            settings.snapshot_limits(),
            metrics.clone(),
        ));
        let editor_loop = spawn_editor_loop(
            editor,
            diffs.clone(),
            broadcaster,
            EditorLoopConfig {
                debounce: settings.context_debounce,
                ..EditorLoopConfig::default()
            },
        );
        let dispatcher = Arc::new(RpcDispatcher::new(
            diffs.clone(),
            editor_loop.handle(),
            DispatcherConfig {
                tool_namespace: settings.tool_namespace.clone(),
                server_name: settings.ide_name.clone(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                client_ready_delay: settings.client_ready_delay,
            },
            metrics,
        ));

        let state = AppState {
            token: token.clone(),
            registry: registry.clone(),
            dispatcher,
            diffs: diffs.clone(),
            editor: editor_loop.handle(),
            listen,
            heartbeat: settings.heartbeat_interval,
        };
        let app = router(state);
        let (server_shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!(listening = %listen, "ide-bridge started");

        let mut server = Self {
            listen,
            token,
            registry,
            diffs,
            editor_loop,
            server_shutdown,
            server_task,
            discovery: None,
            discovery_files: Vec::new(),
            meter_provider,
        };
        if settings.publish_discovery {
            server.publish_discovery(&settings, store).await;
        }
        Ok(server)
    }

    async fn publish_discovery(&mut self, settings: &Settings, store: DiscoveryStore) {
        if settings.workspace.is_empty() {
            info!("no workspace roots; discovery record not written");
            return;
        }
        if let Some(ppid) = parent_process_id() {
            if let Err(err) = store.remember_port(ppid, self.listen.port()).await {
                warn!(%err, "failed to remember sticky port");
            }
        }
        let record = DiscoveryRecord::new(
            self.listen.port(),
            &settings.workspace,
            self.token.as_str(),
            IdeInfo {
                name: settings.ide_name.clone(),
                display_name: settings.ide_display_name.clone(),
            },
        );
        let pids = process_ids();
        match store.publish(&record, &pids).await {
            Ok(files) => {
                info!(count = files.len(), dir = %store.dir().display(), "discovery records published");
                self.discovery_files = files;
                self.discovery = Some((store, pids));
            }
            Err(err) => warn!(%err, "failed to publish discovery record"),
        }
    }

    pub fn port(&self) -> u16 {
        self.listen.port()
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}/mcp", self.listen.ip(), self.listen.port())
    }

    pub fn session_endpoint_url(&self, session_id: &SessionId) -> String {
        endpoint_url(self.listen, session_id)
    }

    /// Where the host pushes UI events (review gestures, closed views, selection changes).
    pub fn editor(&self) -> EditorHandle {
        self.editor_loop.handle()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn diffs(&self) -> Arc<DiffReviewService> {
        self.diffs.clone()
    }

    pub fn discovery_files(&self) -> &[PathBuf] {
        &self.discovery_files
    }

    pub async fn shutdown(self) -> AnyResult<()> {
        info!("ide-bridge shutting down");
        let _ = self.server_shutdown.send(());
        let closed = self.registry.close_all(CloseReason::Shutdown);
        let abandoned = self.diffs.abandon_all();
        debug!(closed, abandoned, "sessions closed and pending diffs abandoned");
        self.editor_loop.shutdown().await;

        let mut server_task = self.server_task;
        match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => warn!(%err, "HTTP server ended with error"),
            Ok(Err(err)) => warn!(%err, "HTTP server task join error"),
            Err(_) => {
                warn!("HTTP server did not drain in time; aborting");
                server_task.abort();
            }
        }

        if let Some((store, pids)) = self.discovery {
            match store.cleanup(&pids).await {
                Ok(removed) => debug!(removed, "discovery records removed"),
                Err(err) => warn!(%err, "failed to remove discovery records"),
            }
        }
        if let Some(provider) = self.meter_provider {
            telemetry::shutdown_metrics(provider)?;
        }
        info!("ide-bridge stopped");
        Ok(())
    }
}

/// Bind the sticky port when one is remembered, with one fallback to an ephemeral port.
async fn bind_listener(settings: &Settings, store: &DiscoveryStore) -> AnyResult<TcpListener> {
    let mut addr = settings.listen;
    if addr.port() == 0 && settings.publish_discovery {
        if let Some(ppid) = parent_process_id() {
            if let Some(port) = store.recall_port(ppid).await {
                debug!(port, "reusing sticky port");
                addr.set_port(port);
            }
        }
    }
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if addr.port() != 0 => {
            warn!(%err, port = addr.port(), "port unavailable; falling back to an ephemeral port");
            addr.set_port(0);
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding fallback listener on {addr}"))
        }
        Err(err) => Err(err).with_context(|| format!("binding listener on {addr}")),
    }
}

/// Run against the filesystem editor until Ctrl-C.
pub async fn run(settings: Settings) -> AnyResult<()> {
    let server = BridgeServer::start(settings, Box::new(FsEditorAdapter::new())).await?;
    info!(endpoint = %server.endpoint_url(), "waiting for clients");
    shutdown_signal().await;
    server.shutdown().await
}

async fn shutdown_signal() {
    let _ = ctrl_c().await;
    info!("shutdown signal received");
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
