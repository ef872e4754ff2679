//! Engine server
//!
//! Bootstraps every listener: the mock-serving HTTP port (which also
//! carries WebSocket upgrades, SOAP, GraphQL and mounted OAuth
//! providers), the optional HTTPS port, the admin port, and the per-mock
//! MQTT/gRPC sub-servers. Fails fast when a declared port cannot be
//! bound; a failing sub-server disables its mock and is surfaced through
//! `/status`. Shutdown drains in-flight work up to a deadline, stops the
//! sub-servers and persists the catalogue.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Router;
use mockd_core::model::MockSpec;
use mockd_core::{
    ChaosEngine, EngineSettings, Error, ListFilter, MockCatalogue, Protocol, RequestLog, Result,
    ShutdownController, ShutdownToken,
};
use mockd_grpc::GrpcServer;
use mockd_http::{admin_router, AdminState, HttpState};
use mockd_mqtt::MqttBroker;
use mockd_oauth::{oauth_router, OAuthProvider};
use mockd_recorder::{FileStore, ReplayController, StoreLimits};
use mockd_soap::SoapState;
use mockd_ws::WsState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Engine configuration, resolved from CLI flags and the config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub https_port: Option<u16>,
    pub admin_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// `None` disables admin auth (no-auth mode).
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub settings: EngineSettings,
    /// Record WS/SSE streams to the data directory.
    pub record_streams: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            https_port: None,
            admin_port: Some(3001),
            tls_cert: None,
            tls_key: None,
            api_key: None,
            data_dir: PathBuf::from(".mockd"),
            config_file: None,
            settings: EngineSettings::default(),
            record_streams: false,
        }
    }
}

/// Dataplane state shared by the combined fallback handler.
#[derive(Clone)]
struct DataplaneState {
    http: HttpState,
    ws: WsState,
    soap: SoapState,
    graphql: mockd_graphql::GraphQlState,
}

/// The running engine.
pub struct Engine {
    pub catalogue: Arc<MockCatalogue>,
    shutdown: ShutdownController,
    drain_deadline: Duration,
    http_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    server_tasks: Vec<tokio::task::JoinHandle<()>>,
    mqtt_brokers: Vec<MqttBroker>,
    grpc_servers: Vec<GrpcServer>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("http_addr", &self.http_addr)
            .field("admin_addr", &self.admin_addr)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Bind all listeners and start serving. Port conflicts on declared
    /// listeners are fatal (`BindFailure`); per-mock sub-server failures
    /// disable the mock and are recorded for `/status`.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let catalogue = Arc::new(MockCatalogue::new(&config.data_dir)?);
        if let Some(path) = &config.config_file {
            let file = mockd_core::load_config_file(path)?;
            info!(
                mocks = file.mocks.len(),
                name = file.name.as_deref().unwrap_or("unnamed"),
                "loaded mock config"
            );
            for mock in file.mocks {
                catalogue.upsert(mock)?;
            }
        }

        let shutdown = ShutdownController::new();
        let chaos = ChaosEngine::default();
        let request_log = RequestLog::new(config.settings.max_request_log);
        let store = FileStore::open(&config.data_dir, StoreLimits::default()).await?;
        let replay = Arc::new(ReplayController::new(Arc::clone(&store), shutdown.token()));
        let sub_server_errors = Arc::new(RwLock::new(HashMap::new()));

        // Dataplane: health + OAuth mounts + combined fallback.
        let mut http_state =
            HttpState::new(Arc::clone(&catalogue), chaos.clone(), request_log.clone())
                .with_shutdown(shutdown.token());
        let mut ws_state = WsState::new(Arc::clone(&catalogue), request_log.clone())
            .with_shutdown(shutdown.token());
        if config.record_streams {
            http_state = http_state.with_recorder(Arc::clone(&store));
            ws_state = ws_state.with_recorder(Arc::clone(&store));
        }
        let dataplane_state = DataplaneState {
            http: http_state,
            ws: ws_state,
            soap: SoapState::new(Arc::clone(&catalogue), request_log.clone()),
            graphql: mockd_graphql::GraphQlState::new(
                Arc::clone(&catalogue),
                request_log.clone(),
            ),
        };
        let mut app = Router::new()
            .route("/__mockd/health", axum::routing::get(health))
            .fallback(dataplane)
            .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(
                config.settings.io_timeout_secs,
            )))
            .with_state(dataplane_state);

        // OAuth providers are mounted at engine start from the enabled
        // catalogue, like the other per-mock sub-servers.
        for mock in catalogue.list(&ListFilter {
            protocol: Some(Protocol::OAuth),
            enabled_only: true,
            ..Default::default()
        }) {
            let MockSpec::OAuth(spec) = mock.spec else { continue };
            let mount = spec.mount_path.clone();
            match OAuthProvider::new(spec) {
                Ok(provider) => {
                    info!(mock = %mock.id, %mount, "OAuth provider mounted");
                    app = app.nest(&mount, oauth_router(provider));
                }
                Err(e) => {
                    warn!(mock = %mock.id, "OAuth provider failed to start: {e}");
                    let _ = catalogue.set_enabled(&mock.id, false);
                    sub_server_errors.write().await.insert(mock.id, e.to_string());
                }
            }
        }

        // Declared listeners: fail fast on bind errors.
        let http_listener = bind(config.port).await?;
        let http_addr = http_listener.local_addr()?;
        info!("HTTP listener ready on {http_addr}");

        let mut server_tasks = Vec::new();
        server_tasks.push(spawn_serve(http_listener, app.clone(), shutdown.token()));

        if let Some(https_port) = config.https_port {
            let material = mockd_http::load_or_generate_tls(
                config.tls_cert.as_deref(),
                config.tls_key.as_deref(),
            )?;
            let https_listener = bind(https_port).await?;
            let router = app.clone();
            let token = shutdown.token();
            server_tasks.push(tokio::spawn(async move {
                if let Err(e) =
                    mockd_http::serve_https(https_listener, material, router, token).await
                {
                    error!("HTTPS listener failed: {e}");
                }
            }));
        }

        let mut admin_addr = None;
        if let Some(admin_port) = config.admin_port {
            let admin_state = AdminState {
                catalogue: Arc::clone(&catalogue),
                chaos: chaos.clone(),
                request_log: request_log.clone(),
                store: Arc::clone(&store),
                replay,
                api_key: config.api_key.clone(),
                start_time: Instant::now(),
                sub_server_errors: Arc::clone(&sub_server_errors),
            };
            let admin_listener = bind(admin_port).await?;
            let bound = admin_listener.local_addr()?;
            admin_addr = Some(bound);
            info!("admin listener ready on {bound}");
            server_tasks.push(spawn_serve(
                admin_listener,
                admin_router(admin_state),
                shutdown.token(),
            ));
        }

        // Per-mock sub-servers.
        let mut mqtt_brokers = Vec::new();
        let mut grpc_servers = Vec::new();
        for mock in catalogue.list(&ListFilter { enabled_only: true, ..Default::default() }) {
            match &mock.spec {
                MockSpec::Mqtt(spec) => {
                    match MqttBroker::start(spec.clone(), shutdown.token()).await {
                        Ok(broker) => mqtt_brokers.push(broker),
                        Err(e) => {
                            warn!(mock = %mock.id, "MQTT broker failed to start: {e}");
                            let _ = catalogue.set_enabled(&mock.id, false);
                            sub_server_errors.write().await.insert(mock.id.clone(), e.to_string());
                        }
                    }
                }
                MockSpec::Grpc(spec) => {
                    match GrpcServer::start(spec.clone(), shutdown.token()).await {
                        Ok(server) => grpc_servers.push(server),
                        Err(e) => {
                            warn!(mock = %mock.id, "gRPC server failed to start: {e}");
                            let _ = catalogue.set_enabled(&mock.id, false);
                            sub_server_errors.write().await.insert(mock.id.clone(), e.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            catalogue,
            shutdown,
            drain_deadline: Duration::from_secs(config.settings.drain_deadline_secs),
            http_addr,
            admin_addr,
            server_tasks,
            mqtt_brokers,
            grpc_servers,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Graceful shutdown: stop accepting, drain up to the deadline, stop
    /// sub-servers, persist the catalogue. Hard-stops leftover tasks
    /// once the deadline passes.
    pub async fn shutdown(self) {
        info!("engine shutting down (drain deadline {:?})", self.drain_deadline);
        self.shutdown.shutdown();

        let drain = async {
            for task in self.server_tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(self.drain_deadline, drain).await.is_err() {
            warn!("drain deadline exceeded; forcing shutdown");
        }

        for broker in self.mqtt_brokers {
            broker.stop().await;
        }
        for server in &self.grpc_servers {
            server.abort();
        }
        if let Err(e) = self.catalogue.persist() {
            warn!("failed to persist catalogue at shutdown: {e}");
        }
        info!("engine stopped");
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| Error::bind(format!("port {port}: {e}")))
}

fn spawn_serve(
    listener: TcpListener,
    router: Router,
    mut token: ShutdownToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            error!("listener failed: {e}");
        }
    })
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Combined dataplane entry: WebSocket upgrades first, then SOAP and
/// GraphQL path owners, then the plain HTTP mock plane.
async fn dataplane(
    State(state): State<DataplaneState>,
    request: Request<axum::body::Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let wants_upgrade = parts
        .headers
        .get("upgrade")
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"));

    if wants_upgrade {
        let fp = mockd_http::build_fingerprint(
            &parts.method,
            &parts.uri,
            &parts.headers,
            Vec::new(),
        );
        if mockd_ws::find_ws_mock(&state.ws, &fp.path).is_some() {
            match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(ws) => {
                    if let Some(response) = mockd_ws::try_upgrade(&state.ws, &fp, ws) {
                        return response;
                    }
                }
                Err(rejection) => return rejection.into_response(),
            }
        }
    }

    let body = match axum::body::to_bytes(body, 16 * 1024 * 1024).await {
        Ok(body) => body,
        Err(e) => {
            return (axum::http::StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
        }
    };
    let fp =
        mockd_http::build_fingerprint(&parts.method, &parts.uri, &parts.headers, body.to_vec());
    if let Some(response) = mockd_soap::handle_soap(&state.soap, &fp).await {
        return response;
    }
    if let Some(response) = mockd_graphql::handle_graphql(&state.graphql, &fp).await {
        return response;
    }
    mockd_http::handle_request(&state.http, fp).await
}
