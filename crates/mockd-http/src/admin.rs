//! Admin control plane
//!
//! REST endpoints for mutating the mock catalogue, chaos config and
//! recordings while traffic flows. Served on its own port, JSON bodies
//! throughout, Bearer API-key auth unless the engine runs in no-auth
//! mode. Errors are `{error, message}` with the matching HTTP status.

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use mockd_core::{
    ChaosConfig, ChaosEngine, Error, ListFilter, Mock, MockCatalogue, Protocol, RequestLog,
};
use mockd_recorder::{
    recording_to_mock, FileStore, RecordingFilter, ReplayConfig, ReplayController, StreamProtocol,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared admin state.
#[derive(Clone)]
pub struct AdminState {
    pub catalogue: Arc<MockCatalogue>,
    pub chaos: ChaosEngine,
    pub request_log: RequestLog,
    pub store: Arc<FileStore>,
    pub replay: Arc<ReplayController>,
    /// `None` disables auth (development mode).
    pub api_key: Option<String>,
    pub start_time: Instant,
    /// Per-mock sub-server startup failures, surfaced via `/status`.
    pub sub_server_errors: Arc<RwLock<HashMap<String, String>>>,
}

/// JSON error body with the core error's status.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the admin router.
pub fn admin_router(state: AdminState) -> Router {
    let authed = Router::new()
        .route("/status", get(status))
        .route("/mocks", post(create_mock).get(list_mocks))
        .route("/mocks/{id}", get(get_mock).put(upsert_mock).delete(delete_mock))
        .route("/mocks/{id}/enable", post(enable_mock))
        .route("/mocks/{id}/disable", post(disable_mock))
        .route("/requests", get(list_requests).delete(clear_requests))
        .route("/chaos", put(replace_chaos).get(get_chaos))
        .route("/stream-recordings", get(list_recordings))
        .route("/stream-recordings/stats", get(recording_stats))
        .route("/stream-recordings/vacuum", post(vacuum_recordings))
        .route("/stream-recordings/{id}", get(get_recording).delete(delete_recording))
        .route("/stream-recordings/{id}/export", post(export_recording))
        .route("/stream-recordings/{id}/convert", post(convert_recording))
        .route("/stream-recordings/{id}/replay", post(start_replay))
        .route("/replay", get(list_replays))
        .route("/replay/{id}", delete(stop_replay))
        .route("/replay/{id}/next", post(replay_next))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Bearer-key check for every endpoint except `/health`.
async fn require_api_key(
    State(state): State<AdminState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_key {
        let supplied = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if supplied != Some(expected.as_str()) {
            return ApiError(Error::unauthorized("missing or invalid API key")).into_response();
        }
    }
    next.run(request).await
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    let mocks = state.catalogue.list(&ListFilter::default());
    let enabled = mocks.iter().filter(|m| m.enabled).count();
    let counts = state.request_log.counts_by_protocol().await;
    let errors = state.sub_server_errors.read().await.clone();
    Json(serde_json::json!({
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
        "mocks": {"total": mocks.len(), "enabled": enabled},
        "requestsByProtocol": counts,
        "subServerErrors": errors,
    }))
}

// ---------------------------------------------------------------------------
// Mock CRUD
// ---------------------------------------------------------------------------

async fn create_mock(
    State(state): State<AdminState>,
    Json(mock): Json<Mock>,
) -> ApiResult<(StatusCode, Json<Mock>)> {
    let created = state.catalogue.create(mock)?;
    info!(id = %created.id, protocol = created.protocol.as_str(), "mock created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
struct MockListQuery {
    protocol: Option<Protocol>,
    workspace: Option<String>,
}

async fn list_mocks(
    State(state): State<AdminState>,
    Query(query): Query<MockListQuery>,
) -> impl IntoResponse {
    let mocks = state.catalogue.list(&ListFilter {
        protocol: query.protocol,
        workspace: query.workspace,
        enabled_only: false,
    });
    Json(serde_json::json!({"mocks": mocks, "total": mocks.len()}))
}

async fn get_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Mock>> {
    state
        .catalogue
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError(Error::not_found(format!("mock id {id}"))))
}

async fn upsert_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(mut mock): Json<Mock>,
) -> ApiResult<Json<Mock>> {
    mock.id = id;
    Ok(Json(state.catalogue.upsert(mock)?))
}

async fn delete_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.catalogue.delete(&id)?;
    info!(%id, "mock deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Mock>> {
    Ok(Json(state.catalogue.set_enabled(&id, true)?))
}

async fn disable_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Mock>> {
    Ok(Json(state.catalogue.set_enabled(&id, false)?))
}

// ---------------------------------------------------------------------------
// Request log
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RequestsQuery {
    limit: Option<usize>,
    protocol: Option<String>,
}

async fn list_requests(
    State(state): State<AdminState>,
    Query(query): Query<RequestsQuery>,
) -> impl IntoResponse {
    let entries = state.request_log.recent(query.limit, query.protocol.as_deref()).await;
    Json(serde_json::json!({"requests": entries, "total": entries.len()}))
}

async fn clear_requests(State(state): State<AdminState>) -> StatusCode {
    state.request_log.clear().await;
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Chaos
// ---------------------------------------------------------------------------

async fn replace_chaos(
    State(state): State<AdminState>,
    Json(config): Json<ChaosConfig>,
) -> impl IntoResponse {
    info!(enabled = config.enabled, "chaos config replaced");
    state.chaos.replace(config);
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_chaos(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.chaos.current().as_ref().clone())
}

// ---------------------------------------------------------------------------
// Stream recordings
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RecordingsQuery {
    protocol: Option<StreamProtocol>,
}

async fn list_recordings(
    State(state): State<AdminState>,
    Query(query): Query<RecordingsQuery>,
) -> impl IntoResponse {
    let recordings = state.store.list(&RecordingFilter { protocol: query.protocol }).await;
    Json(serde_json::json!({"recordings": recordings, "total": recordings.len()}))
}

async fn get_recording(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get(&id).await?))
}

async fn delete_recording(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_recording(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.export(&id).await?))
}

async fn convert_recording(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let meta = state.store.get(&id).await?;
    let frames = state.store.frames(&id).await?;
    let mock = recording_to_mock(&meta, &frames)?;
    Ok(Json(serde_json::json!({"mock": mock})))
}

async fn recording_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

async fn vacuum_recordings(State(state): State<AdminState>) -> ApiResult<impl IntoResponse> {
    let (removed, bytes_freed) = state.store.vacuum().await?;
    Ok(Json(serde_json::json!({"removed": removed, "bytesFreed": bytes_freed})))
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRequest {
    mode: String,
    #[serde(default)]
    timing_scale: Option<f64>,
}

async fn start_replay(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(request): Json<ReplayRequest>,
) -> ApiResult<(StatusCode, impl IntoResponse)> {
    let (session, _frames) = state
        .replay
        .start_replay(ReplayConfig {
            recording_id: id,
            mode: request.mode,
            timing_scale: request.timing_scale.unwrap_or(1.0),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_replays(State(state): State<AdminState>) -> impl IntoResponse {
    let sessions = state.replay.list_sessions().await;
    Json(serde_json::json!({"sessions": sessions, "total": sessions.len()}))
}

async fn stop_replay(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.replay.stop_replay(&id).await;
    StatusCode::NO_CONTENT
}

async fn replay_next(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let frame = state.replay.next(&id).await?;
    let session = state.replay.get_session(&id).await?;
    Ok(Json(serde_json::json!({"frame": frame, "session": session})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use mockd_core::ShutdownToken;
    use mockd_recorder::StoreLimits;
    use tower::ServiceExt;

    async fn test_state(api_key: Option<&str>) -> (tempfile::TempDir, AdminState) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreLimits::default()).await.unwrap();
        let state = AdminState {
            catalogue: Arc::new(MockCatalogue::in_memory()),
            chaos: ChaosEngine::default(),
            request_log: RequestLog::new(100),
            store: Arc::clone(&store),
            replay: Arc::new(ReplayController::new(store, ShutdownToken::never())),
            api_key: api_key.map(String::from),
            start_time: Instant::now(),
            sub_server_errors: Arc::new(RwLock::new(HashMap::new())),
        };
        (dir, state)
    }

    fn mock_body(id: &str) -> String {
        serde_json::json!({
            "id": id,
            "protocol": "http",
            "spec": {
                "matcher": {"method": "GET", "path": "/api/hello"},
                "response": {"status": 200, "body": "Hello, World!"}
            }
        })
        .to_string()
    }

    async fn request(
        router: &Router,
        method: &str,
        path: &str,
        key: Option<&str>,
        body: Option<String>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(path);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn create_conflict_and_delete_lifecycle() {
        let (_dir, state) = test_state(None).await;
        let router = admin_router(state);

        let (status, body) =
            request(&router, "POST", "/mocks", None, Some(mock_body("m1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "m1");

        let (status, body) =
            request(&router, "POST", "/mocks", None, Some(mock_body("m1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_exists");

        let (status, _) = request(&router, "DELETE", "/mocks/m1", None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = request(&router, "GET", "/mocks/m1", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn api_key_is_enforced_except_health() {
        let (_dir, state) = test_state(Some("secret")).await;
        let router = admin_router(state);

        let (status, _) = request(&router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = request(&router, "GET", "/mocks", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = request(&router, "GET", "/mocks", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = request(&router, "GET", "/mocks", Some("secret"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn chaos_roundtrip() {
        let (_dir, state) = test_state(None).await;
        let chaos = state.chaos.clone();
        let router = admin_router(state);

        let config = serde_json::json!({
            "enabled": true,
            "latency": {"minMs": 5, "maxMs": 10, "probability": 0.5}
        });
        let (status, _) =
            request(&router, "PUT", "/chaos", None, Some(config.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(chaos.current().enabled);

        let (_, body) = request(&router, "GET", "/chaos", None, None).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["latency"]["minMs"], 5);
    }

    #[tokio::test]
    async fn status_reports_mock_counts() {
        let (_dir, state) = test_state(None).await;
        let router = admin_router(state);
        request(&router, "POST", "/mocks", None, Some(mock_body("m1"))).await;

        let (status, body) = request(&router, "GET", "/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mocks"]["total"], 1);
        assert_eq!(body["mocks"]["enabled"], 1);
    }

    #[tokio::test]
    async fn enable_disable_toggle() {
        let (_dir, state) = test_state(None).await;
        let router = admin_router(state);
        request(&router, "POST", "/mocks", None, Some(mock_body("m1"))).await;

        let (status, body) =
            request(&router, "POST", "/mocks/m1/disable", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);

        let (_, body) = request(&router, "POST", "/mocks/m1/enable", None, None).await;
        assert_eq!(body["enabled"], true);
    }

    #[tokio::test]
    async fn recordings_endpoints_and_vacuum() {
        let (_dir, state) = test_state(None).await;
        // Seed one completed recording.
        let session = state
            .store
            .begin(StreamProtocol::WebSocket, mockd_recorder::OriginMetadata::default())
            .await
            .unwrap();
        session
            .on_frame(
                mockd_recorder::FrameDirection::ServerToClient,
                mockd_recorder::FrameKind::Text,
                b"data",
                None,
                None,
            )
            .await;
        session.on_complete().await.unwrap();
        state.store.finalize(&session).await;
        let id = session.id().await;
        let router = admin_router(state);

        let (status, body) = request(&router, "GET", "/stream-recordings", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = request(
            &router,
            "POST",
            &format!("/stream-recordings/{id}/export"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["frameCount"], 1);

        let (status, _) =
            request(&router, "DELETE", &format!("/stream-recordings/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = request(&router, "GET", "/stream-recordings", None, None).await;
        assert_eq!(body["total"], 0);

        let (status, body) =
            request(&router, "POST", "/stream-recordings/vacuum", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);
    }

    #[tokio::test]
    async fn replay_start_and_stop() {
        let (_dir, state) = test_state(None).await;
        let session = state
            .store
            .begin(StreamProtocol::WebSocket, mockd_recorder::OriginMetadata::default())
            .await
            .unwrap();
        session
            .on_frame(
                mockd_recorder::FrameDirection::ServerToClient,
                mockd_recorder::FrameKind::Text,
                b"x",
                None,
                None,
            )
            .await;
        session.on_complete().await.unwrap();
        state.store.finalize(&session).await;
        let id = session.id().await;
        let router = admin_router(state);

        let (status, body) = request(
            &router,
            "POST",
            &format!("/stream-recordings/{id}/replay"),
            None,
            Some(r#"{"mode":"triggered"}"#.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let session_id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["totalFrames"], 1);

        let (status, body) = request(
            &router,
            "POST",
            &format!("/replay/{session_id}/next"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frame"]["seq"], 1);

        let (status, _) =
            request(&router, "DELETE", &format!("/replay/{session_id}"), None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        // Idempotent.
        let (status, _) =
            request(&router, "DELETE", &format!("/replay/{session_id}"), None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn invalid_replay_mode_is_400() {
        let (_dir, state) = test_state(None).await;
        let router = admin_router(state);
        let (status, body) = request(
            &router,
            "POST",
            "/stream-recordings/nope/replay",
            None,
            Some(r#"{"mode":"warp"}"#.to_string()),
        )
        .await;
        // Mode validation happens before the recording lookup.
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }
}
