//! # mockd HTTP
//!
//! The HTTP dataplane: a catch-all axum router that fingerprints every
//! inbound request, asks the matching engine for the winning mock,
//! applies declared delay and chaos, renders the response through the
//! template engine, and records the outcome in the request log. Mocks
//! whose response declares an `sse` block switch the connection into
//! `text/event-stream` mode with per-event flushing.
//!
//! The crate also hosts the admin control plane ([`admin`]) and TLS
//! support ([`tls`]) for the HTTPS listener.

pub mod admin;
pub mod sse;
pub mod tls;

pub use admin::{admin_router, AdminState};
pub use tls::{load_or_generate_tls, serve_https};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mockd_core::model::{HttpResponseSpec, MockSpec};
use mockd_core::{
    ChaosEngine, MockCatalogue, Protocol, RequestFingerprint, RequestLog, RequestLogEntry,
    ShutdownToken, TemplateContext,
};
use mockd_recorder::FileStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared state for the mock-serving router.
#[derive(Clone)]
pub struct HttpState {
    pub catalogue: Arc<MockCatalogue>,
    pub chaos: ChaosEngine,
    pub request_log: RequestLog,
    /// Present when stream recording is enabled.
    pub recorder: Option<Arc<FileStore>>,
    pub shutdown: ShutdownToken,
}

impl HttpState {
    pub fn new(catalogue: Arc<MockCatalogue>, chaos: ChaosEngine, request_log: RequestLog) -> Self {
        Self {
            catalogue,
            chaos,
            request_log,
            recorder: None,
            shutdown: ShutdownToken::never(),
        }
    }

    /// Attach a recording store; SSE responses will journal their events.
    pub fn with_recorder(mut self, recorder: Arc<FileStore>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build the mock-serving router: the health probe plus a catch-all that
/// accepts any method on any path.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/__mockd/health", get(health))
        .fallback(handle_any)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// The catch-all mock handler.
async fn handle_any(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let fp = build_fingerprint(&method, &uri, &headers, body.to_vec());
    handle_request(&state, fp).await
}

/// Serve one fingerprinted request. Public so the engine can compose the
/// HTTP plane with the WebSocket upgrade path in a single fallback.
pub async fn handle_request(state: &HttpState, fp: RequestFingerprint) -> Response {
    let state = state.clone();
    let started = Instant::now();
    let method = fp.method.clone();
    let path = fp.path.clone();

    let snapshot = state.catalogue.snapshot();
    let Some(outcome) = mockd_core::match_http(&snapshot, &fp) else {
        debug!(%method, %path, "no mock matched");
        let response = not_matched_response();
        log_request(&state, &fp, None, 404, started).await;
        return response;
    };

    let Some(stored) = snapshot.get(&outcome.mock_id) else {
        // Snapshot raced a delete; treat as unmatched.
        let response = not_matched_response();
        log_request(&state, &fp, None, 404, started).await;
        return response;
    };
    let MockSpec::Http(spec) = &stored.mock.spec else {
        let response = not_matched_response();
        log_request(&state, &fp, None, 404, started).await;
        return response;
    };
    let mock_id = stored.mock.id.clone();
    info!(%method, %path, mock = %mock_id, score = outcome.score, "mock matched");

    let ctx = TemplateContext::for_request(fp.clone())
        .with_pattern_params(outcome.path_pattern_params.clone());

    // Declared delay first, chaos on top (additive).
    if let Some(delay_ms) = spec.response.delay_ms {
        sleep_cancellable(&state, Duration::from_millis(delay_ms)).await;
    }
    let chaos_status = state.chaos.apply().await;

    if let Some(status) = chaos_status {
        let response = empty_status_response(status);
        log_request(&state, &fp, Some(mock_id), status, started).await;
        return response;
    }

    // SSE block flips the connection into streaming mode.
    if let Some(sse_block) = &spec.response.sse {
        let recorder = match &state.recorder {
            Some(store) => sse::start_sse_recording(store, &fp).await,
            None => None,
        };
        let status = spec.response.status;
        let response =
            sse::sse_response(sse_block.clone(), ctx, recorder, state.shutdown.clone());
        log_request(&state, &fp, Some(mock_id), status, started).await;
        return response;
    }

    let response = render_response(&spec.response, &ctx);
    let status = spec.response.status;
    log_request(&state, &fp, Some(mock_id), status, started).await;
    response
}

/// Render a non-streaming response: status, templated headers and body.
/// Content-Type defaults to `text/plain`.
pub(crate) fn render_response(spec: &HttpResponseSpec, ctx: &TemplateContext) -> Response {
    let status = StatusCode::from_u16(spec.status).unwrap_or(StatusCode::OK);
    let body = mockd_core::expand(&spec.body, ctx);

    let mut response = Response::builder().status(status);
    let mut has_content_type = false;
    for (name, value) in &spec.headers {
        if name.eq_ignore_ascii_case("content-type") {
            has_content_type = true;
        }
        let value = mockd_core::expand(value, ctx);
        if let (Ok(name), Ok(value)) =
            (name.parse::<HeaderName>(), HeaderValue::from_str(&value))
        {
            response = response.header(name, value);
        }
    }
    if !has_content_type {
        response = response.header("content-type", "text/plain");
    }
    response.body(Body::from(body)).unwrap_or_else(|_| {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn not_matched_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": "not_matched",
            "message": "no mock matched the request",
        })),
    )
        .into_response()
}

fn empty_status_response(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    status.into_response()
}

/// Sleep that is cut short by engine shutdown.
async fn sleep_cancellable(state: &HttpState, duration: Duration) {
    let mut shutdown = state.shutdown.clone();
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        () = shutdown.cancelled() => {}
    }
}

/// Build a fingerprint from axum request parts.
pub fn build_fingerprint(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Vec<u8>,
) -> RequestFingerprint {
    let mut header_map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    RequestFingerprint::new(
        method.as_str(),
        uri.path(),
        &uri.to_string(),
        uri.query(),
        header_map,
        body,
    )
}

async fn log_request(
    state: &HttpState,
    fp: &RequestFingerprint,
    mock_id: Option<String>,
    status: u16,
    started: Instant,
) {
    state
        .request_log
        .record(RequestLogEntry::new(
            Protocol::Http,
            &fp.method,
            &fp.path,
            mock_id,
            status,
            started.elapsed().as_millis() as u64,
        ))
        .await;
}
