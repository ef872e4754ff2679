//! # mockd WebSocket
//!
//! WebSocket mock behaviors. After the protocol upgrade completes, the
//! connection runs in one of two modes:
//!
//! - **echo** — every Text/Binary frame is written straight back,
//!   preserving the message type, until the peer closes or errors.
//! - **script** — the declared outbound frames are sent in order with
//!   their inter-frame delays while inbound traffic keeps draining;
//!   an optional scripted close ends the connection.
//!
//! Every inbound and outbound frame is offered to the stream recorder
//! when one is attached to the connection, and the peer's close code and
//! reason are both logged and journaled.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use mockd_core::model::{MockSpec, WsMode, WsSpec};
use mockd_core::{
    MockCatalogue, Protocol, RequestFingerprint, RequestLog, RequestLogEntry, ShutdownToken,
    TemplateContext,
};
use mockd_recorder::{
    FileStore, FrameDirection, FrameKind, OriginMetadata, RecorderSession, StreamProtocol,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared state for the WebSocket plane.
#[derive(Clone)]
pub struct WsState {
    pub catalogue: Arc<MockCatalogue>,
    pub request_log: RequestLog,
    pub recorder: Option<Arc<FileStore>>,
    pub shutdown: ShutdownToken,
}

impl WsState {
    pub fn new(catalogue: Arc<MockCatalogue>, request_log: RequestLog) -> Self {
        Self { catalogue, request_log, recorder: None, shutdown: ShutdownToken::never() }
    }

    pub fn with_recorder(mut self, recorder: Arc<FileStore>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Find the WebSocket mock declared for a path.
pub fn find_ws_mock(state: &WsState, path: &str) -> Option<(String, WsSpec)> {
    let snapshot = state.catalogue.snapshot();
    for stored in snapshot.iter_protocol(Protocol::WebSocket) {
        if let MockSpec::WebSocket(spec) = &stored.mock.spec {
            if spec.path == path {
                return Some((stored.mock.id.clone(), spec.clone()));
            }
        }
    }
    None
}

/// Complete the upgrade when a WebSocket mock is declared for the path;
/// `None` lets the caller fall through to plain HTTP handling.
pub fn try_upgrade(
    state: &WsState,
    fp: &RequestFingerprint,
    ws: WebSocketUpgrade,
) -> Option<Response> {
    let (mock_id, spec) = find_ws_mock(state, &fp.path)?;
    info!(path = %fp.path, mock = %mock_id, mode = ?spec.mode, "websocket upgrade");

    let state = state.clone();
    let fp = fp.clone();
    Some(ws.on_upgrade(move |socket| async move {
        state
            .request_log
            .record(RequestLogEntry::new(
                Protocol::WebSocket,
                "CONNECT",
                &fp.path,
                Some(mock_id.clone()),
                101,
                0,
            ))
            .await;
        let recorder = match &state.recorder {
            Some(store) => begin_recording(store, &fp).await,
            None => None,
        };
        run_connection(socket, &spec, &fp, &state, recorder.as_ref().map(|(_, s)| s)).await;
        if let Some((store, session)) = recorder {
            if let Err(e) = session.on_complete().await {
                warn!("failed to finalize ws recording: {e}");
            }
            store.finalize(&session).await;
        }
    }))
}

async fn begin_recording(
    store: &Arc<FileStore>,
    fp: &RequestFingerprint,
) -> Option<(Arc<FileStore>, RecorderSession)> {
    let origin = OriginMetadata {
        path: fp.path.clone(),
        method: fp.method.clone(),
        host: fp.header("host").unwrap_or_default().to_string(),
    };
    match store.begin(StreamProtocol::WebSocket, origin).await {
        Ok(session) => Some((Arc::clone(store), session)),
        Err(e) => {
            warn!("ws recording not started: {e}");
            None
        }
    }
}

async fn run_connection(
    socket: WebSocket,
    spec: &WsSpec,
    fp: &RequestFingerprint,
    state: &WsState,
    recorder: Option<&RecorderSession>,
) {
    match spec.mode {
        WsMode::Echo => echo_loop(socket, fp, state, recorder).await,
        WsMode::Script => script_loop(socket, spec, fp, state, recorder).await,
    }
}

/// Echo mode: mirror data frames, answer pings, record both directions.
async fn echo_loop(
    mut socket: WebSocket,
    fp: &RequestFingerprint,
    state: &WsState,
    recorder: Option<&RecorderSession>,
) {
    let mut shutdown = state.shutdown.clone();
    loop {
        let message = tokio::select! {
            message = socket.recv() => message,
            () = shutdown.cancelled() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                return;
            }
        };
        let Some(Ok(message)) = message else {
            debug!(path = %fp.path, "websocket connection ended");
            return;
        };
        match message {
            Message::Text(text) => {
                record_frame(recorder, FrameDirection::ClientToServer, FrameKind::Text, text.as_bytes())
                    .await;
                record_frame(recorder, FrameDirection::ServerToClient, FrameKind::Text, text.as_bytes())
                    .await;
                if socket.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Message::Binary(data) => {
                record_frame(recorder, FrameDirection::ClientToServer, FrameKind::Binary, &data).await;
                record_frame(recorder, FrameDirection::ServerToClient, FrameKind::Binary, &data).await;
                if socket.send(Message::Binary(data)).await.is_err() {
                    return;
                }
            }
            Message::Ping(data) => {
                let _ = socket.send(Message::Pong(data)).await;
            }
            Message::Pong(_) => {}
            Message::Close(frame) => {
                log_close(fp, recorder, frame.as_ref()).await;
                return;
            }
        }
    }
}

/// Script mode: play the declared outbound sequence while draining
/// inbound frames, then close if the script says so.
async fn script_loop(
    socket: WebSocket,
    spec: &WsSpec,
    fp: &RequestFingerprint,
    state: &WsState,
    recorder: Option<&RecorderSession>,
) {
    let ctx = TemplateContext::for_request(fp.clone());
    let (mut sink, mut stream) = socket.split();
    let mut shutdown = state.shutdown.clone();

    // Drain inbound concurrently so client frames never block the script.
    let drain_recorder = recorder.cloned();
    let drain_fp = fp.clone();
    let drain = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    record_frame(
                        drain_recorder.as_ref(),
                        FrameDirection::ClientToServer,
                        FrameKind::Text,
                        text.as_bytes(),
                    )
                    .await;
                }
                Message::Binary(data) => {
                    record_frame(
                        drain_recorder.as_ref(),
                        FrameDirection::ClientToServer,
                        FrameKind::Binary,
                        &data,
                    )
                    .await;
                }
                Message::Close(frame) => {
                    log_close(&drain_fp, drain_recorder.as_ref(), frame.as_ref()).await;
                    break;
                }
                _ => {}
            }
        }
    });

    for frame in &spec.script {
        if frame.delay_ms > 0 {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(frame.delay_ms)) => {}
                () = shutdown.cancelled() => break,
            }
        }
        let data = mockd_core::expand(&frame.data, &ctx);
        let (message, kind) = if frame.binary {
            (Message::Binary(data.clone().into_bytes().into()), FrameKind::Binary)
        } else {
            (Message::Text(data.clone().into()), FrameKind::Text)
        };
        record_frame(recorder, FrameDirection::ServerToClient, kind, data.as_bytes()).await;
        if sink.send(message).await.is_err() {
            break;
        }
    }

    if let Some(close) = &spec.close {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close.code,
                reason: close.reason.clone().into(),
            })))
            .await;
    }
    drain.abort();
}

async fn record_frame(
    recorder: Option<&RecorderSession>,
    direction: FrameDirection,
    kind: FrameKind,
    payload: &[u8],
) {
    if let Some(session) = recorder {
        session.on_frame(direction, kind, payload, None, None).await;
    }
}

async fn log_close(
    fp: &RequestFingerprint,
    recorder: Option<&RecorderSession>,
    frame: Option<&CloseFrame>,
) {
    let (code, reason) = frame
        .map(|f| (f.code, f.reason.to_string()))
        .unwrap_or((1005, String::new()));
    info!(path = %fp.path, code, reason = %reason, "websocket closed by peer");
    if let Some(session) = recorder {
        session.on_close(code, &reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::model::{Mock, WsClose, WsScriptFrame};
    use std::collections::HashMap;

    fn ws_mock(id: &str, path: &str, mode: WsMode) -> Mock {
        Mock {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            protocol: Protocol::WebSocket,
            spec: MockSpec::WebSocket(WsSpec {
                path: path.to_string(),
                mode,
                script: vec![WsScriptFrame {
                    data: "tick {{request.path}}".to_string(),
                    delay_ms: 0,
                    binary: false,
                }],
                close: Some(WsClose { code: 1000, reason: "done".to_string() }),
            }),
            priority: 0,
            workspace: None,
            created_at: None,
        }
    }

    fn state() -> WsState {
        WsState::new(Arc::new(MockCatalogue::in_memory()), RequestLog::new(10))
    }

    #[test]
    fn find_ws_mock_matches_exact_path() {
        let state = state();
        state.catalogue.create(ws_mock("echo", "/ws/echo", WsMode::Echo)).unwrap();

        let hit = find_ws_mock(&state, "/ws/echo");
        assert_eq!(hit.unwrap().0, "echo");
        assert!(find_ws_mock(&state, "/ws/other").is_none());
    }

    #[test]
    fn disabled_ws_mock_is_ignored() {
        let state = state();
        state.catalogue.create(ws_mock("echo", "/ws/echo", WsMode::Echo)).unwrap();
        state.catalogue.set_enabled("echo", false).unwrap();
        assert!(find_ws_mock(&state, "/ws/echo").is_none());
    }

    #[test]
    fn script_frames_carry_template_and_close() {
        let state = state();
        state.catalogue.create(ws_mock("s", "/ws/feed", WsMode::Script)).unwrap();
        let (_, spec) = find_ws_mock(&state, "/ws/feed").unwrap();
        assert_eq!(spec.script.len(), 1);
        let ctx = TemplateContext::for_request(RequestFingerprint::new(
            "GET",
            "/ws/feed",
            "/ws/feed",
            None,
            HashMap::new(),
            vec![],
        ));
        assert_eq!(mockd_core::expand(&spec.script[0].data, &ctx), "tick /ws/feed");
        assert_eq!(spec.close.as_ref().unwrap().code, 1000);
    }
}
