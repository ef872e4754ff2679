//! End-to-end engine tests: real listeners, real clients.

use futures::{SinkExt, StreamExt};
use mockd_cli::{Engine, EngineConfig};
use mockd_core::model::{
    HttpMatcher, HttpResponseSpec, HttpSpec, Mock, MockSpec, WsMode, WsSpec,
};
use mockd_core::Protocol;
use std::collections::HashMap;
use tokio_tungstenite::tungstenite::Message;

fn http_mock(id: &str, path: &str, body: &str) -> Mock {
    Mock {
        id: id.to_string(),
        name: id.to_string(),
        enabled: true,
        protocol: Protocol::Http,
        spec: MockSpec::Http(HttpSpec {
            matcher: HttpMatcher {
                method: Some("GET".to_string()),
                path: Some(path.to_string()),
                ..Default::default()
            },
            response: HttpResponseSpec {
                status: 200,
                headers: HashMap::new(),
                body: body.to_string(),
                delay_ms: None,
                sse: None,
            },
        }),
        priority: 0,
        workspace: None,
        created_at: None,
    }
}

fn ws_echo_mock(path: &str) -> Mock {
    Mock {
        id: "ws-echo".to_string(),
        name: "echo".to_string(),
        enabled: true,
        protocol: Protocol::WebSocket,
        spec: MockSpec::WebSocket(WsSpec {
            path: path.to_string(),
            mode: WsMode::Echo,
            script: Vec::new(),
            close: None,
        }),
        priority: 0,
        workspace: None,
        created_at: None,
    }
}

async fn start_engine(dir: &std::path::Path) -> Engine {
    Engine::start(EngineConfig {
        port: 0,
        admin_port: Some(0),
        data_dir: dir.to_path_buf(),
        ..Default::default()
    })
    .await
    .expect("engine starts")
}

#[tokio::test]
async fn http_mock_served_over_real_listener() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(dir.path()).await;
    engine
        .catalogue
        .create(http_mock("hello", "/api/hello", "Hello, World!"))
        .unwrap();

    let base = format!("http://{}", engine.http_addr());
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/api/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Hello, World!");

    let response = client.get(format!("{base}/api/unknown")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    // Health never depends on the catalogue.
    let response = client.get(format!("{base}/__mockd/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    engine.shutdown().await;
}

#[tokio::test]
async fn websocket_echo_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(dir.path()).await;
    engine.catalogue.create(ws_echo_mock("/ws/echo")).unwrap();

    let url = format!("ws://{}/ws/echo", engine.http_addr());
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    socket.send(Message::Text("Hello WebSocket!".into())).await.unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed, Message::Text("Hello WebSocket!".into()));

    // Binary frames keep their type.
    socket.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed, Message::Binary(vec![1, 2, 3].into()));

    socket.close(None).await.unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn websocket_upgrade_falls_back_to_http_on_other_paths() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(dir.path()).await;
    engine.catalogue.create(ws_echo_mock("/ws/echo")).unwrap();

    let url = format!("ws://{}/ws/other", engine.http_addr());
    // No WS mock on this path: the upgrade is answered by the HTTP
    // plane's 404, which tungstenite reports as a handshake error.
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());

    engine.shutdown().await;
}

#[tokio::test]
async fn admin_crud_drives_the_dataplane() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(dir.path()).await;
    let admin = format!("http://{}", engine.admin_addr().unwrap());
    let base = format!("http://{}", engine.http_addr());
    let client = reqwest::Client::new();

    // Create through the control plane...
    let mock = serde_json::json!({
        "id": "runtime",
        "protocol": "http",
        "spec": {
            "matcher": {"path": "/made-at-runtime"},
            "response": {"status": 201, "body": "fresh"}
        }
    });
    let response = client
        .post(format!("{admin}/mocks"))
        .json(&mock)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // ...and the dataplane sees it on the next match.
    let response = client.get(format!("{base}/made-at-runtime")).send().await.unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.text().await.unwrap(), "fresh");

    // Request log captured both dataplane hits.
    let response = client.get(format!("{admin}/requests")).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["total"].as_u64().unwrap() >= 1);

    // Delete and the mock disappears from matching.
    let response = client
        .delete(format!("{admin}/mocks/runtime"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let response = client.get(format!("{base}/made-at-runtime")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    engine.shutdown().await;
}

#[tokio::test]
async fn no_new_connections_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(dir.path()).await;
    let addr = engine.http_addr();
    engine.shutdown().await;

    let client = reqwest::Client::new();
    let result = client
        .get(format!("http://{addr}/__mockd/health"))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}
