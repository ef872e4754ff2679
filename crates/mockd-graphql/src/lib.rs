//! # mockd GraphQL
//!
//! Canned GraphQL responses. Operations are matched textually — by the
//! request's `operationName`, the name after `query`/`mutation`/
//! `subscription`, or the first top-level field — and answered with the
//! configured `data` value after template expansion. There is no schema
//! execution; this handler mocks GraphQL backends the same way the HTTP
//! handler mocks REST ones.

use mockd_core::model::{GraphQlSpec, MockSpec};
use mockd_core::{
    MockCatalogue, Protocol, RequestFingerprint, RequestLog, RequestLogEntry, TemplateContext,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shared state for the GraphQL plane.
#[derive(Clone)]
pub struct GraphQlState {
    pub catalogue: Arc<MockCatalogue>,
    pub request_log: RequestLog,
}

impl GraphQlState {
    pub fn new(catalogue: Arc<MockCatalogue>, request_log: RequestLog) -> Self {
        Self { catalogue, request_log }
    }
}

/// A GraphQL request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
}

/// Find the GraphQL mock declared for a path.
pub fn find_graphql_mock(state: &GraphQlState, path: &str) -> Option<(String, GraphQlSpec)> {
    let snapshot = state.catalogue.snapshot();
    for stored in snapshot.iter_protocol(Protocol::GraphQl) {
        if let MockSpec::GraphQl(spec) = &stored.mock.spec {
            if spec.path == path {
                return Some((stored.mock.id.clone(), spec.clone()));
            }
        }
    }
    None
}

/// Serve one request against a GraphQL mock. POST bodies are
/// `{query, operationName?, variables?}`; GET accepts `?query=`.
/// Returns `None` when no GraphQL mock is declared for the path.
pub async fn handle_graphql(state: &GraphQlState, fp: &RequestFingerprint) -> Option<Response> {
    let (mock_id, spec) = find_graphql_mock(state, &fp.path)?;
    let started = Instant::now();

    let request = extract_request(fp);
    let response = match request {
        Some(request) => respond(&spec, &request, fp),
        None => graphql_error("could not parse GraphQL request"),
    };
    let status = response.status().as_u16();
    state
        .request_log
        .record(RequestLogEntry::new(
            Protocol::GraphQl,
            &fp.method,
            &fp.path,
            Some(mock_id),
            status,
            started.elapsed().as_millis() as u64,
        ))
        .await;
    Some(response)
}

fn extract_request(fp: &RequestFingerprint) -> Option<GraphQlRequest> {
    if fp.method == "GET" {
        let query = fp.query.get("query")?.clone();
        return Some(GraphQlRequest {
            query,
            operation_name: fp.query.get("operationName").cloned(),
            variables: None,
        });
    }
    serde_json::from_slice(&fp.body).ok()
}

fn respond(spec: &GraphQlSpec, request: &GraphQlRequest, fp: &RequestFingerprint) -> Response {
    let operation = request
        .operation_name
        .clone()
        .or_else(|| parse_operation_name(&request.query))
        .or_else(|| parse_first_field(&request.query));

    let Some(operation) = operation else {
        return graphql_error("no operation found in query");
    };

    if operation == "__schema" || operation == "IntrospectionQuery" {
        return Json(serde_json::json!({
            "data": {"__schema": {"queryType": {"name": "Query"}, "types": []}}
        }))
        .into_response();
    }

    match spec.operations.get(&operation) {
        Some(template) => {
            info!(%operation, "graphql operation matched");
            let ctx = TemplateContext::for_request(fp.clone());
            let data = mockd_core::expand_json(template, &ctx);
            Json(serde_json::json!({"data": {operation: data}})).into_response()
        }
        None => {
            debug!(%operation, "graphql operation not mocked");
            graphql_error(&format!("operation {operation:?} is not mocked"))
        }
    }
}

/// `query GetUser(...) {...}` → `GetUser`.
fn parse_operation_name(query: &str) -> Option<String> {
    let trimmed = query.trim_start();
    let rest = trimmed
        .strip_prefix("query")
        .or_else(|| trimmed.strip_prefix("mutation"))
        .or_else(|| trimmed.strip_prefix("subscription"))?;
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `{ user(id: 1) { name } }` → `user`.
fn parse_first_field(query: &str) -> Option<String> {
    let body_start = query.find('{')?;
    let name: String = query[body_start + 1..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// GraphQL transports errors in a 200 body.
fn graphql_error(message: &str) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({"data": null, "errors": [{"message": message}]})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::model::Mock;
    use std::collections::HashMap;

    fn graphql_mock() -> Mock {
        let mut operations = HashMap::new();
        operations.insert(
            "GetUser".to_string(),
            serde_json::json!({"id": "{{request.body.variables.id}}", "name": "Ada"}),
        );
        operations.insert("user".to_string(), serde_json::json!({"name": "First"}));
        Mock {
            id: "gql".to_string(),
            name: "graphql".to_string(),
            enabled: true,
            protocol: Protocol::GraphQl,
            spec: MockSpec::GraphQl(GraphQlSpec {
                path: "/graphql".to_string(),
                operations,
            }),
            priority: 0,
            workspace: None,
            created_at: None,
        }
    }

    fn state() -> GraphQlState {
        let state =
            GraphQlState::new(Arc::new(MockCatalogue::in_memory()), RequestLog::new(10));
        state.catalogue.create(graphql_mock()).unwrap();
        state
    }

    fn post_fp(body: serde_json::Value) -> RequestFingerprint {
        RequestFingerprint::new(
            "POST",
            "/graphql",
            "/graphql",
            None,
            HashMap::new(),
            body.to_string().into_bytes(),
        )
    }

    async fn json_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn named_operation_matches() {
        let state = state();
        let fp = post_fp(serde_json::json!({
            "query": "query GetUser($id: ID!) { user(id: $id) { name } }",
            "variables": {"id": 7}
        }));
        let response = handle_graphql(&state, &fp).await.unwrap();
        let body = json_of(response).await;
        assert_eq!(body["data"]["GetUser"]["name"], "Ada");
        assert_eq!(body["data"]["GetUser"]["id"], "7");
    }

    #[tokio::test]
    async fn anonymous_query_uses_first_field() {
        let state = state();
        let fp = post_fp(serde_json::json!({"query": "{ user { name } }"}));
        let response = handle_graphql(&state, &fp).await.unwrap();
        let body = json_of(response).await;
        assert_eq!(body["data"]["user"]["name"], "First");
    }

    #[tokio::test]
    async fn unmocked_operation_reports_error() {
        let state = state();
        let fp = post_fp(serde_json::json!({"query": "query Nope { x }"}));
        let response = handle_graphql(&state, &fp).await.unwrap();
        let body = json_of(response).await;
        assert!(body["data"].is_null());
        assert!(body["errors"][0]["message"].as_str().unwrap().contains("Nope"));
    }

    #[tokio::test]
    async fn get_with_query_param() {
        let state = state();
        let fp = RequestFingerprint::new(
            "GET",
            "/graphql",
            "/graphql?query=%7B%20user%20%7B%20name%20%7D%20%7D",
            Some("query=%7B%20user%20%7B%20name%20%7D%20%7D"),
            HashMap::new(),
            vec![],
        );
        let response = handle_graphql(&state, &fp).await.unwrap();
        let body = json_of(response).await;
        assert_eq!(body["data"]["user"]["name"], "First");
    }

    #[tokio::test]
    async fn other_path_returns_none() {
        let state = state();
        let fp = RequestFingerprint::new("POST", "/api", "/api", None, HashMap::new(), vec![]);
        assert!(handle_graphql(&state, &fp).await.is_none());
    }

    #[test]
    fn operation_name_parsing() {
        assert_eq!(parse_operation_name("query GetUser { x }").as_deref(), Some("GetUser"));
        assert_eq!(parse_operation_name("mutation Save { x }").as_deref(), Some("Save"));
        assert_eq!(parse_operation_name("{ user }"), None);
        assert_eq!(parse_first_field("{ user { name } }").as_deref(), Some("user"));
    }
}
