//! Mock definitions and per-protocol specs
//!
//! These are the wire/config shapes: everything here round-trips through
//! serde with camelCase field names so that YAML/JSON config files and the
//! admin API share one schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocols a mock can be declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "soap")]
    Soap,
    #[serde(rename = "graphql")]
    GraphQl,
    #[serde(rename = "grpc")]
    Grpc,
    #[serde(rename = "mqtt")]
    Mqtt,
    #[serde(rename = "oauth")]
    OAuth,
}

impl Protocol {
    /// Display name used in logs and the request log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::WebSocket => "WebSocket",
            Self::Sse => "SSE",
            Self::Soap => "SOAP",
            Self::GraphQl => "GraphQL",
            Self::Grpc => "gRPC",
            Self::Mqtt => "MQTT",
            Self::OAuth => "OAuth",
        }
    }
}

/// A single mock: identity, protocol tag and the protocol-specific spec.
///
/// Deserialization is hand-rolled: the `spec` payload is interpreted
/// according to the `protocol` tag, so shapes that would be ambiguous
/// under untagged dispatch (WebSocket vs SOAP, both keyed by `path`)
/// stay unambiguous.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mock {
    /// Stable identifier, unique per catalogue. Generated when empty.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Disabled mocks are invisible to the matcher but returned by admin reads.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub protocol: Protocol,
    /// Protocol-specific matcher/response spec.
    pub spec: MockSpec,
    /// Tie-breaker when match scores are equal; higher wins.
    #[serde(default)]
    pub priority: i32,
    /// Workspace label for grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Server-assigned; excluded from client-facing equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl<'de> Deserialize<'de> for Mock {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawMock {
            #[serde(default)]
            id: String,
            #[serde(default)]
            name: String,
            #[serde(default = "default_true")]
            enabled: bool,
            protocol: Protocol,
            spec: serde_json::Value,
            #[serde(default)]
            priority: i32,
            #[serde(default)]
            workspace: Option<String>,
            #[serde(default)]
            created_at: Option<DateTime<Utc>>,
        }

        let raw = RawMock::deserialize(deserializer)?;
        let spec = match raw.protocol {
            Protocol::Http | Protocol::Sse => {
                MockSpec::Http(serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?)
            }
            Protocol::WebSocket => MockSpec::WebSocket(
                serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?,
            ),
            Protocol::Grpc => {
                MockSpec::Grpc(serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?)
            }
            Protocol::Soap => {
                MockSpec::Soap(serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?)
            }
            Protocol::GraphQl => MockSpec::GraphQl(
                serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?,
            ),
            Protocol::Mqtt => {
                MockSpec::Mqtt(serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?)
            }
            Protocol::OAuth => {
                MockSpec::OAuth(serde_json::from_value(raw.spec).map_err(serde::de::Error::custom)?)
            }
        };
        Ok(Self {
            id: raw.id,
            name: raw.name,
            enabled: raw.enabled,
            protocol: raw.protocol,
            spec,
            priority: raw.priority,
            workspace: raw.workspace,
            created_at: raw.created_at,
        })
    }
}

impl Mock {
    /// Validate internal consistency (spec variant matches the protocol tag).
    pub fn validate(&self) -> crate::Result<()> {
        let ok = matches!(
            (&self.protocol, &self.spec),
            (Protocol::Http | Protocol::Sse, MockSpec::Http(_))
                | (Protocol::WebSocket, MockSpec::WebSocket(_))
                | (Protocol::Soap, MockSpec::Soap(_))
                | (Protocol::GraphQl, MockSpec::GraphQl(_))
                | (Protocol::Grpc, MockSpec::Grpc(_))
                | (Protocol::Mqtt, MockSpec::Mqtt(_))
                | (Protocol::OAuth, MockSpec::OAuth(_))
        );
        if !ok {
            return Err(crate::Error::validation(format!(
                "mock {}: spec does not match protocol {}",
                self.id,
                self.protocol.as_str()
            )));
        }
        if let MockSpec::Http(spec) = &self.spec {
            if let Some(pattern) = &spec.matcher.path_pattern {
                regex::Regex::new(pattern)?;
            }
            if let Some(pattern) = &spec.matcher.body_pattern {
                regex::Regex::new(pattern)?;
            }
        }
        Ok(())
    }
}

/// Protocol-specific spec payload; serialized as the bare inner shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MockSpec {
    Http(HttpSpec),
    WebSocket(WsSpec),
    Grpc(GrpcSpec),
    Soap(SoapSpec),
    GraphQl(GraphQlSpec),
    Mqtt(MqttSpec),
    OAuth(OAuthSpec),
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// HTTP mock: a matcher and a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSpec {
    #[serde(default)]
    pub matcher: HttpMatcher,
    pub response: HttpResponseSpec,
}

/// Declared request constraints; all present fields must agree (AND).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Exact path, or `*` to match any path (contributes no score).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Regex with optional named captures, exposed to templates as
    /// `request.pathPattern.<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    /// key -> expected value, exact.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    /// key -> expected value; `*x` suffix, `x*` prefix, `*x*` contains.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_pattern: Option<String>,
    /// Dot-path into the parsed JSON body -> expected scalar.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub body_json_path: HashMap<String, serde_json::Value>,
}

/// Declared response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Body template, expanded per request.
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// When present, the handler switches to `text/event-stream` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse: Option<SseBlock>,
}

fn default_status() -> u16 {
    200
}

/// Ordered SSE event list with fixed pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseBlock {
    pub events: Vec<SseEvent>,
    /// Delay between events, milliseconds.
    #[serde(default)]
    pub fixed_delay_ms: u64,
    /// Stop after this many events; 0 means the whole list once.
    #[serde(default)]
    pub max_events: usize,
}

/// One declared SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: String,
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// WebSocket mock behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsSpec {
    pub path: String,
    #[serde(default)]
    pub mode: WsMode,
    /// Outbound frames for `script` mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<WsScriptFrame>,
    /// Close the connection after the script completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<WsClose>,
}

/// Server behavior once the upgrade completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsMode {
    #[default]
    Echo,
    Script,
}

/// One scripted outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsScriptFrame {
    /// Text payload; run through the template engine.
    pub data: String,
    #[serde(default)]
    pub delay_ms: u64,
    /// Send as a binary frame instead of text.
    #[serde(default)]
    pub binary: bool,
}

/// Scripted close condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsClose {
    #[serde(default = "default_close_code")]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
}

fn default_close_code() -> u16 {
    1000
}

// ---------------------------------------------------------------------------
// gRPC
// ---------------------------------------------------------------------------

/// gRPC mock: a per-mock server on its own port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSpec {
    pub port: u16,
    /// Path to the .proto file loaded at mock start.
    pub proto_file: String,
    /// "pkg.Service/Method" -> behavior.
    #[serde(default)]
    pub methods: HashMap<String, GrpcMethodSpec>,
    /// Status served by grpc.health.v1.Health/Check; 1 = SERVING.
    #[serde(default = "default_health_status")]
    pub health_status: i32,
}

fn default_health_status() -> i32 {
    1
}

/// Behavior for one gRPC method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcMethodSpec {
    /// Unary response object (JSON shape of the output message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    /// Ordered responses for streaming methods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<serde_json::Value>,
    /// Delay between server-stream sends, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_delay_ms: Option<u64>,
    /// Cycle `responses` in bidirectional mode instead of terminating.
    #[serde(default)]
    pub cycle: bool,
    /// Return this status instead of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GrpcErrorSpec>,
}

/// Canonical gRPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcErrorSpec {
    /// Canonical status name, e.g. "NOT_FOUND", "UNAVAILABLE".
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// SOAP
// ---------------------------------------------------------------------------

/// SOAP mock: WSDL plus per-operation responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapSpec {
    pub path: String,
    /// WSDL document served on `GET ?wsdl`.
    #[serde(default)]
    pub wsdl: String,
    #[serde(default)]
    pub operations: HashMap<String, SoapOperationSpec>,
}

/// Behavior for one SOAP operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapOperationSpec {
    /// SOAPAction binding; falls back to the Body child element name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soap_action: Option<String>,
    /// Response body template (inner XML, wrapped in a matching envelope).
    #[serde(default)]
    pub response: String,
    /// XPath expression -> expected text; any mismatch treats the
    /// operation as unknown.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub xpath_match: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<SoapFaultSpec>,
}

/// Declared SOAP fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapFaultSpec {
    /// "Client" or "Server"; mapped to Sender/Receiver for SOAP 1.2.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// GraphQL
// ---------------------------------------------------------------------------

/// GraphQL mock: canned responses per operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlSpec {
    #[serde(default = "default_graphql_path")]
    pub path: String,
    /// Operation name or top-level field -> response `data` value template.
    #[serde(default)]
    pub operations: HashMap<String, serde_json::Value>,
}

fn default_graphql_path() -> String {
    "/graphql".to_string()
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

/// MQTT mock: an embedded broker on its own port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSpec {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<MqttAuth>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<MqttTopicSpec>,
}

/// CONNECT authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttAuth {
    #[serde(default)]
    pub enabled: bool,
    /// username -> password.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

/// Declared behavior for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttTopicSpec {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic: Option<MqttPeriodic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_publish: Option<MqttOnPublish>,
}

/// Periodic publish schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttPeriodic {
    /// Payload template.
    pub payload: String,
    pub interval_ms: u64,
    /// Number of publishes; 0 repeats forever.
    #[serde(default)]
    pub repeat: u64,
}

/// Reaction to a client publish on the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MqttOnPublish {
    /// Republish this payload (template) to the same topic.
    Respond { payload: String },
    /// Forward the received payload to another topic.
    Forward { forward_to: String },
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

/// OAuth2/OIDC provider mock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSpec {
    #[serde(default = "default_oauth_mount")]
    pub mount_path: String,
    pub issuer: String,
    #[serde(default)]
    pub clients: Vec<OAuthClient>,
    #[serde(default)]
    pub users: Vec<OAuthUser>,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default)]
    pub default_scopes: Vec<String>,
}

fn default_oauth_mount() -> String {
    "/oauth".to_string()
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    86400
}

/// Registered OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
}

/// Registered resource-owner user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
}
