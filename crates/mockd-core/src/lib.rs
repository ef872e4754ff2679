//! # mockd core
//!
//! Core functionality shared by every mockd protocol crate: the mock data
//! model and catalogue, the request-matching engine, the template engine,
//! the chaos layer, the served-request log and config loading.
//!
//! The dataplane flow is: a protocol handler builds a
//! [`RequestFingerprint`], asks the [`matcher`] for the winning mock
//! against the current catalogue [snapshot](catalogue::CatalogueSnapshot),
//! consults the [`ChaosEngine`], renders the response through
//! [`template`], and records the outcome in the [`RequestLog`].
//!
//! ## Quick start
//!
//! ```rust
//! use mockd_core::catalogue::MockCatalogue;
//! use mockd_core::fingerprint::RequestFingerprint;
//! use mockd_core::matcher;
//! use std::collections::HashMap;
//!
//! let catalogue = MockCatalogue::in_memory();
//! // ... create mocks through the admin API or a config file ...
//! let fp = RequestFingerprint::new(
//!     "GET", "/api/hello", "/api/hello", None, HashMap::new(), Vec::new(),
//! );
//! let hit = matcher::match_http(&catalogue.snapshot(), &fp);
//! assert!(hit.is_none());
//! ```

pub mod catalogue;
pub mod chaos;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod model;
pub mod request_log;
pub mod shutdown;
pub mod template;

pub use catalogue::{CatalogueSnapshot, ListFilter, MockCatalogue, StoredMock};
pub use chaos::{ChaosConfig, ChaosDecision, ChaosEngine, ChaosErrorRate, ChaosLatency};
pub use config::{interpolate_env, load_config_file, EngineSettings, MockConfigFile};
pub use error::{Error, Result};
pub use fingerprint::{json_path, json_scalar_string, parse_query_string, RequestFingerprint};
pub use matcher::{match_http, match_one, MatchOutcome};
pub use model::{
    GraphQlSpec, GrpcErrorSpec, GrpcMethodSpec, GrpcSpec, HttpMatcher, HttpResponseSpec, HttpSpec,
    Mock, MockSpec, MqttAuth, MqttOnPublish, MqttPeriodic, MqttSpec, MqttTopicSpec, OAuthClient,
    OAuthSpec, OAuthUser, Protocol, SoapFaultSpec, SoapOperationSpec, SoapSpec, SseBlock, SseEvent,
    WsClose, WsMode, WsScriptFrame, WsSpec,
};
pub use request_log::{RequestLog, RequestLogEntry};
pub use shutdown::{ShutdownController, ShutdownToken};
pub use template::{expand, expand_json, expand_with_hook, TemplateContext};
