//! Mock config file loading
//!
//! YAML or JSON files with shape `{version, name?, mocks: [Mock]}`.
//! `${VAR}` and `${VAR:-default}` environment interpolation runs over the
//! raw text before parsing, so interpolation works anywhere in the file.

use crate::model::Mock;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level mock config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfigFile {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub mocks: Vec<Mock>,
}

/// Engine-level knobs carried alongside the mock list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Request log ring capacity.
    pub max_request_log: usize,
    /// Per-request read/write timeout, seconds.
    pub io_timeout_secs: u64,
    /// Graceful shutdown drain deadline, seconds.
    pub drain_deadline_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { max_request_log: 1000, io_timeout_secs: 30, drain_deadline_secs: 5 }
    }
}

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("env var pattern")
});

/// Interpolate `${VAR}` / `${VAR:-default}` against the process
/// environment. A required variable that is unset is a validation error.
pub fn interpolate_env(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let out = ENV_VAR.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(3) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            },
        }
    });
    if missing.is_empty() {
        Ok(out.into_owned())
    } else {
        Err(Error::validation(format!(
            "unset environment variables in config: {}",
            missing.join(", ")
        )))
    }
}

/// Load a config file, interpolating the environment first. The format is
/// chosen by extension (`.json` → JSON, everything else YAML).
pub fn load_config_file(path: impl AsRef<Path>) -> Result<MockConfigFile> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("cannot read config {}: {e}", path.display())))?;
    let text = interpolate_env(&raw)?;
    let config: MockConfigFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&text)?
    };
    if config.version != "1.0" {
        return Err(Error::validation(format!(
            "unsupported config version {:?} (expected \"1.0\")",
            config.version
        )));
    }
    for mock in &config.mocks {
        mock.validate()?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn interpolation_with_defaults() {
        std::env::set_var("MOCKD_TEST_SET", "value");
        let out = interpolate_env("a=${MOCKD_TEST_SET} b=${MOCKD_TEST_UNSET:-fallback}").unwrap();
        assert_eq!(out, "a=value b=fallback");
    }

    #[test]
    fn missing_required_var_errors() {
        let err = interpolate_env("x=${MOCKD_DEFINITELY_UNSET_VAR}").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn empty_default_is_allowed() {
        let out = interpolate_env("x=${MOCKD_UNSET_WITH_EMPTY:-}").unwrap();
        assert_eq!(out, "x=");
    }

    #[test]
    fn loads_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
version: "1.0"
name: demo
mocks:
  - id: hello
    protocol: http
    spec:
      matcher:
        method: GET
        path: /api/hello
      response:
        status: 200
        body: "Hello, World!"
"#
        )
        .unwrap();
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("demo"));
        assert_eq!(config.mocks.len(), 1);
        assert_eq!(config.mocks[0].id, "hello");
    }

    #[test]
    fn loads_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"version":"1.0","mocks":[{{"id":"j","protocol":"http","spec":{{"response":{{"status":204,"body":""}}}}}}]}}"#
        )
        .unwrap();
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.mocks[0].id, "j");
    }

    #[test]
    fn rejects_unknown_version() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "version: \"2.0\"\nmocks: []\n").unwrap();
        assert!(load_config_file(file.path()).is_err());
    }
}
