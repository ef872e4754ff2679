//! Request fingerprints
//!
//! The normalized tuple of request attributes the matcher evaluates.
//! Protocol handlers build one per inbound request; the matcher and the
//! template engine both read from it.

use std::collections::HashMap;

/// Normalized view of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestFingerprint {
    pub method: String,
    pub path: String,
    /// Full request URL as received.
    pub url: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Parsed JSON body, when the payload is valid JSON.
    pub json_body: Option<serde_json::Value>,
}

impl RequestFingerprint {
    /// Build a fingerprint from raw request parts. Header names are
    /// lowercased; the body is parsed as JSON opportunistically.
    pub fn new(
        method: &str,
        path: &str,
        url: &str,
        query_string: Option<&str>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        let json_body = serde_json::from_slice(&body).ok();
        let headers = headers.into_iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect();
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            url: url.to_string(),
            query: parse_query_string(query_string.unwrap_or("")),
            headers,
            body,
            json_body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Body bytes as UTF-8, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parse a query string into decoded key/value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        let key = urlencoding::decode(key).map(|s| s.into_owned()).unwrap_or_else(|_| key.to_string());
        let value =
            urlencoding::decode(value).map(|s| s.into_owned()).unwrap_or_else(|_| value.to_string());
        params.insert(key, value);
    }
    params
}

/// Descend into a JSON value along a dot path (`a.b.0.c`). Array segments
/// may be numeric indexes.
pub fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON scalar the way templates and matchers compare it: bare
/// strings without quotes, everything else via its JSON form.
pub fn json_scalar_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
