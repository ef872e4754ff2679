//! Response templating
//!
//! A minimal interpreter over `{{…}}` placeholders — deliberately not a
//! general templating library. The grammar is
//! `{{ident(.ident)* (whitespace arg)*}}` plus single-quoted literals.
//! Unknown placeholders expand to the empty string; braces that do not
//! form a placeholder pass through untouched.

use crate::fingerprint::{json_path, json_scalar_string, RequestFingerprint};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;

/// Per-request expansion context.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub fingerprint: RequestFingerprint,
    /// Values captured from path templates (`/users/{id}` style).
    pub path_params: HashMap<String, String>,
    /// Named captures from a path-pattern regex.
    pub path_pattern_params: HashMap<String, String>,
}

impl TemplateContext {
    /// Context around a request fingerprint.
    pub fn for_request(fingerprint: RequestFingerprint) -> Self {
        Self { fingerprint, ..Default::default() }
    }

    /// Attach path-pattern captures.
    pub fn with_pattern_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_pattern_params = params;
        self
    }
}

/// Hook for protocol-specific expressions (SOAP wires `xpath:` through
/// this). Returns `None` for unhandled expressions.
pub type ExpressionHook<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Expand all placeholders in `input` against the context.
pub fn expand(input: &str, ctx: &TemplateContext) -> String {
    expand_with_hook(input, ctx, None)
}

/// Expand with an optional protocol hook consulted before the built-ins.
pub fn expand_with_hook(input: &str, ctx: &TemplateContext, hook: Option<&ExpressionHook>) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find("}}") {
                let expr = input[i + 2..i + 2 + end].trim();
                out.push_str(&evaluate(expr, ctx, hook));
                i += end + 4;
                continue;
            }
        }
        // Not a placeholder start; copy the char through.
        let ch_len = input[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&input[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Expand every string leaf of a JSON value.
pub fn expand_json(value: &serde_json::Value, ctx: &TemplateContext) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(expand(s, ctx)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| expand_json(v, ctx)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), expand_json(v, ctx))).collect(),
        ),
        other => other.clone(),
    }
}

fn evaluate(expr: &str, ctx: &TemplateContext, hook: Option<&ExpressionHook>) -> String {
    if let Some(hook) = hook {
        if let Some(value) = hook(expr) {
            return value;
        }
    }

    let mut parts = expr.split_whitespace();
    let Some(head) = parts.next() else {
        return String::new();
    };

    match head {
        "uuid" => uuid::Uuid::new_v4().to_string(),
        "uuid.short" => uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        "timestamp" => Utc::now().timestamp().to_string(),
        "now" => Utc::now().to_rfc3339(),
        "random" => random_string(12),
        "random.int" => {
            let a: i64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let b: i64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(100);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            rand::rng().random_range(lo..=hi).to_string()
        }
        "random.float" => format!("{:.6}", rand::rng().random::<f64>()),
        "upper" => evaluate(&rest_of(expr, head), ctx, hook).to_uppercase(),
        "lower" => evaluate(&rest_of(expr, head), ctx, hook).to_lowercase(),
        "default" => {
            // default <expr> 'literal'
            let rest = rest_of(expr, head);
            let (inner, literal) = split_default_args(&rest);
            let value = evaluate(inner.trim(), ctx, hook);
            if value.is_empty() {
                literal
            } else {
                value
            }
        }
        _ if head.starts_with("request.") => request_lookup(head, ctx),
        _ => String::new(),
    }
}

/// Everything after the head token, preserving inner spacing.
fn rest_of(expr: &str, head: &str) -> String {
    expr[head.len()..].trim_start().to_string()
}

/// Split `default`'s arguments: the expression and the trailing
/// single-quoted literal (empty string when absent).
fn split_default_args(rest: &str) -> (String, String) {
    if let Some(open) = rest.rfind('\'') {
        if let Some(close_rel) = rest[..open].rfind('\'') {
            let literal = rest[close_rel + 1..open].to_string();
            let inner = rest[..close_rel].trim_end().to_string();
            return (inner, literal);
        }
    }
    (rest.to_string(), String::new())
}

fn request_lookup(head: &str, ctx: &TemplateContext) -> String {
    let fp = &ctx.fingerprint;
    match head {
        "request.method" => fp.method.clone(),
        "request.path" => fp.path.clone(),
        "request.url" => fp.url.clone(),
        "request.rawBody" => fp.body_text(),
        _ => {
            if let Some(key) = head.strip_prefix("request.query.") {
                fp.query.get(key).cloned().unwrap_or_default()
            } else if let Some(key) = head.strip_prefix("request.header.") {
                fp.header(key).unwrap_or_default().to_string()
            } else if let Some(key) = head.strip_prefix("request.pathParam.") {
                ctx.path_params.get(key).cloned().unwrap_or_default()
            } else if let Some(key) = head.strip_prefix("request.pathPattern.") {
                ctx.path_pattern_params.get(key).cloned().unwrap_or_default()
            } else if let Some(path) = head.strip_prefix("request.body.") {
                fp.json_body
                    .as_ref()
                    .and_then(|body| json_path(body, path))
                    .map(json_scalar_string)
                    .unwrap_or_default()
            } else {
                String::new()
            }
        }
    }
}

fn random_string(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..len).map(|_| CHARS[rng.random_range(0..CHARS.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn ctx() -> TemplateContext {
        let mut headers = Map::new();
        headers.insert("X-Request-Id".to_string(), "abc-123".to_string());
        let fp = RequestFingerprint::new(
            "POST",
            "/api/users/42",
            "/api/users/42?verbose=true",
            Some("verbose=true"),
            headers,
            br#"{"user":{"name":"ada","id":7}}"#.to_vec(),
        );
        TemplateContext::for_request(fp)
    }

    #[test]
    fn uuid_and_time_tokens() {
        let out = expand("{{uuid}}", &ctx());
        assert_eq!(out.len(), 36);
        let short = expand("{{uuid.short}}", &ctx());
        assert_eq!(short.len(), 8);
        let ts = expand("{{timestamp}}", &ctx());
        assert!(ts.parse::<i64>().is_ok());
        assert!(expand("{{now}}", &ctx()).contains('T'));
    }

    #[test]
    fn random_int_respects_bounds() {
        for _ in 0..50 {
            let out = expand("{{random.int 3 7}}", &ctx());
            let n: i64 = out.parse().unwrap();
            assert!((3..=7).contains(&n));
        }
    }

    #[test]
    fn request_primitives() {
        let c = ctx();
        assert_eq!(expand("{{request.method}}", &c), "POST");
        assert_eq!(expand("{{request.path}}", &c), "/api/users/42");
        assert_eq!(expand("{{request.query.verbose}}", &c), "true");
        assert_eq!(expand("{{request.header.x-request-id}}", &c), "abc-123");
        assert_eq!(expand("{{request.header.X-Request-Id}}", &c), "abc-123");
        assert_eq!(expand("{{request.body.user.name}}", &c), "ada");
        assert_eq!(expand("{{request.body.user.id}}", &c), "7");
    }

    #[test]
    fn missing_values_resolve_empty() {
        let c = ctx();
        assert_eq!(expand("[{{request.query.nope}}]", &c), "[]");
        assert_eq!(expand("[{{request.body.no.such.path}}]", &c), "[]");
        assert_eq!(expand("[{{unknown.token}}]", &c), "[]");
    }

    #[test]
    fn path_pattern_captures() {
        let mut params = Map::new();
        params.insert("id".to_string(), "42".to_string());
        let c = ctx().with_pattern_params(params);
        assert_eq!(expand("{{request.pathPattern.id}}", &c), "42");
    }

    #[test]
    fn case_transforms_nest() {
        let c = ctx();
        assert_eq!(expand("{{upper request.body.user.name}}", &c), "ADA");
        assert_eq!(expand("{{lower request.method}}", &c), "post");
    }

    #[test]
    fn default_literal_fallback() {
        let c = ctx();
        assert_eq!(expand("{{default request.query.nope 'fallback'}}", &c), "fallback");
        assert_eq!(expand("{{default request.query.verbose 'fallback'}}", &c), "true");
    }

    #[test]
    fn literal_braces_pass_through() {
        let c = ctx();
        assert_eq!(expand("{not} {{ }} a {template", &c), "{not}  a {template");
        assert_eq!(expand("json: { \"k\": 1 }", &c), "json: { \"k\": 1 }");
    }

    #[test]
    fn no_unresolved_tokens_remain() {
        let c = ctx();
        let out = expand("{{uuid}} {{request.method}} {{bogus}} {{request.query.x}}", &c);
        assert!(!out.contains("{{"));
    }

    #[test]
    fn hook_takes_precedence() {
        let c = ctx();
        let hook = |expr: &str| {
            expr.strip_prefix("xpath:").map(|rest| format!("<{rest}>"))
        };
        let out = expand_with_hook("{{xpath:/a/b}}:{{request.method}}", &c, Some(&hook));
        assert_eq!(out, "</a/b>:POST");
    }

    #[test]
    fn expand_json_touches_string_leaves_only() {
        let c = ctx();
        let v = serde_json::json!({"m": "{{request.method}}", "n": 3, "list": ["{{request.path}}"]});
        let out = expand_json(&v, &c);
        assert_eq!(out["m"], "POST");
        assert_eq!(out["n"], 3);
        assert_eq!(out["list"][0], "/api/users/42");
    }
}
