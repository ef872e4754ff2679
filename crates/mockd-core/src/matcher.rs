//! Score-based mock selection
//!
//! Each enabled mock of the request's protocol is checked field by field;
//! every declared constraint must agree (AND). Matching mocks are ranked
//! by an additive specificity score, then priority, then creation order.

use crate::catalogue::{CatalogueSnapshot, StoredMock};
use crate::fingerprint::{json_path, json_scalar_string, RequestFingerprint};
use crate::model::{HttpMatcher, MockSpec, Protocol};
use regex::Regex;
use std::collections::HashMap;

/// Field weights. An undeclared field contributes nothing; a wildcard
/// path (`*`) matches everything and scores 0.
const WEIGHT_PATH_EXACT: u32 = 100;
const WEIGHT_PATH_PATTERN: u32 = 50;
const WEIGHT_FIELD: u32 = 10;
const WEIGHT_METHOD: u32 = 1;

/// Outcome of a winning match.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub mock_id: String,
    pub score: u32,
    /// Named captures from the path pattern.
    pub path_pattern_params: HashMap<String, String>,
}

/// Select the winning HTTP mock for a fingerprint, if any.
///
/// Winner: highest score; priority breaks ties (higher wins); earlier
/// creation breaks remaining ties. Snapshot iteration is in creation
/// order, so a strict `>` comparison implements the last tie-break.
pub fn match_http(snapshot: &CatalogueSnapshot, fp: &RequestFingerprint) -> Option<MatchOutcome> {
    let mut best: Option<(MatchOutcome, i32)> = None;

    for stored in snapshot.iter_protocol(Protocol::Http) {
        let MockSpec::Http(spec) = &stored.mock.spec else {
            continue;
        };
        let Some((score, params)) = match_one(&spec.matcher, fp) else {
            continue;
        };
        let outcome = MatchOutcome {
            mock_id: stored.mock.id.clone(),
            score,
            path_pattern_params: params,
        };
        let priority = stored.mock.priority;
        let better = match &best {
            None => true,
            Some((current, current_priority)) => {
                score > current.score
                    || (score == current.score && priority > *current_priority)
            }
        };
        if better {
            best = Some((outcome, priority));
        }
    }

    best.map(|(outcome, _)| outcome)
}

/// Check one matcher against the fingerprint. Returns the additive score
/// and path-pattern captures on success.
pub fn match_one(
    matcher: &HttpMatcher,
    fp: &RequestFingerprint,
) -> Option<(u32, HashMap<String, String>)> {
    let mut score = 0u32;
    let mut params = HashMap::new();

    if let Some(method) = &matcher.method {
        if !method.eq_ignore_ascii_case(&fp.method) {
            return None;
        }
        score += WEIGHT_METHOD;
    }

    if let Some(path) = &matcher.path {
        if path == "*" {
            // Matches any path, contributes nothing.
        } else if path == &fp.path {
            score += WEIGHT_PATH_EXACT;
        } else {
            return None;
        }
    }

    if let Some(pattern) = &matcher.path_pattern {
        let re = Regex::new(pattern).ok()?;
        let captures = re.captures(&fp.path)?;
        for name in re.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                params.insert(name.to_string(), m.as_str().to_string());
            }
        }
        score += WEIGHT_PATH_PATTERN;
    }

    for (key, expected) in &matcher.query {
        if fp.query.get(key) != Some(expected) {
            return None;
        }
        score += WEIGHT_FIELD;
    }

    for (name, expected) in &matcher.headers {
        let value = fp.header(name)?;
        if !header_value_matches(expected, value) {
            return None;
        }
        score += WEIGHT_FIELD;
    }

    if !matcher.body_json_path.is_empty() {
        let body = fp.json_body.as_ref()?;
        for (path, expected) in &matcher.body_json_path {
            let actual = json_path(body, path)?;
            if json_scalar_string(actual) != json_scalar_string(expected) {
                return None;
            }
            score += WEIGHT_FIELD;
        }
    }

    if let Some(needle) = &matcher.body_contains {
        if !fp.body_text().contains(needle.as_str()) {
            return None;
        }
        score += WEIGHT_FIELD;
    }

    if let Some(expected) = &matcher.body_equals {
        if fp.body_text() != *expected {
            return None;
        }
        score += WEIGHT_FIELD;
    }

    if let Some(pattern) = &matcher.body_pattern {
        let re = Regex::new(pattern).ok()?;
        if !re.is_match(&fp.body_text()) {
            return None;
        }
        score += WEIGHT_FIELD;
    }

    Some((score, params))
}

/// Header expectation with `*` wildcards: `*x` suffix, `x*` prefix,
/// `*x*` contains, otherwise exact.
fn header_value_matches(expected: &str, actual: &str) -> bool {
    let starts = expected.starts_with('*');
    let ends = expected.ends_with('*') && expected.len() > 1;
    match (starts, ends) {
        (true, true) => actual.contains(&expected[1..expected.len() - 1]),
        (true, false) => actual.ends_with(&expected[1..]),
        (false, true) => actual.starts_with(&expected[..expected.len() - 1]),
        (false, false) => actual == expected,
    }
}

/// Look up a stored mock by the outcome id.
pub fn resolve<'a>(snapshot: &'a CatalogueSnapshot, outcome: &MatchOutcome) -> Option<&'a StoredMock> {
    snapshot.get(&outcome.mock_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::MockCatalogue;
    use crate::model::{HttpResponseSpec, HttpSpec, Mock};
    use std::collections::HashMap as Map;

    fn make_mock(id: &str, matcher: HttpMatcher, priority: i32) -> Mock {
        Mock {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            protocol: Protocol::Http,
            spec: MockSpec::Http(HttpSpec {
                matcher,
                response: HttpResponseSpec {
                    status: 200,
                    headers: Map::new(),
                    body: String::new(),
                    delay_ms: None,
                    sse: None,
                },
            }),
            priority,
            workspace: None,
            created_at: None,
        }
    }

    fn fp(method: &str, path: &str) -> RequestFingerprint {
        RequestFingerprint::new(method, path, path, None, Map::new(), Vec::new())
    }

    #[test]
    fn exact_path_beats_wildcard_regardless_of_priority() {
        let catalogue = MockCatalogue::in_memory();
        catalogue
            .create(make_mock(
                "wild",
                HttpMatcher { path: Some("*".to_string()), ..Default::default() },
                1000,
            ))
            .unwrap();
        catalogue
            .create(make_mock(
                "specific",
                HttpMatcher { path: Some("/x/specific".to_string()), ..Default::default() },
                1,
            ))
            .unwrap();

        let snapshot = catalogue.snapshot();
        let hit = match_http(&snapshot, &fp("GET", "/x/specific")).unwrap();
        assert_eq!(hit.mock_id, "specific");

        let hit = match_http(&snapshot, &fp("GET", "/x/other")).unwrap();
        assert_eq!(hit.mock_id, "wild");
    }

    #[test]
    fn priority_breaks_score_ties() {
        let catalogue = MockCatalogue::in_memory();
        for (id, priority) in [("low", 0), ("high", 10)] {
            catalogue
                .create(make_mock(
                    id,
                    HttpMatcher { path: Some("/same".to_string()), ..Default::default() },
                    priority,
                ))
                .unwrap();
        }
        let hit = match_http(&catalogue.snapshot(), &fp("GET", "/same")).unwrap();
        assert_eq!(hit.mock_id, "high");
    }

    #[test]
    fn creation_order_breaks_remaining_ties() {
        let catalogue = MockCatalogue::in_memory();
        for id in ["first", "second"] {
            catalogue
                .create(make_mock(
                    id,
                    HttpMatcher { path: Some("/same".to_string()), ..Default::default() },
                    5,
                ))
                .unwrap();
        }
        let hit = match_http(&catalogue.snapshot(), &fp("GET", "/same")).unwrap();
        assert_eq!(hit.mock_id, "first");
    }

    #[test]
    fn disabled_mocks_are_invisible() {
        let catalogue = MockCatalogue::in_memory();
        let mut mock = make_mock(
            "off",
            HttpMatcher { path: Some("/x".to_string()), ..Default::default() },
            0,
        );
        mock.enabled = false;
        catalogue.create(mock).unwrap();
        assert!(match_http(&catalogue.snapshot(), &fp("GET", "/x")).is_none());
    }

    #[test]
    fn named_captures_are_exposed() {
        let matcher = HttpMatcher {
            path_pattern: Some(r"^/api/users/(?P<id>\d+)$".to_string()),
            ..Default::default()
        };
        let (score, params) = match_one(&matcher, &fp("GET", "/api/users/42")).unwrap();
        assert_eq!(score, WEIGHT_PATH_PATTERN);
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn method_only_mock_still_matches() {
        let matcher = HttpMatcher { method: Some("GET".to_string()), ..Default::default() };
        let (score, _) = match_one(&matcher, &fp("GET", "/whatever")).unwrap();
        assert_eq!(score, WEIGHT_METHOD);
    }

    #[test]
    fn header_wildcards() {
        assert!(header_value_matches("*json", "application/json"));
        assert!(header_value_matches("application*", "application/json"));
        assert!(header_value_matches("*cation/js*", "application/json"));
        assert!(header_value_matches("exact", "exact"));
        assert!(!header_value_matches("exact", "exactly"));
        assert!(!header_value_matches("*xml", "application/json"));
    }

    #[test]
    fn declared_fields_all_required() {
        let mut query = Map::new();
        query.insert("page".to_string(), "1".to_string());
        let matcher = HttpMatcher {
            path: Some("/list".to_string()),
            query,
            ..Default::default()
        };
        let mut fp_ok =
            RequestFingerprint::new("GET", "/list", "/list?page=1", Some("page=1"), Map::new(), vec![]);
        let (score, _) = match_one(&matcher, &fp_ok).unwrap();
        assert_eq!(score, WEIGHT_PATH_EXACT + WEIGHT_FIELD);

        fp_ok.query.clear();
        assert!(match_one(&matcher, &fp_ok).is_none());
    }

    #[test]
    fn body_json_path_compares_scalars() {
        let matcher = HttpMatcher {
            body_json_path: [("user.role".to_string(), serde_json::json!("admin"))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let fp_ok = RequestFingerprint::new(
            "POST",
            "/x",
            "/x",
            None,
            Map::new(),
            br#"{"user":{"role":"admin"}}"#.to_vec(),
        );
        assert!(match_one(&matcher, &fp_ok).is_some());

        let fp_bad = RequestFingerprint::new(
            "POST",
            "/x",
            "/x",
            None,
            Map::new(),
            br#"{"user":{"role":"guest"}}"#.to_vec(),
        );
        assert!(match_one(&matcher, &fp_bad).is_none());
    }
}
