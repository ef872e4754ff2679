//! OAuth2/OIDC endpoint handlers

use crate::store::{TokenRecord, CODE_TTL_SECS};
use crate::OAuthProvider;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, Header, Validation};
use mockd_core::model::{OAuthClient, OAuthUser};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const GRANT_TYPES: [&str; 4] =
    ["authorization_code", "client_credentials", "password", "refresh_token"];

/// OAuth error body (`{error, error_description}`).
fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"error": error, "error_description": description})),
    )
        .into_response()
}

fn invalid_client() -> Response {
    oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "client authentication failed")
}

fn invalid_grant(description: &str) -> Response {
    oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", description)
}

// ---------------------------------------------------------------------------
// Discovery & JWKS
// ---------------------------------------------------------------------------

pub(crate) async fn discovery(State(provider): State<Arc<OAuthProvider>>) -> impl IntoResponse {
    let issuer = provider.issuer();
    let claims: Vec<&str> = vec!["iss", "sub", "aud", "iat", "exp", "jti", "scope", "client_id"];
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "introspection_endpoint": format!("{issuer}/introspect"),
        "revocation_endpoint": format!("{issuer}/revoke"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
        "grant_types_supported": GRANT_TYPES,
        "response_types_supported": ["code", "token"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": provider.spec.default_scopes,
        "claims_supported": claims,
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
    }))
}

pub(crate) async fn jwks(State(provider): State<Arc<OAuthProvider>>) -> impl IntoResponse {
    Json(provider.keys.jwks())
}

// ---------------------------------------------------------------------------
// Authorize
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct AuthorizeQuery {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    state: Option<String>,
    /// Mock convenience: pick the acting user without a login page.
    #[serde(default)]
    username: Option<String>,
}

pub(crate) async fn authorize(
    State(provider): State<Arc<OAuthProvider>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(client_id) = &query.client_id else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "client_id is required");
    };
    let Some(client) = find_client(&provider, client_id) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "unknown client_id");
    };
    let Some(redirect_uri) = &query.redirect_uri else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri is required");
    };
    if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
        // Never redirect to an unregistered URI.
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri not registered");
    }

    let scope = query
        .scope
        .clone()
        .unwrap_or_else(|| provider.spec.default_scopes.join(" "));
    let state_param = query
        .state
        .as_ref()
        .map(|s| format!("&state={}", urlencoding::encode(s)))
        .unwrap_or_default();
    let username = query
        .username
        .clone()
        .or_else(|| provider.spec.users.first().map(|u| u.username.clone()));

    match query.response_type.as_deref() {
        Some("code") => {
            let code = provider
                .store
                .issue_code(&client.id, redirect_uri, &scope, username)
                .await;
            debug!(client = %client.id, "authorization code issued (ttl {CODE_TTL_SECS}s)");
            Redirect::to(&format!("{redirect_uri}?code={code}{state_param}")).into_response()
        }
        Some("token") => {
            let (token, expires_in) =
                match issue_access_token(&provider, &client.id, username.as_deref(), &scope).await {
                    Ok(pair) => pair,
                    Err(response) => return response,
                };
            let fragment =
                format!("access_token={token}&token_type=Bearer&expires_in={expires_in}{state_param}");
            Redirect::to(&format!("{redirect_uri}#{fragment}")).into_response()
        }
        _ => {
            // redirect_uri is validated, so errors go back via redirect.
            Redirect::to(&format!(
                "{redirect_uri}?error=unsupported_response_type{state_param}"
            ))
            .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

pub(crate) async fn token(
    State(provider): State<Arc<OAuthProvider>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(client) = authenticate_client(&provider, &headers, &form) else {
        return invalid_client();
    };
    let grant_type = form.get("grant_type").map(String::as_str).unwrap_or("");
    if !GRANT_TYPES.contains(&grant_type) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("grant type {grant_type:?} is not supported"),
        );
    }
    if !client.grant_types.is_empty() && !client.grant_types.iter().any(|g| g == grant_type) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unauthorized_client",
            "client is not allowed this grant type",
        );
    }

    match grant_type {
        "client_credentials" => {
            let scope = form
                .get("scope")
                .cloned()
                .unwrap_or_else(|| provider.spec.default_scopes.join(" "));
            respond_with_tokens(&provider, &client, None, &scope, false).await
        }
        "password" => {
            let (Some(username), Some(password)) = (form.get("username"), form.get("password"))
            else {
                return invalid_grant("username and password are required");
            };
            let Some(user) = find_user(&provider, username) else {
                return invalid_grant("unknown user");
            };
            if &user.password != password {
                return invalid_grant("wrong password");
            }
            let scope = form
                .get("scope")
                .cloned()
                .unwrap_or_else(|| provider.spec.default_scopes.join(" "));
            let oidc = scope.split_whitespace().any(|s| s == "openid");
            respond_with_tokens(&provider, &client, Some(user.username.clone()), &scope, oidc).await
        }
        "authorization_code" => {
            let Some(code) = form.get("code") else {
                return invalid_grant("code is required");
            };
            let Some(redeemed) = provider.store.redeem_code(code).await else {
                return invalid_grant("authorization code is invalid, expired or already used");
            };
            if redeemed.client_id != client.id {
                return invalid_grant("code was issued to another client");
            }
            if let Some(redirect_uri) = form.get("redirect_uri") {
                if redirect_uri != &redeemed.redirect_uri {
                    return invalid_grant("redirect_uri mismatch");
                }
            }
            let oidc = redeemed.scope.split_whitespace().any(|s| s == "openid");
            respond_with_tokens(&provider, &client, redeemed.username, &redeemed.scope, oidc).await
        }
        "refresh_token" => {
            let Some(refresh) = form.get("refresh_token") else {
                return invalid_grant("refresh_token is required");
            };
            let Some(record) = provider.store.use_refresh(refresh, &client.id).await else {
                return invalid_grant("refresh token is invalid or expired");
            };
            let oidc = record.scope.split_whitespace().any(|s| s == "openid");
            respond_with_tokens(&provider, &client, record.username, &record.scope, oidc).await
        }
        _ => unreachable!("grant type validated above"),
    }
}

async fn respond_with_tokens(
    provider: &Arc<OAuthProvider>,
    client: &OAuthClient,
    username: Option<String>,
    scope: &str,
    include_id_token: bool,
) -> Response {
    let (access_token, expires_in) =
        match issue_access_token(provider, &client.id, username.as_deref(), scope).await {
            Ok(pair) => pair,
            Err(response) => return response,
        };
    let refresh_token = provider
        .store
        .issue_refresh(&client.id, username.clone(), scope, provider.spec.refresh_token_ttl_secs)
        .await;
    let id_token = if include_id_token {
        match issue_id_token(provider, &client.id, username.as_deref()) {
            Ok(token) => Some(token),
            Err(response) => return response,
        }
    } else {
        None
    };
    info!(client = %client.id, scope, "tokens issued");
    Json(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in,
        scope: scope.to_string(),
        refresh_token: Some(refresh_token),
        id_token,
    })
    .into_response()
}

/// Standard access-token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub scope: String,
    pub client_id: String,
}

async fn issue_access_token(
    provider: &Arc<OAuthProvider>,
    client_id: &str,
    username: Option<&str>,
    scope: &str,
) -> std::result::Result<(String, u64), Response> {
    let now = Utc::now();
    let expires_in = provider.spec.access_token_ttl_secs;
    let jti = uuid::Uuid::new_v4().to_string();
    let claims = AccessClaims {
        iss: provider.issuer(),
        sub: username.unwrap_or(client_id).to_string(),
        aud: client_id.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + expires_in as i64,
        jti: jti.clone(),
        scope: scope.to_string(),
        client_id: client_id.to_string(),
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(provider.keys.kid.clone());
    let token = jsonwebtoken::encode(&header, &claims, &provider.keys.encoding).map_err(|e| {
        oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string())
    })?;
    provider
        .store
        .track_token(
            &jti,
            TokenRecord {
                client_id: client_id.to_string(),
                username: username.map(String::from),
                scope: scope.to_string(),
                expires_at: now + chrono::Duration::seconds(expires_in as i64),
                revoked: false,
            },
        )
        .await;
    Ok((token, expires_in))
}

fn issue_id_token(
    provider: &Arc<OAuthProvider>,
    client_id: &str,
    username: Option<&str>,
) -> std::result::Result<String, Response> {
    let now = Utc::now();
    let user = username.and_then(|name| find_user(provider, name));
    let mut claims = serde_json::Map::new();
    claims.insert("iss".to_string(), provider.issuer().into());
    claims.insert(
        "sub".to_string(),
        username.unwrap_or(client_id).to_string().into(),
    );
    claims.insert("aud".to_string(), client_id.to_string().into());
    claims.insert("iat".to_string(), now.timestamp().into());
    claims.insert(
        "exp".to_string(),
        (now.timestamp() + provider.spec.access_token_ttl_secs as i64).into(),
    );
    if let Some(user) = user {
        for (key, value) in &user.claims {
            claims.insert(key.clone(), value.clone());
        }
    }
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(provider.keys.kid.clone());
    jsonwebtoken::encode(&header, &serde_json::Value::Object(claims), &provider.keys.encoding)
        .map_err(|e| oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string()))
}

// ---------------------------------------------------------------------------
// Introspect / Revoke / Userinfo
// ---------------------------------------------------------------------------

pub(crate) async fn introspect(
    State(provider): State<Arc<OAuthProvider>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if authenticate_client(&provider, &headers, &form).is_none() {
        return invalid_client();
    }
    let Some(token) = form.get("token") else {
        return Json(serde_json::json!({"active": false})).into_response();
    };
    match decode_access_token(&provider, token) {
        Some(claims) => match provider.store.active_token(&claims.jti).await {
            Some(_) => Json(serde_json::json!({
                "active": true,
                "iss": claims.iss,
                "sub": claims.sub,
                "aud": claims.aud,
                "iat": claims.iat,
                "exp": claims.exp,
                "jti": claims.jti,
                "scope": claims.scope,
                "client_id": claims.client_id,
                "token_type": "Bearer",
            }))
            .into_response(),
            None => Json(serde_json::json!({"active": false})).into_response(),
        },
        None => Json(serde_json::json!({"active": false})).into_response(),
    }
}

pub(crate) async fn revoke(
    State(provider): State<Arc<OAuthProvider>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if authenticate_client(&provider, &headers, &form).is_none() {
        return invalid_client();
    }
    if let Some(token) = form.get("token") {
        if let Some(claims) = decode_access_token(&provider, token) {
            provider.store.revoke_token(&claims.jti).await;
        } else {
            provider.store.revoke_refresh(token).await;
        }
    }
    // RFC 7009: respond 200 whether or not the token was known.
    StatusCode::OK.into_response()
}

pub(crate) async fn userinfo(
    State(provider): State<Arc<OAuthProvider>>,
    headers: HeaderMap,
) -> Response {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            [("www-authenticate", "Bearer")],
            Json(serde_json::json!({"error": "invalid_token"})),
        )
            .into_response()
    };
    let Some(token) = bearer else {
        return unauthorized();
    };
    let Some(claims) = decode_access_token(&provider, token) else {
        return unauthorized();
    };
    if provider.store.active_token(&claims.jti).await.is_none() {
        return unauthorized();
    }

    let mut body = serde_json::Map::new();
    body.insert("sub".to_string(), claims.sub.clone().into());
    if let Some(user) = find_user(&provider, &claims.sub) {
        for (key, value) in &user.claims {
            body.insert(key.clone(), value.clone());
        }
    }
    Json(serde_json::Value::Object(body)).into_response()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn find_client<'a>(provider: &'a OAuthProvider, client_id: &str) -> Option<&'a OAuthClient> {
    provider.spec.clients.iter().find(|c| c.id == client_id)
}

fn find_user<'a>(provider: &'a OAuthProvider, username: &str) -> Option<&'a OAuthUser> {
    provider.spec.users.iter().find(|u| u.username == username)
}

/// Client credentials via HTTP Basic or body fields.
fn authenticate_client(
    provider: &OAuthProvider,
    headers: &HeaderMap,
    form: &HashMap<String, String>,
) -> Option<OAuthClient> {
    let (id, secret) = if let Some(basic) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    {
        let decoded = STANDARD.decode(basic).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (id, secret) = text.split_once(':')?;
        (id.to_string(), secret.to_string())
    } else {
        (form.get("client_id")?.clone(), form.get("client_secret")?.clone())
    };
    let client = find_client(provider, &id)?;
    if client.secret == secret {
        Some(client.clone())
    } else {
        None
    }
}

/// Verify signature and expiry, returning the claims.
fn decode_access_token(provider: &OAuthProvider, token: &str) -> Option<AccessClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    jsonwebtoken::decode::<AccessClaims>(token, &provider.keys.decoding, &validation)
        .map(|data| data.claims)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{oauth_router, OAuthProvider};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use mockd_core::model::OAuthSpec;
    use tower::ServiceExt;

    fn spec() -> OAuthSpec {
        OAuthSpec {
            mount_path: "/oauth".to_string(),
            issuer: "http://localhost:3000/oauth".to_string(),
            clients: vec![OAuthClient {
                id: "test-client".to_string(),
                secret: "test-secret".to_string(),
                redirect_uris: vec!["http://localhost:9000/cb".to_string()],
                grant_types: vec![
                    "authorization_code".to_string(),
                    "client_credentials".to_string(),
                    "password".to_string(),
                    "refresh_token".to_string(),
                ],
            }],
            users: vec![OAuthUser {
                username: "alice".to_string(),
                password: "wonderland".to_string(),
                claims: [("email".to_string(), serde_json::json!("alice@example.com"))]
                    .into_iter()
                    .collect(),
            }],
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
            default_scopes: vec!["openid".to_string(), "profile".to_string()],
        }
    }

    fn router() -> (Arc<OAuthProvider>, axum::Router) {
        let provider = OAuthProvider::new(spec()).unwrap();
        (Arc::clone(&provider), oauth_router(provider))
    }

    fn basic_auth(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    async fn post_form(
        router: &axum::Router,
        path: &str,
        auth: Option<&str>,
        form: &[(&str, &str)],
    ) -> (StatusCode, serde_json::Value) {
        let body = form
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let mut builder = axum::http::Request::post(path)
            .header("content-type", "application/x-www-form-urlencoded");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn discovery_lists_absolute_endpoints() {
        let (_, router) = router();
        let response = router
            .oneshot(
                axum::http::Request::get("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["token_endpoint"], "http://localhost:3000/oauth/token");
        assert!(doc["grant_types_supported"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("client_credentials")));
    }

    #[tokio::test]
    async fn client_credentials_flow_and_wrong_secret() {
        let (_, router) = router();
        let (status, body) = post_form(
            &router,
            "/token",
            Some(&basic_auth("test-client", "test-secret")),
            &[("grant_type", "client_credentials")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["expires_in"].as_u64().unwrap() > 0);
        // Three JWT segments.
        assert_eq!(body["access_token"].as_str().unwrap().split('.').count(), 3);

        let (status, body) = post_form(
            &router,
            "/token",
            Some(&basic_auth("test-client", "wrong")),
            &[("grant_type", "client_credentials")],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_client");
    }

    #[tokio::test]
    async fn authorization_code_is_single_use() {
        let (provider, router) = router();
        let code = provider
            .store
            .issue_code("test-client", "http://localhost:9000/cb", "openid", Some("alice".into()))
            .await;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", "http://localhost:9000/cb"),
        ];
        let auth = basic_auth("test-client", "test-secret");
        let (status, body) = post_form(&router, "/token", Some(&auth), &form).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["id_token"].is_string());

        // Second redemption fails.
        let (status, body) = post_form(&router, "/token", Some(&auth), &form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn authorize_redirects_with_code() {
        let (_, router) = router();
        let response = router
            .oneshot(
                axum::http::Request::get(
                    "/authorize?client_id=test-client&redirect_uri=http%3A%2F%2Flocalhost%3A9000%2Fcb&response_type=code&state=xyz",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        let location = response.headers()["location"].to_str().unwrap().to_string();
        assert!(location.starts_with("http://localhost:9000/cb?code="));
        assert!(location.contains("state=xyz"));
    }

    #[tokio::test]
    async fn authorize_rejects_unregistered_redirect() {
        let (_, router) = router();
        let response = router
            .oneshot(
                axum::http::Request::get(
                    "/authorize?client_id=test-client&redirect_uri=http%3A%2F%2Fevil%2Fcb&response_type=code",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn password_grant_validates_credentials() {
        let (_, router) = router();
        let auth = basic_auth("test-client", "test-secret");
        let (status, _) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "password"), ("username", "alice"), ("password", "nope")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn refresh_token_grant() {
        let (_, router) = router();
        let auth = basic_auth("test-client", "test-secret");
        let (_, body) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "client_credentials")],
        )
        .await;
        let refresh = body["refresh_token"].as_str().unwrap().to_string();

        let (status, body) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].is_string());
    }

    #[tokio::test]
    async fn unsupported_grant_type() {
        let (_, router) = router();
        let (status, body) = post_form(
            &router,
            "/token",
            Some(&basic_auth("test-client", "test-secret")),
            &[("grant_type", "device_code")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn revoked_token_fails_introspection_and_userinfo() {
        let (_, router) = router();
        let auth = basic_auth("test-client", "test-secret");
        let (_, body) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")],
        )
        .await;
        let token = body["access_token"].as_str().unwrap().to_string();

        // Active before revocation.
        let (_, body) =
            post_form(&router, "/introspect", Some(&auth), &[("token", token.as_str())]).await;
        assert_eq!(body["active"], true);
        assert_eq!(body["sub"], "alice");

        let (status, _) =
            post_form(&router, "/revoke", Some(&auth), &[("token", token.as_str())]).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) =
            post_form(&router, "/introspect", Some(&auth), &[("token", token.as_str())]).await;
        assert_eq!(body["active"], false);

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::get("/userinfo")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "Bearer");
    }

    #[tokio::test]
    async fn userinfo_returns_user_claims() {
        let (_, router) = router();
        let auth = basic_auth("test-client", "test-secret");
        let (_, body) = post_form(
            &router,
            "/token",
            Some(&auth),
            &[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")],
        )
        .await;
        let token = body["access_token"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::get("/userinfo")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let claims: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn jwks_serves_rsa_key() {
        let (_, router) = router();
        let response = router
            .oneshot(
                axum::http::Request::get("/.well-known/jwks.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let jwks: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(jwks["keys"][0]["kty"], "RSA");
        assert!(jwks["keys"][0]["kid"].is_string());
    }
}
