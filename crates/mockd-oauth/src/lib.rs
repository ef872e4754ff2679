//! # mockd OAuth
//!
//! A mock OAuth2/OIDC provider. One instance serves one configured
//! issuer: discovery and JWKS documents, the authorization endpoint
//! (code and implicit flows), the token endpoint (authorization_code,
//! client_credentials, password and refresh_token grants), plus
//! introspection, revocation and userinfo.
//!
//! Access tokens are RS256-signed JWTs with claims
//! `iss, sub, aud, iat, exp, jti, scope, client_id`; refresh tokens are
//! opaque strings bound to the issuing client and scope. Authorization
//! codes are single-use with a ~60 second lifetime — the second
//! redemption of any code yields `invalid_grant`.

pub mod endpoints;
pub mod keys;
pub mod store;

pub use keys::SigningKeys;
pub use store::{TokenStore, CODE_TTL_SECS};

use axum::routing::{get, post};
use axum::Router;
use mockd_core::model::OAuthSpec;
use mockd_core::Result;
use std::sync::Arc;

/// Shared provider state.
pub struct OAuthProvider {
    pub spec: OAuthSpec,
    pub keys: SigningKeys,
    pub store: TokenStore,
}

impl OAuthProvider {
    /// Build a provider (generates the RS256 keypair).
    pub fn new(spec: OAuthSpec) -> Result<Arc<Self>> {
        Ok(Arc::new(Self { spec, keys: SigningKeys::generate()?, store: TokenStore::default() }))
    }

    /// Issuer base with no trailing slash.
    pub fn issuer(&self) -> String {
        self.spec.issuer.trim_end_matches('/').to_string()
    }
}

/// Router serving every provider endpoint, relative to the mount path.
pub fn oauth_router(provider: Arc<OAuthProvider>) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(endpoints::discovery))
        .route("/.well-known/jwks.json", get(endpoints::jwks))
        .route("/authorize", get(endpoints::authorize))
        .route("/token", post(endpoints::token))
        .route("/introspect", post(endpoints::introspect))
        .route("/revoke", post(endpoints::revoke))
        .route("/userinfo", get(endpoints::userinfo))
        .with_state(provider)
}
