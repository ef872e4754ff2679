//! Token and authorization-code state
//!
//! Authorization codes are single-use and expire after ~60 seconds.
//! Access tokens are tracked by `jti` for introspection and revocation;
//! refresh tokens are opaque random strings bound to the issuing client
//! and the originally granted scope.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Authorization-code validity window.
pub const CODE_TTL_SECS: i64 = 60;

/// A minted, not-yet-redeemed authorization code.
#[derive(Debug, Clone)]
pub struct AuthCode {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub username: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Tracked access token (by jti).
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub client_id: String,
    pub username: Option<String>,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// Opaque refresh token state.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub client_id: String,
    pub username: Option<String>,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

/// In-memory OAuth state, safe for concurrent handlers.
#[derive(Default)]
pub struct TokenStore {
    codes: RwLock<HashMap<String, AuthCode>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    refresh: RwLock<HashMap<String, RefreshRecord>>,
}

impl TokenStore {
    /// Mint a single-use authorization code.
    pub async fn issue_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        username: Option<String>,
    ) -> String {
        let code = random_token(32);
        self.codes.write().await.insert(
            code.clone(),
            AuthCode {
                client_id: client_id.to_string(),
                redirect_uri: redirect_uri.to_string(),
                scope: scope.to_string(),
                username,
                expires_at: Utc::now() + Duration::seconds(CODE_TTL_SECS),
            },
        );
        code
    }

    /// Redeem a code. Removal makes the second redemption fail — codes
    /// are strictly single-use. Expired codes fail the same way.
    pub async fn redeem_code(&self, code: &str) -> Option<AuthCode> {
        let redeemed = self.codes.write().await.remove(code)?;
        if redeemed.expires_at < Utc::now() {
            return None;
        }
        Some(redeemed)
    }

    /// Track a freshly issued access token.
    pub async fn track_token(&self, jti: &str, record: TokenRecord) {
        self.tokens.write().await.insert(jti.to_string(), record);
    }

    /// Active lookup: known, unexpired and not revoked.
    pub async fn active_token(&self, jti: &str) -> Option<TokenRecord> {
        let tokens = self.tokens.read().await;
        let record = tokens.get(jti)?;
        if record.revoked || record.expires_at < Utc::now() {
            return None;
        }
        Some(record.clone())
    }

    /// Mark an access token revoked by jti. Unknown jtis are a no-op —
    /// RFC 7009 reports success either way.
    pub async fn revoke_token(&self, jti: &str) -> bool {
        match self.tokens.write().await.get_mut(jti) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// Issue an opaque refresh token.
    pub async fn issue_refresh(
        &self,
        client_id: &str,
        username: Option<String>,
        scope: &str,
        ttl_secs: u64,
    ) -> String {
        let token = random_token(48);
        self.refresh.write().await.insert(
            token.clone(),
            RefreshRecord {
                client_id: client_id.to_string(),
                username,
                scope: scope.to_string(),
                expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
            },
        );
        token
    }

    /// Look up a refresh token for the given client. The binding to the
    /// issuing client is part of the token's identity.
    pub async fn use_refresh(&self, token: &str, client_id: &str) -> Option<RefreshRecord> {
        let refresh = self.refresh.read().await;
        let record = refresh.get(token)?;
        if record.client_id != client_id || record.expires_at < Utc::now() {
            return None;
        }
        Some(record.clone())
    }

    /// Drop a refresh token (revocation).
    pub async fn revoke_refresh(&self, token: &str) -> bool {
        self.refresh.write().await.remove(token).is_some()
    }
}

/// Random URL-safe token.
pub fn random_token(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..len).map(|_| CHARS[rng.random_range(0..CHARS.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn codes_are_single_use() {
        let store = TokenStore::default();
        let code = store.issue_code("c1", "http://cb", "openid", None).await;
        assert!(store.redeem_code(&code).await.is_some());
        assert!(store.redeem_code(&code).await.is_none());
    }

    #[tokio::test]
    async fn revoked_tokens_are_inactive() {
        let store = TokenStore::default();
        store
            .track_token(
                "jti-1",
                TokenRecord {
                    client_id: "c1".to_string(),
                    username: None,
                    scope: "api".to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                    revoked: false,
                },
            )
            .await;
        assert!(store.active_token("jti-1").await.is_some());
        assert!(store.revoke_token("jti-1").await);
        assert!(store.active_token("jti-1").await.is_none());
    }

    #[tokio::test]
    async fn expired_tokens_are_inactive() {
        let store = TokenStore::default();
        store
            .track_token(
                "jti-old",
                TokenRecord {
                    client_id: "c1".to_string(),
                    username: None,
                    scope: "api".to_string(),
                    expires_at: Utc::now() - Duration::seconds(1),
                    revoked: false,
                },
            )
            .await;
        assert!(store.active_token("jti-old").await.is_none());
    }

    #[tokio::test]
    async fn refresh_tokens_bind_to_client() {
        let store = TokenStore::default();
        let token = store.issue_refresh("c1", None, "api", 3600).await;
        assert!(store.use_refresh(&token, "c1").await.is_some());
        assert!(store.use_refresh(&token, "other-client").await.is_none());
        assert!(store.revoke_refresh(&token).await);
        assert!(store.use_refresh(&token, "c1").await.is_none());
    }
}
