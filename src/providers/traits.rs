use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProxyError;

/// A set of tokens returned from the OAuth provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Only present when the `openid` scope was granted.
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Confidential OAuth 2.0 client for one identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "infomaniak").
    fn id(&self) -> &str;

    /// Build the authorization URL that the user should be redirected to.
    ///
    /// `state` is passed through untouched; checking it on the way back is
    /// the caller's job.
    fn auth_url(&self, state: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProxyError>;

    /// Obtain a new access token using a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProxyError>;

    /// Lifetime assumed when the token response carries no `expires_in`.
    fn token_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }
}
