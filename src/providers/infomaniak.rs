use async_trait::async_trait;

use super::traits::{OAuthProvider, TokenSet};
use crate::config::Config;
use crate::error::ProxyError;

/// Infomaniak OAuth 2.0 provider (login.infomaniak.com).
///
/// Authenticates to the token endpoint with HTTP Basic (client id + secret).
/// Endpoints are configurable so tests can point them at a mock server.
pub struct InfomaniakProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    authorize_url: String,
    token_url: String,
    http: reqwest::Client,
}

impl InfomaniakProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        scope: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scope,
            authorize_url: "https://login.infomaniak.com/authorize".into(),
            token_url: "https://login.infomaniak.com/token".into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
            config.oauth_redirect_uri.clone(),
            config.oauth_scope.clone(),
        )
        .with_endpoints(&config.oauth_authorize_url, &config.oauth_token_url)
    }

    /// Override the authorization and token endpoints.
    pub fn with_endpoints(mut self, authorize_url: &str, token_url: &str) -> Self {
        self.authorize_url = authorize_url.to_string();
        self.token_url = token_url.to_string();
        self
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProxyError> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamAuth {
                status: 0,
                body: format!("token endpoint unreachable: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(ProxyError::from_auth_response(resp).await);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| ProxyError::UpstreamAuth {
            status,
            body: format!("failed to read token response: {e}"),
        })?;
        serde_json::from_str(&body).map_err(|e| ProxyError::UpstreamAuth {
            status,
            body: format!("unparseable token response: {e}"),
        })
    }
}

#[async_trait]
impl OAuthProvider for InfomaniakProvider {
    fn id(&self) -> &str {
        "infomaniak"
    }

    fn auth_url(&self, state: &str) -> String {
        let params = [
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
            ("state", state),
        ];

        match url::Url::parse(&self.authorize_url) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params);
                url.to_string()
            }
            Err(_) => {
                let query: String = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params)
                    .finish();
                format!("{}?{query}", self.authorize_url)
            }
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProxyError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProxyError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
