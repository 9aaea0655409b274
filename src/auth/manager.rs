//! Token lifecycle: authorization-code exchange, per-user storage, and
//! refresh-ahead of expiry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::id_token::IdTokenVerifier;
use crate::error::ProxyError;
use crate::providers::{OAuthProvider, TokenSet};
use crate::store::{TokenRecord, TokenStore};

/// Tokens expiring within this many seconds are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub struct TokenManager {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn TokenStore>,
    id_tokens: IdTokenVerifier,
    /// One lock per user id with a refresh in flight. Concurrent requests
    /// share a single refresh; the entry is removed when the last one leaves.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn TokenStore>,
        id_tokens: IdTokenVerifier,
    ) -> Self {
        Self {
            provider,
            store,
            id_tokens,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn id_tokens(&self) -> &IdTokenVerifier {
        &self.id_tokens
    }

    pub fn build_authorization_url(&self, state: &str) -> String {
        self.provider.auth_url(state)
    }

    pub async fn exchange_authorization_code(&self, code: &str) -> Result<TokenSet, ProxyError> {
        self.provider.exchange_code(code).await
    }

    pub async fn extract_user_id(&self, id_token: &str) -> Result<String, ProxyError> {
        self.id_tokens.extract_user_id(id_token).await
    }

    /// Store `tokens` for `user_id`, replacing any previous record.
    pub async fn store_token_set(&self, user_id: &str, tokens: &TokenSet) -> Result<(), ProxyError> {
        let lifetime = tokens
            .expires_in
            .unwrap_or_else(|| self.provider.token_ttl().as_secs());

        let record = TokenRecord {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Utc::now() + Duration::seconds(lifetime as i64),
        };

        self.store.put(user_id, record).await
    }

    /// Exchange `code`, identify the user from the id_token, and store the tokens.
    /// Returns the user id.
    pub async fn complete_login(&self, code: &str) -> Result<String, ProxyError> {
        let tokens = self.exchange_authorization_code(code).await?;

        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            ProxyError::InvalidToken("token response carries no id_token (is 'openid' in scope?)".into())
        })?;
        let user_id = self.extract_user_id(id_token).await?;

        self.store_token_set(&user_id, &tokens).await?;
        info!("Stored {} tokens for user {user_id}", self.provider.id());

        Ok(user_id)
    }

    pub async fn is_authenticated(&self, user_id: &str) -> Result<bool, ProxyError> {
        Ok(self.store.get(user_id).await?.is_some())
    }

    /// Current access token for `user_id`, refreshed first when it is within
    /// [`REFRESH_MARGIN_SECS`] of expiry. `None` when the user has no tokens.
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<Option<String>, ProxyError> {
        match self.store.get(user_id).await? {
            None => return Ok(None),
            Some(record) if !needs_refresh(&record) => return Ok(Some(record.access_token)),
            Some(_) => {}
        }

        let lock = self.refresh_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(user_id).await
        };
        self.release_refresh_lock(user_id, lock).await;
        result
    }

    /// Refresh path, run while holding the user's refresh lock.
    async fn refresh_locked(&self, user_id: &str) -> Result<Option<String>, ProxyError> {
        // Another request may have refreshed while we waited.
        let record = match self.store.get(user_id).await? {
            None => return Ok(None),
            Some(record) if !needs_refresh(&record) => return Ok(Some(record.access_token)),
            Some(record) => record,
        };

        let Some(refresh_token) = record.refresh_token.clone() else {
            if record.expires_at > Utc::now() {
                return Ok(Some(record.access_token));
            }
            warn!("Token for user {user_id} expired and no refresh token is stored");
            self.store.delete(user_id).await?;
            return Ok(None);
        };

        match self.provider.refresh_token(&refresh_token).await {
            Ok(mut tokens) => {
                if tokens.refresh_token.is_none() {
                    tokens.refresh_token = Some(refresh_token);
                }
                self.store_token_set(user_id, &tokens).await?;
                info!("Refreshed {} token for user {user_id}", self.provider.id());
                Ok(Some(tokens.access_token))
            }
            Err(ProxyError::UpstreamAuth { status, body }) if status == 400 || status == 401 => {
                error!("Refresh token rejected for user {user_id} ({status}); dropping record");
                self.store.delete(user_id).await?;
                Err(ProxyError::UpstreamAuth { status, body })
            }
            Err(e) => {
                error!("Failed to refresh token for user {user_id}: {e}");
                Err(e)
            }
        }
    }

    async fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the user's lock entry once no other caller holds or waits on it.
    async fn release_refresh_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().await;
        let ours = locks
            .get(user_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock));
        // map entry + `lock`
        if ours && Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    #[cfg(test)]
    async fn refresh_lock_count(&self) -> usize {
        self.refresh_locks.lock().await.len()
    }
}

fn needs_refresh(record: &TokenRecord) -> bool {
    Utc::now() >= record.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
}
