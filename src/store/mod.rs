//! Per-user token storage.
//!
//! Two backends implement [`TokenStore`]:
//! - [`MemoryTokenStore`]: process-local map, lost on restart (default)
//! - [`PgTokenStore`]: PostgreSQL `user_tokens` table, used when `DATABASE_URL` is set

pub mod db;
pub mod memory;

pub use db::PgTokenStore;
pub use memory::MemoryTokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Tokens held for one user.
///
/// `expires_at` is always issuance time plus the provider-declared lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Key-value store for [`TokenRecord`]s, keyed by user id.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<TokenRecord>, ProxyError>;

    /// Insert or wholesale replace the record for `user_id`.
    async fn put(&self, user_id: &str, record: TokenRecord) -> Result<(), ProxyError>;

    async fn delete(&self, user_id: &str) -> Result<(), ProxyError>;
}
