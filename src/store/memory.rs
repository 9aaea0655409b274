use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{TokenRecord, TokenStore};
use crate::error::ProxyError;

/// In-memory token store. Holds one record per authenticated user for the
/// lifetime of the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a stored record.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, user_id: &str) -> Result<Option<TokenRecord>, ProxyError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, record: TokenRecord) -> Result<(), ProxyError> {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), ProxyError> {
        self.records.write().await.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.into(),
            refresh_token: Some("rt".into()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn put_replaces_previous_record() {
        let store = MemoryTokenStore::new();
        store.put("u1", record("a")).await.unwrap();
        store.put("u1", record("b")).await.unwrap();

        let got = store.get("u1").await.unwrap().unwrap();
        assert_eq!(got.access_token, "b");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = MemoryTokenStore::new();
        store.put("u1", record("a")).await.unwrap();
        store.delete("u1").await.unwrap();
        assert!(store.get("u1").await.unwrap().is_none());
        assert!(store.is_empty().await);

        // deleting an absent key is fine
        store.delete("nobody").await.unwrap();
    }
}
