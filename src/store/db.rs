//! PostgreSQL-backed token store.
//!
//! Table `user_tokens`: one row per user id, replaced on every exchange or refresh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{TokenRecord, TokenStore};
use crate::error::ProxyError;

/// Token store backed by PostgreSQL.
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub async fn new(db_url: &str) -> Result<Self, ProxyError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| ProxyError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), ProxyError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_tokens (
                user_id         TEXT PRIMARY KEY,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                expires_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn get(&self, user_id: &str) -> Result<Option<TokenRecord>, ProxyError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at FROM user_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let expires_at: DateTime<Utc> = row.try_get(2)?;

        Ok(Some(TokenRecord {
            access_token: row.try_get(0)?,
            refresh_token: row.try_get(1)?,
            expires_at,
        }))
    }

    async fn put(&self, user_id: &str, record: TokenRecord) -> Result<(), ProxyError> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), ProxyError> {
        sqlx::query("DELETE FROM user_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
