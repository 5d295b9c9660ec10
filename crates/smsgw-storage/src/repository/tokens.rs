//! Token repository
//!
//! Tokens are stored by digest; callers hash the presented secret before
//! every lookup.

use crate::db::{store_err, DatabasePool};
use crate::models::Token;
use async_trait::async_trait;
use smsgw_common::types::Epoch;
use smsgw_common::{Error, Result};

/// Token repository trait
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Record a new token digest for a user
    async fn create(&self, username: &str, digest: &str, validity: i32, now: Epoch)
        -> Result<Token>;

    async fn get(&self, digest: &str) -> Result<Option<Token>>;

    /// Renew the last access time
    async fn touch(&self, digest: &str, now: Epoch) -> Result<()>;

    async fn delete(&self, digest: &str) -> Result<()>;
}

/// PostgreSQL token repository
pub struct DbTokenStore {
    pool: DatabasePool,
}

impl DbTokenStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for DbTokenStore {
    async fn create(
        &self,
        username: &str,
        digest: &str,
        validity: i32,
        now: Epoch,
    ) -> Result<Token> {
        sqlx::query_as::<_, Token>(
            r#"
            INSERT INTO tokens (token, username, last_accessed, validity)
            VALUES ($1, $2, $3, $4)
            RETURNING id, token, username, last_accessed, validity
            "#,
        )
        .bind(digest)
        .bind(username)
        .bind(now)
        .bind(validity)
        .fetch_one(self.pool.pool())
        .await
        .map_err(store_err)
    }

    async fn get(&self, digest: &str) -> Result<Option<Token>> {
        sqlx::query_as::<_, Token>(
            "SELECT id, token, username, last_accessed, validity FROM tokens WHERE token = $1",
        )
        .bind(digest)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(store_err)
    }

    async fn touch(&self, digest: &str, now: Epoch) -> Result<()> {
        sqlx::query("UPDATE tokens SET last_accessed = $1 WHERE token = $2")
            .bind(now)
            .bind(digest)
            .execute(self.pool.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, digest: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tokens WHERE token = $1")
            .bind(digest)
            .execute(self.pool.pool())
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Token".to_string()));
        }
        Ok(())
    }
}
