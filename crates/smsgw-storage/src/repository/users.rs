//! User repository

use crate::db::{store_err, DatabasePool};
use crate::models::User;
use async_trait::async_trait;
use smsgw_common::types::{now_epoch, Permission};
use smsgw_common::{Error, Result};

const COLUMNS: &str =
    "id, username, password, name, email, connection_group, permissions, registered_at, suspended";

/// Input for creating a user; `password` is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
    pub connection_group: String,
    pub permissions: Vec<Permission>,
}

/// User repository trait
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, input: NewUser) -> Result<User>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list(&self) -> Result<Vec<User>>;
    async fn set_suspended(&self, username: &str, suspended: bool) -> Result<()>;
}

/// PostgreSQL user repository
pub struct DbUserStore {
    pool: DatabasePool,
}

impl DbUserStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for DbUserStore {
    async fn create(&self, input: NewUser) -> Result<User> {
        let registered_at = now_epoch();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, password, name, email, connection_group, permissions, registered_at, suspended)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false)
            RETURNING id
            "#,
        )
        .bind(&input.username)
        .bind(&input.password)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.connection_group)
        .bind(Permission::join_list(&input.permissions))
        .bind(registered_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::field("Username", "Username already exists")
            }
            other => store_err(other),
        })?;

        Ok(User {
            id,
            username: input.username,
            password: input.password,
            name: input.name,
            email: input.email,
            connection_group: input.connection_group,
            permissions: input.permissions,
            registered_at,
            suspended: false,
        })
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE username = $1", COLUMNS))
            .bind(username)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(store_err)
    }

    async fn list(&self) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users ORDER BY id", COLUMNS))
            .fetch_all(self.pool.pool())
            .await
            .map_err(store_err)
    }

    async fn set_suspended(&self, username: &str, suspended: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET suspended = $1 WHERE username = $2")
            .bind(suspended)
            .bind(username)
            .execute(self.pool.pool())
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("User {}", username)));
        }
        Ok(())
    }
}
