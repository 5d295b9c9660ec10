//! Destination file repository

use crate::db::{store_err, DatabasePool};
use crate::models::{bound, non_empty, page_size, NumFile, NumFileCriteria};
use async_trait::async_trait;
use smsgw_common::types::FileId;
use smsgw_common::{Error, Result};
use sqlx::{Postgres, QueryBuilder};

const COLUMNS: &str =
    "id, name, description, local_name, file_type, username, submitted_at, deleted";

/// Destination file repository trait
#[async_trait]
pub trait NumFileStore: Send + Sync {
    async fn save(&self, file: NumFile) -> Result<NumFile>;

    /// Get a file that has not been deleted
    async fn get(&self, id: FileId) -> Result<NumFile>;

    /// Newest first, keyset-paged by submission time
    async fn list(&self, criteria: &NumFileCriteria) -> Result<Vec<NumFile>>;

    /// Soft delete
    async fn delete(&self, id: FileId) -> Result<()>;
}

/// PostgreSQL destination file repository
pub struct DbNumFileStore {
    pool: DatabasePool,
}

impl DbNumFileStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NumFileStore for DbNumFileStore {
    async fn save(&self, mut f: NumFile) -> Result<NumFile> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO num_files (name, description, local_name, file_type, username, submitted_at, deleted)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&f.name)
        .bind(&f.description)
        .bind(&f.local_name)
        .bind(f.file_type.as_str())
        .bind(&f.username)
        .bind(f.submitted_at)
        .bind(f.deleted)
        .fetch_one(self.pool.pool())
        .await
        .map_err(store_err)?;

        f.id = id;
        Ok(f)
    }

    async fn get(&self, id: FileId) -> Result<NumFile> {
        sqlx::query_as::<_, NumFile>(&format!(
            "SELECT {} FROM num_files WHERE id = $1 AND deleted = false",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(store_err)?
        .ok_or_else(|| Error::NotFound(format!("File {}", id)))
    }

    async fn list(&self, c: &NumFileCriteria) -> Result<Vec<NumFile>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM num_files WHERE TRUE", COLUMNS));

        if let Some(id) = c.id.filter(|v| *v > 0) {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(username) = non_empty(&c.username) {
            qb.push(" AND username = ").push_bind(username.to_string());
        }
        if let Some(name) = non_empty(&c.name) {
            qb.push(" AND name = ").push_bind(name.to_string());
        }
        if let Some(deleted) = c.deleted {
            qb.push(" AND deleted = ").push_bind(deleted);
        }
        if let Some(after) = bound(c.submitted_after) {
            qb.push(" AND submitted_at >= ").push_bind(after);
        }
        if let Some(before) = bound(c.submitted_before) {
            qb.push(" AND submitted_at <= ").push_bind(before);
        }
        if let Some(from) = bound(c.from) {
            qb.push(" AND submitted_at < ").push_bind(from);
        }
        qb.push(" ORDER BY submitted_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(page_size(c.per_page)));

        qb.build_query_as::<NumFile>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(store_err)
    }

    async fn delete(&self, id: FileId) -> Result<()> {
        let result = sqlx::query("UPDATE num_files SET deleted = true WHERE id = $1 AND deleted = false")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("File {}", id)));
        }
        Ok(())
    }
}
