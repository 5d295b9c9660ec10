//! Campaign repository

use crate::db::{store_err, DatabasePool};
use crate::models::{bound, is_ascending, non_empty, page_size, Campaign, CampaignCriteria};
use async_trait::async_trait;
use smsgw_common::types::CampaignId;
use smsgw_common::{Error, Result};
use sqlx::{Postgres, QueryBuilder};

const COLUMNS: &str = "id, description, src, msg, enc, file_id, priority, send_before, \
    send_after, scheduled_at, is_flash, mask, total, username, submitted_at";

/// Campaign repository trait
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Persist a new campaign and return it with its assigned ID
    async fn save(&self, campaign: Campaign) -> Result<Campaign>;

    async fn get(&self, id: CampaignId) -> Result<Campaign>;

    /// Keyset-paged by submission time
    async fn list(&self, criteria: &CampaignCriteria) -> Result<Vec<Campaign>>;
}

/// PostgreSQL campaign repository
pub struct DbCampaignStore {
    pool: DatabasePool,
}

impl DbCampaignStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for DbCampaignStore {
    async fn save(&self, mut c: Campaign) -> Result<Campaign> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO campaigns (
                description, src, msg, enc, file_id, priority, send_before, send_after,
                scheduled_at, is_flash, mask, total, username, submitted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(&c.description)
        .bind(&c.src)
        .bind(&c.msg)
        .bind(c.enc.as_str())
        .bind(c.file_id)
        .bind(c.priority)
        .bind(&c.send_before)
        .bind(&c.send_after)
        .bind(c.scheduled_at)
        .bind(c.is_flash)
        .bind(c.mask)
        .bind(c.total)
        .bind(&c.username)
        .bind(c.submitted_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(store_err)?;

        c.id = id;
        Ok(c)
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign> {
        sqlx::query_as::<_, Campaign>(&format!("SELECT {} FROM campaigns WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("Campaign {}", id)))
    }

    async fn list(&self, c: &CampaignCriteria) -> Result<Vec<Campaign>> {
        let ascending = is_ascending(c.order_by_dir.as_deref());
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM campaigns WHERE TRUE", COLUMNS));

        if let Some(id) = c.id.filter(|v| *v > 0) {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(username) = non_empty(&c.username) {
            qb.push(" AND username = ").push_bind(username.to_string());
        }
        if let Some(file_id) = c.file_id.filter(|v| *v > 0) {
            qb.push(" AND file_id = ").push_bind(file_id);
        }
        if let Some(after) = bound(c.submitted_after) {
            qb.push(" AND submitted_at >= ").push_bind(after);
        }
        if let Some(before) = bound(c.submitted_before) {
            qb.push(" AND submitted_at <= ").push_bind(before);
        }
        if let Some(from) = bound(c.from) {
            qb.push(if ascending {
                " AND submitted_at > "
            } else {
                " AND submitted_at < "
            })
            .push_bind(from);
        }
        let dir = if ascending { "ASC" } else { "DESC" };
        qb.push(format!(" ORDER BY submitted_at {}, id {} LIMIT ", dir, dir))
            .push_bind(i64::from(page_size(c.per_page)));

        qb.build_query_as::<Campaign>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(store_err)
    }
}
