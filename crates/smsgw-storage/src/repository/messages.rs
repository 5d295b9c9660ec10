//! Message repository

use crate::db::{store_err, DatabasePool};
use crate::models::{
    bound, non_empty, CampaignReportStats, ConnectionCount, Message, MessageCriteria,
    MessageStats, UsernameFilter, MAX_PER_PAGE,
};
use async_trait::async_trait;
use smsgw_common::types::{CampaignId, Epoch, MessageId, Status};
use smsgw_common::{Error, Result};
use sqlx::postgres::PgConnection;
use sqlx::{Postgres, QueryBuilder, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Rows per INSERT statement in a bulk save
pub const BULK_BATCH_SIZE: usize = 200;

const COLUMNS: &str = "id, resp_id, connection_group, connection, total, username, msg, \
    real_msg, enc, dst, src, priority, queued_at, sent_at, delivered_at, scheduled_at, \
    send_before, send_after, campaign_id, status, error, is_flash";

/// Message repository trait
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return it with its assigned ID
    async fn save(&self, message: Message) -> Result<Message>;

    /// Persist many messages atomically; IDs are assigned in input order
    async fn save_bulk(&self, messages: Vec<Message>) -> Result<Vec<Message>>;

    /// Get a message by ID
    async fn get(&self, id: MessageId) -> Result<Message>;

    /// Replace a message row if it is still in `expected` state.
    ///
    /// Fails with `Conflict` when the row has moved on, or when `expected`
    /// may not lead to the new status.
    async fn update(&self, message: &Message, expected: Status) -> Result<()>;

    /// Keyset-paged listing
    async fn list(&self, criteria: &MessageCriteria) -> Result<Vec<Message>>;

    /// Counts per status for the same filters as `list`
    async fn stats(&self, criteria: &MessageCriteria) -> Result<MessageStats>;

    /// Record a delivery receipt against the message sent with `resp_id`
    async fn save_delivery(&self, resp_id: &str, status: Status) -> Result<()>;

    /// Stop every queued or scheduled message of a campaign
    async fn stop_pending(&self, campaign_id: CampaignId) -> Result<u64>;

    /// Move the given Error or Queued messages back to Queued
    async fn requeue(&self, ids: &[MessageId], now: Epoch) -> Result<u64>;

    /// Aggregates behind a campaign report
    async fn campaign_report(&self, campaign_id: CampaignId) -> Result<CampaignReportStats>;

    /// Per-status counts of one campaign
    async fn campaign_progress(&self, campaign_id: CampaignId) -> Result<MessageStats> {
        self.stats(&MessageCriteria {
            campaign_id: Some(campaign_id),
            ..Default::default()
        })
        .await
    }

    /// All failed messages of a campaign
    async fn list_with_error(&self, campaign_id: CampaignId) -> Result<Vec<Message>> {
        self.list(&campaign_status(campaign_id, Status::Error)).await
    }

    /// All queued messages of a campaign
    async fn list_queued(&self, campaign_id: CampaignId) -> Result<Vec<Message>> {
        self.list(&campaign_status(campaign_id, Status::Queued)).await
    }
}

pub(crate) fn check_transition(id: MessageId, from: Status, to: Status) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "Message {} can't move from {} to {}",
            id, from, to
        )))
    }
}

fn campaign_status(campaign_id: CampaignId, status: Status) -> MessageCriteria {
    MessageCriteria {
        campaign_id: Some(campaign_id),
        status: Some(status),
        order_by_key: Some("ID".to_string()),
        order_by_dir: Some("ASC".to_string()),
        per_page: Some(MAX_PER_PAGE),
        ..Default::default()
    }
}

/// PostgreSQL message repository
pub struct DbMessageStore {
    pool: DatabasePool,
    bulk_lock: Arc<Mutex<()>>,
}

impl DbMessageStore {
    /// Create a new repository
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            bulk_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Append the WHERE clause shared by list and stats
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, c: &MessageCriteria) {
    qb.push(" WHERE TRUE");

    if let Some(id) = c.id.filter(|v| *v > 0) {
        qb.push(" AND id = ").push_bind(id);
    }

    let equal = [
        ("resp_id", &c.resp_id),
        ("connection_group", &c.connection_group),
        ("connection", &c.connection),
        ("dst", &c.dst),
        ("src", &c.src),
        ("error", &c.error),
    ];
    for (column, value) in equal {
        if let Some(v) = non_empty(value) {
            qb.push(format!(" AND {} = ", column)).push_bind(v.to_string());
        }
    }

    match c.username_filter() {
        Some(UsernameFilter::Exact(u)) => {
            qb.push(" AND username = ").push_bind(u.to_string());
        }
        Some(UsernameFilter::Pattern(p)) => {
            qb.push(" AND username ~* ").push_bind(p.to_string());
        }
        None => {}
    }

    if let Some(text) = non_empty(&c.msg) {
        qb.push(" AND to_tsvector('simple', msg) @@ plainto_tsquery('simple', ")
            .push_bind(text.to_string())
            .push(")");
    }
    if let Some(enc) = c.enc {
        qb.push(" AND enc = ").push_bind(enc.as_str());
    }
    if let Some(status) = c.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(campaign_id) = c.campaign_id.filter(|v| *v > 0) {
        qb.push(" AND campaign_id = ").push_bind(campaign_id);
    }
    if let Some(total) = c.total.filter(|v| *v > 0) {
        qb.push(" AND total = ").push_bind(total);
    }
    if let Some(priority) = c.priority.filter(|v| *v > 0) {
        qb.push(" AND priority = ").push_bind(priority);
    }

    let ranges = [
        ("queued_at", c.queued_after, c.queued_before),
        ("sent_at", c.sent_after, c.sent_before),
        ("delivered_at", c.delivered_after, c.delivered_before),
        ("scheduled_at", c.scheduled_after, c.scheduled_before),
    ];
    for (column, after, before) in ranges {
        if let Some(after) = bound(after) {
            qb.push(format!(" AND {} >= ", column)).push_bind(after);
        }
        if let Some(before) = bound(before) {
            qb.push(format!(" AND {} <= ", column)).push_bind(before);
        }
    }
}

/// Insert one batch and return the assigned IDs in input order
async fn insert_batch(conn: &mut PgConnection, batch: &[Message]) -> Result<Vec<MessageId>> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO messages (resp_id, connection_group, connection, total, username, msg, \
         real_msg, enc, dst, src, priority, queued_at, sent_at, delivered_at, scheduled_at, \
         send_before, send_after, campaign_id, status, error, is_flash) ",
    );
    qb.push_values(batch, |mut b, m| {
        b.push_bind(m.resp_id.clone())
            .push_bind(m.connection_group.clone())
            .push_bind(m.connection.clone())
            .push_bind(m.total)
            .push_bind(m.username.clone())
            .push_bind(m.msg.clone())
            .push_bind(m.real_msg.clone())
            .push_bind(m.enc.as_str())
            .push_bind(m.dst.clone())
            .push_bind(m.src.clone())
            .push_bind(m.priority)
            .push_bind(m.queued_at)
            .push_bind(m.sent_at)
            .push_bind(m.delivered_at)
            .push_bind(m.scheduled_at)
            .push_bind(m.send_before.clone())
            .push_bind(m.send_after.clone())
            .push_bind(m.campaign_id)
            .push_bind(m.status.as_str())
            .push_bind(m.error.clone())
            .push_bind(m.is_flash);
    });
    qb.push(" RETURNING id");

    let rows = qb.build().fetch_all(&mut *conn).await.map_err(store_err)?;
    if rows.len() != batch.len() {
        return Err(Error::Store(format!(
            "Inserted {} rows, expected {}",
            rows.len(),
            batch.len()
        )));
    }
    rows.iter()
        .map(|row| row.try_get::<i64, _>("id"))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err)
}

#[async_trait]
impl MessageStore for DbMessageStore {
    async fn save(&self, mut message: Message) -> Result<Message> {
        let mut conn = self.pool.pool().acquire().await.map_err(store_err)?;
        let ids = insert_batch(&mut conn, std::slice::from_ref(&message)).await?;
        message.id = ids
            .first()
            .copied()
            .ok_or_else(|| Error::Store("Insert returned no id".to_string()))?;
        Ok(message)
    }

    async fn save_bulk(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Ok(messages);
        }
        let _guard = self.bulk_lock.lock().await;

        let mut tx = self.pool.pool().begin().await.map_err(store_err)?;
        let mut ids = Vec::with_capacity(messages.len());
        for batch in messages.chunks(BULK_BATCH_SIZE) {
            ids.extend(insert_batch(&mut tx, batch).await?);
        }
        tx.commit().await.map_err(store_err)?;

        for (message, id) in messages.iter_mut().zip(ids) {
            message.id = id;
        }
        debug!(count = messages.len(), "Saved messages in bulk");
        Ok(messages)
    }

    async fn get(&self, id: MessageId) -> Result<Message> {
        sqlx::query_as::<_, Message>(&format!("SELECT {} FROM messages WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("Message {}", id)))
    }

    async fn update(&self, m: &Message, expected: Status) -> Result<()> {
        check_transition(m.id, expected, m.status)?;
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                resp_id = $2, connection_group = $3, connection = $4, total = $5,
                username = $6, msg = $7, real_msg = $8, enc = $9, dst = $10, src = $11,
                priority = $12, queued_at = $13, sent_at = $14, delivered_at = $15,
                scheduled_at = $16, send_before = $17, send_after = $18,
                campaign_id = $19, status = $20, error = $21, is_flash = $22
            WHERE id = $1 AND status = $23
            "#,
        )
        .bind(m.id)
        .bind(&m.resp_id)
        .bind(&m.connection_group)
        .bind(&m.connection)
        .bind(m.total)
        .bind(&m.username)
        .bind(&m.msg)
        .bind(&m.real_msg)
        .bind(m.enc.as_str())
        .bind(&m.dst)
        .bind(&m.src)
        .bind(m.priority)
        .bind(m.queued_at)
        .bind(m.sent_at)
        .bind(m.delivered_at)
        .bind(m.scheduled_at)
        .bind(&m.send_before)
        .bind(&m.send_after)
        .bind(m.campaign_id)
        .bind(m.status.as_str())
        .bind(&m.error)
        .bind(m.is_flash)
        .bind(expected.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            let current = self.get(m.id).await?;
            return Err(Error::Conflict(format!(
                "Message {} is {}, expected {}",
                m.id, current.status, expected
            )));
        }
        Ok(())
    }

    async fn list(&self, c: &MessageCriteria) -> Result<Vec<Message>> {
        let key = c.order_key()?;
        let ascending = c.ascending();
        let from = c.from_value()?;

        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM messages", COLUMNS));
        push_filters(&mut qb, c);
        if let Some(from) = from {
            let op = if ascending { ">" } else { "<" };
            qb.push(format!(" AND {} {} ", key.column(), op)).push_bind(from);
        }
        let dir = if ascending { "ASC" } else { "DESC" };
        qb.push(format!(" ORDER BY {} {}, id {} LIMIT ", key.column(), dir, dir))
            .push_bind(i64::from(c.limit()));

        qb.build_query_as::<Message>()
            .fetch_all(self.pool.pool())
            .await
            .map_err(store_err)
    }

    async fn stats(&self, c: &MessageCriteria) -> Result<MessageStats> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT status, COUNT(*) AS count FROM messages");
        push_filters(&mut qb, c);
        qb.push(" GROUP BY status");

        let rows = qb.build().fetch_all(self.pool.pool()).await.map_err(store_err)?;
        let mut stats = MessageStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(store_err)?;
            let count: i64 = row.try_get("count").map_err(store_err)?;
            stats.add(status.parse()?, count);
        }
        Ok(stats)
    }

    async fn save_delivery(&self, resp_id: &str, status: Status) -> Result<()> {
        let result = sqlx::query(
            "UPDATE messages SET status = $1, delivered_at = $2 WHERE resp_id = $3 AND status = $4",
        )
        .bind(status.as_str())
        .bind(smsgw_common::types::now_epoch())
        .bind(resp_id)
        .bind(Status::Sent.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Message with RespID {}", resp_id)));
        }
        Ok(())
    }

    async fn stop_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET status = $1 WHERE campaign_id = $2 AND status IN ($3, $4)",
        )
        .bind(Status::Stopped.as_str())
        .bind(campaign_id)
        .bind(Status::Queued.as_str())
        .bind(Status::Scheduled.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }

    async fn requeue(&self, ids: &[MessageId], now: Epoch) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages SET status = $1, queued_at = $2, error = '' \
             WHERE id = ANY($3) AND status IN ($4, $1)",
        )
        .bind(Status::Queued.as_str())
        .bind(now)
        .bind(ids)
        .bind(Status::Error.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }

    async fn campaign_report(&self, campaign_id: CampaignId) -> Result<CampaignReportStats> {
        let pool = self.pool.pool();

        let msg_size: Option<i32> =
            sqlx::query_scalar("SELECT total FROM messages WHERE campaign_id = $1 LIMIT 1")
                .bind(campaign_id)
                .fetch_optional(pool)
                .await
                .map_err(store_err)?;

        let row = sqlx::query(
            "SELECT COALESCE(MIN(sent_at), 0) AS first_sent, COALESCE(MAX(sent_at), 0) AS last_sent \
             FROM messages WHERE campaign_id = $1 AND sent_at > 0",
        )
        .bind(campaign_id)
        .fetch_one(pool)
        .await
        .map_err(store_err)?;

        let connections = sqlx::query(
            "SELECT connection, COUNT(*) AS count FROM messages \
             WHERE campaign_id = $1 AND connection <> '' \
             GROUP BY connection ORDER BY connection",
        )
        .bind(campaign_id)
        .fetch_all(pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|row| {
            Ok(ConnectionCount {
                name: row.try_get("connection")?,
                count: row.try_get("count")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(store_err)?;

        Ok(CampaignReportStats {
            msg_size: msg_size.unwrap_or(0),
            first_queued: row.try_get("first_sent").map_err(store_err)?,
            last_sent: row.try_get("last_sent").map_err(store_err)?,
            connections,
        })
    }
}
