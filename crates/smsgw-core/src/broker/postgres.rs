//! PostgreSQL broker backend.
//!
//! Publishes are rows in `broker_queue`. Consumers claim the best row with
//! `FOR UPDATE SKIP LOCKED`, so several workers bound to the same keys never
//! receive the same delivery.

use super::{binding_keys, Acknowledger, Broker, Consumer, Delivery, Settlement};
use async_trait::async_trait;
use smsgw_common::config::BrokerConfig;
use smsgw_common::types::MAX_PRIORITY;
use smsgw_common::{Error, Result};
use smsgw_storage::DatabasePool;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

fn queue_err(e: sqlx::Error) -> Error {
    Error::Queue(e.to_string())
}

/// Broker backed by the `broker_queue` table
#[derive(Clone)]
pub struct PgBroker {
    pool: DatabasePool,
    poll_interval: Duration,
    lock_timeout: Duration,
}

impl PgBroker {
    pub fn new(pool: DatabasePool, config: &BrokerConfig) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
        }
    }

    /// Release claims left behind by consumers that went away
    pub async fn release_stale(&self, keys: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE broker_queue
            SET locked_by = NULL, locked_at = NULL
            WHERE locked_by IS NOT NULL
              AND locked_at < NOW() - ($1::float8 * INTERVAL '1 second')
              AND routing_key = ANY($2)
            "#,
        )
        .bind(self.lock_timeout.as_secs_f64())
        .bind(keys)
        .execute(self.pool.pool())
        .await
        .map_err(queue_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>, priority: u8) -> Result<()> {
        sqlx::query("INSERT INTO broker_queue (routing_key, priority, payload) VALUES ($1, $2, $3)")
            .bind(routing_key)
            .bind(priority.min(MAX_PRIORITY) as i16)
            .bind(payload)
            .execute(self.pool.pool())
            .await
            .map_err(queue_err)?;
        Ok(())
    }

    async fn bind(&self, group: &str, prefixes: &[String]) -> Result<Box<dyn Consumer>> {
        let keys = binding_keys(group, prefixes);
        let released = self.release_stale(&keys).await?;
        if released > 0 {
            info!(released, "Released stale broker claims");
        }
        let consumer_id = Uuid::new_v4();
        debug!(%consumer_id, ?keys, "Bound broker consumer");
        Ok(Box::new(PgConsumer {
            pool: self.pool.clone(),
            keys,
            consumer_id,
            poll_interval: self.poll_interval,
            prefetch: Arc::new(Semaphore::new(1)),
        }))
    }
}

struct PgConsumer {
    pool: DatabasePool,
    keys: Vec<String>,
    consumer_id: Uuid,
    poll_interval: Duration,
    prefetch: Arc<Semaphore>,
}

impl PgConsumer {
    async fn claim(&self) -> Result<Option<(i64, String, u8, Vec<u8>)>> {
        let row = sqlx::query(
            r#"
            UPDATE broker_queue
            SET locked_by = $1, locked_at = NOW()
            WHERE id = (
                SELECT id FROM broker_queue
                WHERE routing_key = ANY($2) AND locked_by IS NULL
                ORDER BY priority DESC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, routing_key, priority, payload
            "#,
        )
        .bind(self.consumer_id)
        .bind(&self.keys)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(queue_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let priority: i16 = row.try_get("priority").map_err(queue_err)?;
        Ok(Some((
            row.try_get("id").map_err(queue_err)?,
            row.try_get("routing_key").map_err(queue_err)?,
            u8::try_from(priority).unwrap_or(0),
            row.try_get("payload").map_err(queue_err)?,
        )))
    }
}

#[async_trait]
impl Consumer for PgConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let Ok(permit) = self.prefetch.clone().acquire_owned().await else {
            return Ok(None);
        };
        loop {
            if let Some((id, routing_key, priority, body)) = self.claim().await? {
                let acker = PgAcker {
                    pool: self.pool.clone(),
                    id,
                    consumer_id: self.consumer_id,
                };
                return Ok(Some(Delivery::new(
                    routing_key,
                    priority,
                    body,
                    Box::new(acker),
                    permit,
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

struct PgAcker {
    pool: DatabasePool,
    id: i64,
    consumer_id: Uuid,
}

#[async_trait]
impl Acknowledger for PgAcker {
    async fn settle(&self, settlement: Settlement) -> Result<()> {
        let sql = match settlement {
            Settlement::Ack | Settlement::Discard => {
                "DELETE FROM broker_queue WHERE id = $1 AND locked_by = $2"
            }
            Settlement::Requeue => {
                "UPDATE broker_queue SET locked_by = NULL, locked_at = NULL WHERE id = $1 AND locked_by = $2"
            }
        };
        sqlx::query(sql)
            .bind(self.id)
            .bind(self.consumer_id)
            .execute(self.pool.pool())
            .await
            .map_err(queue_err)?;
        Ok(())
    }
}
