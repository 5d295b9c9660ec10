//! Sweeper re-enqueueing scheduled messages whose minute has come.

use crate::broker::{publish_item, Broker};
use crate::metrics::Metrics;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use smsgw_common::routing::resolve_key;
use smsgw_common::types::{now_epoch, Epoch, QueueItem, Status};
use smsgw_common::{Config, Error, Result};
use smsgw_storage::{MessageCriteria, MessageStore, MAX_PER_PAGE};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Inclusive epoch bounds of the minute containing `now`
pub fn minute_window(now: DateTime<Utc>) -> (Epoch, Epoch) {
    let after = now
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(now)
        .timestamp();
    (after, after + 59)
}

pub struct Scheduler {
    config: Arc<Config>,
    store: Arc<dyn MessageStore>,
    broker: Arc<dyn Broker>,
    interval: Duration,
    metrics: Option<Metrics>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, store: Arc<dyn MessageStore>, broker: Arc<dyn Broker>) -> Self {
        let interval = Duration::from_secs(config.scheduler.interval_secs.max(1));
        Self {
            config,
            store,
            broker,
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sweep every interval until `shutdown` resolves or a sweep fails
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!("Waiting for scheduled messages");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
                _ = tick.tick() => {
                    self.sweep().await?;
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_at(Utc::now()).await
    }

    /// Publish every Scheduled message due within the minute of `now`.
    ///
    /// A message is published before it is marked Queued, so a crash in
    /// between leaves it Scheduled and the next sweep publishes it again.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let (after, before) = minute_window(now);
        info!(scheduled_after = after, scheduled_before = before, "Looking for messages");
        let criteria = MessageCriteria {
            scheduled_after: Some(after),
            scheduled_before: Some(before),
            status: Some(Status::Scheduled),
            per_page: Some(MAX_PER_PAGE),
            ..Default::default()
        };

        let mut total = 0;
        loop {
            let due = self.store.list(&criteria).await.map_err(|e| {
                error!(error = %e, "Couldn't get messages");
                e
            })?;
            if due.is_empty() {
                break;
            }
            info!(total = due.len(), "Messages found");

            for mut m in due {
                let key = resolve_key(&self.config, &m.connection_group, &m.dst)?;
                let item = QueueItem {
                    msg_id: m.id,
                    total: m.total,
                };
                let published = publish_item(self.broker.as_ref(), &key, &item, m.priority).await;
                if let Some(metrics) = &self.metrics {
                    metrics.publish_result(published.is_ok());
                }
                if let Err(e) = published {
                    error!(msg_id = m.id, error = %e, "Couldn't publish message");
                    return Err(e);
                }
                m.status = Status::Queued;
                m.queued_at = now_epoch();
                match self.store.update(&m, Status::Scheduled).await {
                    Ok(()) => total += 1,
                    // stopped since the listing; the worker skips the published item
                    Err(Error::Conflict(reason)) => {
                        warn!(msg_id = m.id, %reason, "Message left Scheduled, not requeued");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(total)
    }
}
