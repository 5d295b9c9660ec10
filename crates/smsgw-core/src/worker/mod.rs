//! Per-connection send worker.
//!
//! A worker owns one SMPP session and drains the broker keys of its
//! connection's prefixes. Pulls are paced by `dlv_tick` (one tick per
//! segment), submissions by `send_tick`, and at most `size` messages are in
//! flight at once.

pub mod receiver;

pub use receiver::InboundHandler;

use crate::broker::{Broker, Delivery, Subscription};
use crate::metrics::Metrics;
use crate::smpp::{
    submit_pdus, ClientOptions, Outbound, ShortMessage, SmppClient, SmppError, Transmitter,
};
use crate::window::SendWindow;
use chrono::{DateTime, Utc};
use smsgw_common::config::{Conn, WorkerConfig};
use smsgw_common::types::{now_epoch, Epoch, MessageId, QueueItem, Status};
use smsgw_common::{Config, Error};
use smsgw_storage::{Message, MessageStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Worker failures; every one of them is fatal for the process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("SMPP bind failed: {0}")]
    Bind(SmppError),

    #[error("SMPP session lost")]
    Disconnected,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("store error: {0}")]
    Store(String),
}

impl WorkerError {
    /// Exit status telling the supervisor not to restart the process
    pub const EXIT_NO_RESTART: i32 = 2;
}

/// What happened to one message on the send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Not in Queued state any more (stopped, or already handled)
    Skipped,
    /// Outside its send window, moved back to Scheduled
    Rescheduled(Epoch),
    Sent(String),
    Failed(String),
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

struct Inner {
    conn: Conn,
    group: String,
    store: Arc<dyn MessageStore>,
    transmitter: Arc<dyn Transmitter>,
    retry_count: u32,
    dlv_tick: Mutex<Interval>,
    send_tick: Mutex<Interval>,
    bucket: Arc<Semaphore>,
    // segments of one message go out back to back
    wire: Mutex<()>,
    tasks: TaskTracker,
    fatal: watch::Sender<bool>,
    metrics: Option<Metrics>,
}

/// Send path of one connection
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    pub fn new(
        conn: Conn,
        group: impl Into<String>,
        store: Arc<dyn MessageStore>,
        transmitter: Arc<dyn Transmitter>,
        retry_count: u32,
    ) -> Self {
        Self::build(conn, group.into(), store, transmitter, retry_count, None)
    }

    pub fn with_metrics(self, metrics: Metrics) -> Self {
        let inner = &self.inner;
        Self::build(
            inner.conn.clone(),
            inner.group.clone(),
            inner.store.clone(),
            inner.transmitter.clone(),
            inner.retry_count,
            Some(metrics),
        )
    }

    fn build(
        conn: Conn,
        group: String,
        store: Arc<dyn MessageStore>,
        transmitter: Arc<dyn Transmitter>,
        retry_count: u32,
        metrics: Option<Metrics>,
    ) -> Self {
        let rate = conn.rate_interval();
        let size = conn.size.max(1) as usize;
        let (fatal, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                group,
                store,
                transmitter,
                retry_count: retry_count.max(1),
                dlv_tick: Mutex::new(ticker(rate)),
                send_tick: Mutex::new(ticker(rate)),
                bucket: Arc::new(Semaphore::new(size)),
                wire: Mutex::new(()),
                tasks: TaskTracker::new(),
                fatal,
                metrics,
                conn,
            }),
        }
    }

    pub fn conn(&self) -> &Conn {
        &self.inner.conn
    }

    /// Resolves once a send task hit a lost session
    pub fn failed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.fatal.subscribe();
        async move {
            let _ = rx.wait_for(|failed| *failed).await;
        }
    }

    /// Handle one broker delivery: pace, load, hand off to a send task, ack
    pub async fn handle(&self, delivery: Delivery) {
        let item = match QueueItem::from_bytes(delivery.body()) {
            Ok(item) => item,
            Err(e) => {
                error!(error = %e, body = ?String::from_utf8_lossy(delivery.body()), "Failed in parsing queue item");
                if let Err(e) = delivery.nack(false, true).await {
                    error!(error = %e, "Couldn't nack delivery");
                }
                return;
            }
        };

        {
            let mut dlv_tick = self.inner.dlv_tick.lock().await;
            for _ in 0..item.total.max(1) {
                dlv_tick.tick().await;
            }
        }

        let message = match self.inner.store.get(item.msg_id).await {
            Ok(message) => message,
            Err(Error::NotFound(_)) => {
                warn!(msg_id = item.msg_id, "Queued message no longer exists");
                if let Err(e) = delivery.ack(false).await {
                    error!(error = %e, "Couldn't ack delivery");
                }
                return;
            }
            Err(e) => {
                error!(msg_id = item.msg_id, error = %e, "Failed in fetching message from db");
                if let Err(e) = delivery.nack(false, true).await {
                    error!(error = %e, "Couldn't nack delivery");
                }
                return;
            }
        };

        let worker = self.clone();
        self.inner.tasks.spawn(async move {
            if let Err(e) = worker.send(message).await {
                error!(conn = %worker.inner.conn.id, error = %e, "Send task failed");
            }
        });

        if let Err(e) = delivery.ack(false).await {
            error!(msg_id = item.msg_id, error = %e, "Couldn't ack delivery");
        }
    }

    /// Send one message now
    pub async fn send(&self, message: Message) -> Result<SendOutcome, WorkerError> {
        self.send_at(message, Utc::now()).await
    }

    /// Send one message, evaluating its send window at `now`
    pub async fn send_at(
        &self,
        mut m: Message,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, WorkerError> {
        if m.status != Status::Queued {
            debug!(msg_id = m.id, status = %m.status.as_str(), "Message is not queued, skipping");
            return Ok(SendOutcome::Skipped);
        }

        if let Some(window) = SendWindow::from_bounds(&m.send_after, &m.send_before) {
            if let Some(at) = window.defer_until(now) {
                m.scheduled_at = at;
                m.status = Status::Scheduled;
                if !self.record(&m).await? {
                    return Ok(SendOutcome::Skipped);
                }
                info!(msg_id = m.id, scheduled_at = at, "Outside send window, scheduling message");
                return Ok(SendOutcome::Rescheduled(at));
            }
        }

        let out = Outbound {
            src: &m.src,
            dst: &m.dst,
            text: m.wire_text(),
            enc: m.enc,
            is_flash: m.is_flash,
        };
        let conn = &self.inner.conn;
        let pdus = submit_pdus(&out, &conn.fields, conn.segmentation, rand::random());

        let mut sent_at = 0;
        let result = {
            let _slot = self
                .inner
                .bucket
                .acquire()
                .await
                .map_err(|_| WorkerError::Disconnected)?;
            let _wire = self.inner.wire.lock().await;
            if !self.still_queued(m.id).await? {
                return Ok(SendOutcome::Skipped);
            }
            self.submit_all(pdus, &mut sent_at).await
        };
        if sent_at == 0 {
            sent_at = now_epoch();
        }

        match result {
            Ok(resp_id) => {
                m.resp_id = resp_id.clone();
                m.connection = conn.id.clone();
                m.sent_at = sent_at;
                m.status = Status::Sent;
                m.error.clear();
                if !self.record(&m).await? {
                    warn!(msg_id = m.id, resp_id = %resp_id, "Message left Queued while in flight");
                    return Ok(SendOutcome::Skipped);
                }
                info!(msg_id = m.id, conn = %conn.id, resp_id = %resp_id, "Sent message");
                Ok(SendOutcome::Sent(resp_id))
            }
            Err(SmppError::NotConnected) => {
                error!(msg_id = m.id, conn = %conn.id, "SMPP not connected, aborting worker");
                self.inner.fatal.send_replace(true);
                Err(WorkerError::Disconnected)
            }
            Err(e) => {
                warn!(msg_id = m.id, conn = %conn.id, error = %e, "Couldn't send message");
                m.error = e.to_string();
                m.sent_at = sent_at;
                m.status = Status::Error;
                if !self.record(&m).await? {
                    return Ok(SendOutcome::Skipped);
                }
                Ok(SendOutcome::Failed(m.error))
            }
        }
    }

    /// Submit every segment in order; the first segment's id identifies the message
    async fn submit_all(
        &self,
        pdus: Vec<ShortMessage>,
        sent_at: &mut Epoch,
    ) -> Result<String, SmppError> {
        let mut first = None;
        let total = pdus.len();
        for (i, pdu) in pdus.into_iter().enumerate() {
            let id = self.submit_with_retry(pdu, sent_at).await?;
            if total > 1 {
                debug!(part = i + 1, total, "Sent part");
            }
            first.get_or_insert(id);
        }
        Ok(first.unwrap_or_default())
    }

    async fn submit_with_retry(
        &self,
        pdu: ShortMessage,
        sent_at: &mut Epoch,
    ) -> Result<String, SmppError> {
        let retries = self.inner.retry_count;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.inner.send_tick.lock().await.tick().await;
            if *sent_at == 0 {
                *sent_at = now_epoch();
            }
            let result = self.inner.transmitter.submit(pdu.clone()).await;
            self.count_submit(&result);
            match result {
                Err(e) if e.is_throttled() && attempt < retries => {
                    info!(attempt, conn = %self.inner.conn.id, "Throttled, retrying");
                }
                other => return other,
            }
        }
    }

    fn count_submit(&self, result: &Result<String, SmppError>) {
        if let Some(metrics) = &self.inner.metrics {
            let label = match result {
                Ok(_) => "ok",
                Err(e) if e.is_throttled() => "throttled",
                Err(_) => "error",
            };
            metrics
                .smpp_submits
                .with_label_values(&[&self.inner.conn.id, label])
                .inc();
        }
    }

    /// Re-read the row; a Stop may have landed since the delivery was loaded
    async fn still_queued(&self, id: MessageId) -> Result<bool, WorkerError> {
        match self.inner.store.get(id).await {
            Ok(current) if current.status == Status::Queued => Ok(true),
            Ok(current) => {
                debug!(msg_id = id, status = %current.status.as_str(), "Message is not queued, skipping");
                Ok(false)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => {
                error!(msg_id = id, error = %e, "Failed in fetching message from db");
                Err(WorkerError::Store(e.to_string()))
            }
        }
    }

    /// Write back a message that was Queued when loaded.
    /// Returns false when the row has moved on and the write was refused.
    async fn record(&self, m: &Message) -> Result<bool, WorkerError> {
        match self.inner.store.update(m, Status::Queued).await {
            Ok(()) => Ok(true),
            Err(Error::Conflict(reason)) => {
                debug!(msg_id = m.id, %reason, "Message state changed, dropping update");
                Ok(false)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => {
                error!(msg_id = m.id, error = %e, "Couldn't update message");
                Err(WorkerError::Store(e.to_string()))
            }
        }
    }

    /// Bind the broker keys of this connection and start consuming
    pub async fn subscribe(&self, broker: &dyn Broker) -> Result<Subscription, WorkerError> {
        let consumer = broker
            .bind(&self.inner.group, &self.inner.conn.pfxs)
            .await
            .map_err(|e| WorkerError::Broker(e.to_string()))?;
        info!(group = %self.inner.group, pfxs = ?self.inner.conn.pfxs, "Bound to routing keys");
        let worker = self.clone();
        Ok(Subscription::spawn(consumer, move |delivery| {
            let worker = worker.clone();
            async move { worker.handle(delivery).await }
        }))
    }

    /// Wait for every spawned send task to finish
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

/// Run the worker of connection `cid` in `group` until `shutdown` resolves
/// or the session is lost.
pub async fn run(
    config: &Config,
    group: &str,
    cid: &str,
    store: Arc<dyn MessageStore>,
    broker: Arc<dyn Broker>,
    metrics: Option<Metrics>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), WorkerError> {
    let conn = config
        .conn(group, cid)
        .map_err(|e| WorkerError::Config(e.to_string()))?
        .clone();
    run_conn(&conn, &config.worker, group, store, broker, metrics, shutdown).await
}

async fn run_conn(
    conn: &Conn,
    settings: &WorkerConfig,
    group: &str,
    store: Arc<dyn MessageStore>,
    broker: Arc<dyn Broker>,
    metrics: Option<Metrics>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), WorkerError> {
    info!(conn = %conn.id, url = %conn.url, user = %conn.user, "Dialing");
    let options = ClientOptions::from_conn(conn, settings);
    let (client, inbound) = SmppClient::connect(&options)
        .await
        .map_err(WorkerError::Bind)?;

    let mut handler = InboundHandler::new(store.clone(), &conn.id, group, conn.receiver.clone());
    let mut worker = Worker::new(conn.clone(), group, store, client.clone(), settings.retry_count);
    if let Some(metrics) = metrics {
        handler = handler.with_metrics(metrics.clone());
        worker = worker.with_metrics(metrics);
    }
    let receipts = tokio::spawn(handler.run(inbound));

    let subscription = match worker.subscribe(broker.as_ref()).await {
        Ok(subscription) => subscription,
        Err(e) => {
            client.close().await;
            return Err(e);
        }
    };

    let outcome = tokio::select! {
        _ = shutdown => {
            info!("Shutting down gracefully");
            Ok(())
        }
        _ = client.disconnected() => Err(WorkerError::Disconnected),
        _ = worker.failed() => Err(WorkerError::Disconnected),
    };

    subscription.close().await;
    if outcome.is_ok() {
        worker.drain().await;
    }
    client.close().await;
    receipts.abort();
    outcome
}
