//! Inbound deliver_sm handling: receipts update the store, mobile
//! originated messages go to the connection's receiver command.

use crate::metrics::Metrics;
use crate::smpp::{Inbound, Receipt};
use smsgw_common::Error;
use smsgw_storage::MessageStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Attempts made when a receipt races the sent write-back
const RECEIPT_ATTEMPTS: u32 = 3;
const RECEIPT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Consumes inbound events of one session.
pub struct InboundHandler {
    store: Arc<dyn MessageStore>,
    conn_id: String,
    group: String,
    receiver: Option<String>,
    metrics: Option<Metrics>,
}

impl InboundHandler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        conn_id: impl Into<String>,
        group: impl Into<String>,
        receiver: Option<String>,
    ) -> Self {
        Self {
            store,
            conn_id: conn_id.into(),
            group: group.into(),
            receiver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drain the inbound channel until the session closes it
    pub async fn run(self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Receipt(receipt) => self.on_receipt(receipt).await,
                Inbound::Message { src, dst, body } => self.on_message(&src, &dst, &body).await,
            }
        }
        debug!(conn = %self.conn_id, "Inbound channel closed");
    }

    async fn on_receipt(&self, receipt: Receipt) {
        let Some(status) = receipt.status else {
            debug!(resp_id = %receipt.id, state = %receipt.state, "Intermediate receipt ignored");
            return;
        };
        if let Some(metrics) = &self.metrics {
            metrics.receipts.with_label_values(&[status.as_str()]).inc();
        }

        for attempt in 1..=RECEIPT_ATTEMPTS {
            match self.store.save_delivery(&receipt.id, status).await {
                Ok(()) => {
                    info!(resp_id = %receipt.id, status = %status.as_str(), "Saved delivery receipt");
                    return;
                }
                Err(Error::NotFound(_)) if attempt < RECEIPT_ATTEMPTS => {
                    tokio::time::sleep(RECEIPT_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(resp_id = %receipt.id, error = %e, "Couldn't save delivery receipt");
                    return;
                }
            }
        }
    }

    async fn on_message(&self, src: &str, dst: &str, body: &str) {
        let Some(command) = &self.receiver else {
            debug!(src, dst, "Mobile originated message without receiver, dropped");
            return;
        };
        let child = Command::new(command)
            .args([src, dst, body, &self.conn_id, &self.group])
            .kill_on_drop(false)
            .spawn();
        match child {
            Ok(mut child) => {
                let command = command.clone();
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if status.success() => {}
                        Ok(status) => warn!(%command, %status, "Receiver command failed"),
                        Err(e) => warn!(%command, error = %e, "Receiver command failed"),
                    }
                });
            }
            Err(e) => error!(%command, error = %e, "Couldn't start receiver command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use smsgw_common::types::Status;
    use smsgw_storage::{MemoryMessageStore, Message};

    fn sent(resp_id: &str) -> Message {
        Message {
            resp_id: resp_id.to_string(),
            dst: "923001234567".to_string(),
            src: "DEMO".to_string(),
            status: Status::Sent,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_receipt_marks_delivered() {
        let store = Arc::new(MemoryMessageStore::new());
        let saved = store.save(sent("ABC123")).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let handler = InboundHandler::new(store.clone(), "c1", "Default", None);
        tx.send(Inbound::Receipt(Receipt {
            id: "ABC123".to_string(),
            state: "DELIVRD".to_string(),
            status: Some(Status::Delivered),
        }))
        .await
        .unwrap();
        drop(tx);
        handler.run(rx).await;

        let m = store.get(saved.id).await.unwrap();
        assert_eq!(m.status, Status::Delivered);
        assert!(m.delivered_at > 0);
    }

    #[tokio::test]
    async fn test_intermediate_receipt_is_ignored() {
        let store = Arc::new(MemoryMessageStore::new());
        let saved = store.save(sent("X1")).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(Inbound::Receipt(Receipt {
            id: "X1".to_string(),
            state: "ENROUTE".to_string(),
            status: None,
        }))
        .await
        .unwrap();
        drop(tx);
        InboundHandler::new(store.clone(), "c1", "Default", None).run(rx).await;

        assert_eq!(store.get(saved.id).await.unwrap().status, Status::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_receipt_gives_up() {
        let store = Arc::new(MemoryMessageStore::new());
        let metrics = Metrics::new().unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Inbound::Receipt(Receipt {
            id: "nope".to_string(),
            state: "UNDELIV".to_string(),
            status: Some(Status::NotDelivered),
        }))
        .await
        .unwrap();
        drop(tx);
        InboundHandler::new(store, "c1", "Default", None)
            .with_metrics(metrics.clone())
            .run(rx)
            .await;
        assert_eq!(metrics.receipts.with_label_values(&["Not Delivered"]).get(), 1);
    }
}
