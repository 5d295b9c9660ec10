//! Priority message broker.
//!
//! Producers publish on `"<group>-<prefix>"` routing keys; each worker binds
//! one consumer to the keys of its connection and receives one delivery at a
//! time. A delivery must be settled (ack, reject or nack) before the
//! consumer hands out the next one.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBroker;
pub use postgres::PgBroker;

use async_trait::async_trait;
use smsgw_common::routing::routing_key;
use smsgw_common::types::{clamp_publish_priority, clamp_receive_priority, QueueItem};
use smsgw_common::Result;
use std::future::Future;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Broker abstraction
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload; priorities above 10 are treated as 10
    async fn publish(&self, routing_key: &str, payload: Vec<u8>, priority: u8) -> Result<()>;

    /// Bind a consumer to `"<group>-<p>"` for every prefix
    async fn bind(&self, group: &str, prefixes: &[String]) -> Result<Box<dyn Consumer>>;
}

/// A bound consumer with a prefetch of one.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery; `None` once the consumer is closed
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    Discard,
}

/// Backend hook settling one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn settle(&self, settlement: Settlement) -> Result<()>;
}

/// One message handed to a consumer.
pub struct Delivery {
    routing_key: String,
    priority: u8,
    body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
    // released when the delivery is settled or dropped
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("priority", &self.priority)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Delivery {
    pub fn new(
        routing_key: String,
        priority: u8,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            routing_key,
            priority: clamp_receive_priority(priority),
            body,
            acker,
            _permit: permit,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Acknowledge. With prefetch 1 `multiple` covers only this delivery.
    pub async fn ack(self, _multiple: bool) -> Result<()> {
        self.acker.settle(Settlement::Ack).await
    }

    pub async fn reject(self, requeue: bool) -> Result<()> {
        self.acker.settle(settle_negative(requeue)).await
    }

    pub async fn nack(self, _multiple: bool, requeue: bool) -> Result<()> {
        self.acker.settle(settle_negative(requeue)).await
    }
}

fn settle_negative(requeue: bool) -> Settlement {
    if requeue {
        Settlement::Requeue
    } else {
        Settlement::Discard
    }
}

/// Serialise a queue item and publish it with a clamped priority
pub async fn publish_item(
    broker: &dyn Broker,
    routing_key: &str,
    item: &QueueItem,
    priority: i32,
) -> Result<()> {
    broker
        .publish(routing_key, item.to_bytes()?, clamp_publish_priority(priority))
        .await
}

/// Routing keys for a group and its prefixes
pub fn binding_keys(group: &str, prefixes: &[String]) -> Vec<String> {
    prefixes.iter().map(|p| routing_key(group, p)).collect()
}

/// A running handler loop over one consumer.
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Run `handler` for every delivery, one at a time.
    pub fn spawn<F, Fut>(mut consumer: Box<dyn Consumer>, mut handler: F) -> Self
    where
        F: FnMut(Delivery) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = stop.changed() => break,
                    next = consumer.next() => next,
                };
                match next {
                    Ok(Some(delivery)) => handler(delivery).await,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to receive delivery");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("Subscription handler loop stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop taking deliveries and wait for the handler loop to exit
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
