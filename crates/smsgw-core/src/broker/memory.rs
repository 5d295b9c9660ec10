//! In-process broker backend.
//!
//! A direct exchange: every consumer gets a private priority queue bound to
//! its routing keys; publishes with no bound queue are dropped.

use super::{binding_keys, Acknowledger, Broker, Consumer, Delivery, Settlement};
use async_trait::async_trait;
use smsgw_common::types::MAX_PRIORITY;
use smsgw_common::Result;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tracing::debug;

#[derive(Debug)]
struct Entry {
    priority: u8,
    seq: u64,
    routing_key: String,
    body: Vec<u8>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // highest priority first, FIFO within a priority
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
}

impl Queue {
    async fn push(&self, entry: Entry) {
        self.heap.lock().await.push(entry);
        self.notify.notify_one();
    }
}

/// In-memory broker
#[derive(Default, Clone)]
pub struct MemoryBroker {
    bindings: Arc<RwLock<HashMap<String, Vec<Weak<Queue>>>>>,
    seq: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live queues bound to a key
    pub async fn bound(&self, routing_key: &str) -> usize {
        self.bindings
            .read()
            .await
            .get(routing_key)
            .map(|qs| qs.iter().filter(|q| q.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>, priority: u8) -> Result<()> {
        let queues: Vec<Arc<Queue>> = {
            let mut bindings = self.bindings.write().await;
            match bindings.get_mut(routing_key) {
                Some(list) => {
                    list.retain(|q| q.strong_count() > 0);
                    list.iter().filter_map(Weak::upgrade).collect()
                }
                None => Vec::new(),
            }
        };
        if queues.is_empty() {
            debug!(routing_key, "No queue bound, message dropped");
            return Ok(());
        }

        let priority = priority.min(MAX_PRIORITY);
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        for queue in queues {
            queue
                .push(Entry {
                    priority,
                    seq,
                    routing_key: routing_key.to_string(),
                    body: payload.clone(),
                })
                .await;
        }
        Ok(())
    }

    async fn bind(&self, group: &str, prefixes: &[String]) -> Result<Box<dyn Consumer>> {
        let queue = Arc::new(Queue::default());
        let mut bindings = self.bindings.write().await;
        for key in binding_keys(group, prefixes) {
            bindings.entry(key).or_default().push(Arc::downgrade(&queue));
        }
        Ok(Box::new(MemoryConsumer {
            queue,
            prefetch: Arc::new(Semaphore::new(1)),
        }))
    }
}

struct MemoryConsumer {
    queue: Arc<Queue>,
    prefetch: Arc<Semaphore>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let Ok(permit) = self.prefetch.clone().acquire_owned().await else {
            return Ok(None);
        };
        loop {
            if let Some(entry) = self.queue.heap.lock().await.pop() {
                let acker = MemoryAcker {
                    queue: self.queue.clone(),
                    priority: entry.priority,
                    seq: entry.seq,
                    routing_key: entry.routing_key.clone(),
                    body: entry.body.clone(),
                };
                return Ok(Some(Delivery::new(
                    entry.routing_key,
                    entry.priority,
                    entry.body,
                    Box::new(acker),
                    permit,
                )));
            }
            self.queue.notify.notified().await;
        }
    }
}

struct MemoryAcker {
    queue: Arc<Queue>,
    priority: u8,
    seq: u64,
    routing_key: String,
    body: Vec<u8>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn settle(&self, settlement: Settlement) -> Result<()> {
        if settlement == Settlement::Requeue {
            self.queue
                .push(Entry {
                    priority: self.priority,
                    seq: self.seq,
                    routing_key: self.routing_key.clone(),
                    body: self.body.clone(),
                })
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::publish_item;
    use pretty_assertions::assert_eq;
    use smsgw_common::types::QueueItem;
    use std::time::Duration;

    fn prefixes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn next_body(consumer: &mut Box<dyn Consumer>) -> Vec<u8> {
        let d = consumer.next().await.unwrap().unwrap();
        let body = d.body().to_vec();
        d.ack(false).await.unwrap();
        body
    }

    #[tokio::test]
    async fn test_priority_order_then_fifo() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.bind("default", &prefixes(&["92300"])).await.unwrap();

        broker.publish("default-92300", b"low-1".to_vec(), 0).await.unwrap();
        broker.publish("default-92300", b"high".to_vec(), 3).await.unwrap();
        broker.publish("default-92300", b"low-2".to_vec(), 0).await.unwrap();

        assert_eq!(next_body(&mut consumer).await, b"high".to_vec());
        assert_eq!(next_body(&mut consumer).await, b"low-1".to_vec());
        assert_eq!(next_body(&mut consumer).await, b"low-2".to_vec());
    }

    #[tokio::test]
    async fn test_unbound_publish_is_dropped() {
        let broker = MemoryBroker::new();
        broker.publish("default-92300", b"x".to_vec(), 0).await.unwrap();

        let mut consumer = broker.bind("default", &prefixes(&["92300"])).await.unwrap();
        broker.publish("default-92300", b"y".to_vec(), 0).await.unwrap();
        assert_eq!(next_body(&mut consumer).await, b"y".to_vec());
    }

    #[tokio::test]
    async fn test_multiple_prefixes_share_one_queue() {
        let broker = MemoryBroker::new();
        let mut consumer = broker
            .bind("default", &prefixes(&["92300", "92301"]))
            .await
            .unwrap();
        assert_eq!(broker.bound("default-92301").await, 1);

        broker.publish("default-92301", b"a".to_vec(), 0).await.unwrap();
        let d = consumer.next().await.unwrap().unwrap();
        assert_eq!(d.routing_key(), "default-92301");
        d.ack(false).await.unwrap();

        drop(consumer);
        assert_eq!(broker.bound("default-92301").await, 0);
    }

    #[tokio::test]
    async fn test_prefetch_one_until_settled() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.bind("g", &prefixes(&["1"])).await.unwrap();
        broker.publish("g-1", b"a".to_vec(), 0).await.unwrap();
        broker.publish("g-1", b"b".to_vec(), 0).await.unwrap();

        let first = consumer.next().await.unwrap().unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), consumer.next()).await;
        assert!(blocked.is_err());

        first.ack(false).await.unwrap();
        assert_eq!(next_body(&mut consumer).await, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_requeue_and_discard() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.bind("g", &prefixes(&["1"])).await.unwrap();
        broker.publish("g-1", b"a".to_vec(), 0).await.unwrap();

        let d = consumer.next().await.unwrap().unwrap();
        d.nack(false, true).await.unwrap();
        let d = consumer.next().await.unwrap().unwrap();
        assert_eq!(d.body(), b"a");
        d.reject(false).await.unwrap();

        let empty = tokio::time::timeout(Duration::from_millis(50), consumer.next()).await;
        assert!(empty.is_err());
    }

    #[tokio::test]
    async fn test_publish_item_clamps_priority() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.bind("g", &prefixes(&["1"])).await.unwrap();
        let item = QueueItem { msg_id: 42, total: 2 };
        publish_item(&broker, "g-1", &item, 99).await.unwrap();

        let d = consumer.next().await.unwrap().unwrap();
        assert_eq!(d.priority(), MAX_PRIORITY);
        assert_eq!(QueueItem::from_bytes(d.body()).unwrap(), item);
        d.ack(false).await.unwrap();
    }
}
