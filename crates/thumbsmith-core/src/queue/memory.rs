//! In-process queue channel.
//!
//! Each topic is an unbounded FIFO. Deliveries in flight are tracked by tag
//! until settled; requeued messages go to the back of the topic with their
//! attempt counter incremented. Several consumers of one topic compete for
//! messages.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{Acknowledger, Delivery, QueueChannel, Subscription};
use crate::error::QueueError;

struct Envelope {
    payload: Vec<u8>,
    attempt: u32,
}

/// Delivery counters for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    /// Messages not yet acknowledged (queued, in flight or awaiting requeue)
    pub outstanding: usize,
}

struct Topic {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    outstanding: watch::Sender<usize>,
    stats: TopicStats,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            outstanding,
            stats: TopicStats::default(),
        }
    }
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    in_flight: Mutex<HashMap<u64, (String, Envelope)>>,
    next_tag: AtomicU64,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<u64, (String, Envelope)>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_topic<R>(&self, name: &str, f: impl FnOnce(&mut Topic) -> R) -> R {
        let mut topics = self.topics();
        let topic = topics.entry(name.to_string()).or_insert_with(Topic::new);
        f(topic)
    }
}

impl Acknowledger for Inner {
    fn ack(&self, tag: u64) {
        let Some((topic, _)) = self.in_flight().remove(&tag) else {
            return;
        };
        self.with_topic(&topic, |t| {
            t.stats.acked += 1;
            t.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        });
    }

    fn requeue(&self, tag: u64, delay: Duration) {
        let Some((topic, mut envelope)) = self.in_flight().remove(&tag) else {
            return;
        };
        envelope.attempt += 1;
        let tx = self.with_topic(&topic, |t| {
            t.stats.requeued += 1;
            t.tx.clone()
        });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !delay.is_zero() => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(envelope);
                });
            }
            _ => {
                let _ = tx.send(envelope);
            }
        }
    }
}

/// An in-process [`QueueChannel`].
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivery counters for a topic.
    pub fn stats(&self, topic: &str) -> TopicStats {
        self.inner.with_topic(topic, |t| TopicStats {
            outstanding: *t.outstanding.borrow(),
            ..t.stats
        })
    }

    /// Wait until every message on `topic` has been acknowledged.
    pub async fn wait_idle(&self, topic: &str) {
        let mut rx = self.inner.with_topic(topic, |t| t.outstanding.subscribe());
        // The sender lives in the topic map, which outlives this call.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[async_trait]
impl QueueChannel for MemoryQueue {
    async fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.inner.with_topic(topic, |t| -> Result<(), QueueError> {
            t.tx.send(Envelope {
                payload,
                attempt: 1,
            })
            .map_err(|_| QueueError::Closed(topic.to_string()))?;
            t.stats.enqueued += 1;
            t.outstanding.send_modify(|n| *n += 1);
            Ok(())
        })
    }

    async fn consume(&self, topic: &str) -> Result<Subscription, QueueError> {
        let rx = self.inner.with_topic(topic, |t| t.rx.clone());
        let inner = self.inner.clone();
        let name = topic.to_string();

        let deliveries = stream::unfold((rx, inner, name), |(rx, inner, name)| async move {
            let envelope = rx.lock().await.recv().await?;
            let tag = inner.next_tag.fetch_add(1, Ordering::SeqCst);
            let payload = envelope.payload.clone();
            let attempt = envelope.attempt;

            inner.with_topic(&name, |t| t.stats.delivered += 1);
            inner.in_flight().insert(tag, (name.clone(), envelope));

            let acker: Arc<dyn Acknowledger> = inner.clone();
            let delivery = Delivery::new(payload, tag, attempt, acker);
            Some((delivery, (rx, inner, name)))
        });

        Ok(Subscription::new(topic, Box::pin(deliveries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_delivery_and_ack() {
        let queue = MemoryQueue::new();
        queue.enqueue("photos", b"a".to_vec()).await.unwrap();
        queue.enqueue("photos", b"b".to_vec()).await.unwrap();

        let mut sub = queue.consume("photos").await.unwrap();
        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.payload(), b"a");
        assert_eq!(second.payload(), b"b");
        assert_eq!(first.attempt(), 1);

        first.ack();
        second.ack();
        let stats = queue.stats("photos");
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.outstanding, 0);
    }

    #[tokio::test]
    async fn test_requeue_redelivers_with_next_attempt() {
        let queue = MemoryQueue::new();
        queue.enqueue("photos", b"a".to_vec()).await.unwrap();
        let mut sub = queue.consume("photos").await.unwrap();

        sub.next().await.unwrap().requeue(Duration::from_millis(5));
        let again = sub.next().await.unwrap();
        assert_eq!(again.payload(), b"a");
        assert_eq!(again.attempt(), 2);
        again.ack();

        let stats = queue.stats("photos");
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let queue = MemoryQueue::new();
        queue.enqueue("photos", b"a".to_vec()).await.unwrap();
        let mut sub = queue.consume("photos").await.unwrap();

        drop(sub.next().await.unwrap());
        let again = sub.next().await.unwrap();
        assert_eq!(again.attempt(), 2);
        again.ack();
        assert_eq!(queue.stats("photos").outstanding, 0);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let queue = MemoryQueue::new();
        queue.enqueue("photos", b"a".to_vec()).await.unwrap();
        let mut sub = queue.consume("photos").await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle("photos").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        sub.next().await.unwrap().ack();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let queue = MemoryQueue::new();
        queue.enqueue("a", b"1".to_vec()).await.unwrap();
        assert_eq!(queue.stats("a").outstanding, 1);
        assert_eq!(queue.stats("b").outstanding, 0);
    }
}
