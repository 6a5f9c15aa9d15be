//! At-least-once message delivery with per-delivery acknowledgement.
//!
//! Consumers receive [`Delivery`] values and must settle each one with
//! [`Delivery::ack`] or [`Delivery::requeue`]. A delivery dropped without
//! being settled goes back on its topic, the way an AMQP channel returns
//! unacknowledged messages when it closes.

pub mod memory;

pub use memory::{MemoryQueue, TopicStats};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueError;

/// Settles deliveries on behalf of a queue implementation.
pub trait Acknowledger: Send + Sync {
    /// The delivery was handled; drop the message.
    fn ack(&self, tag: u64);

    /// The delivery was not handled; make it eligible again after `delay`.
    fn requeue(&self, tag: u64, delay: Duration);
}

/// One delivery of a message from a topic.
pub struct Delivery {
    payload: Vec<u8>,
    tag: u64,
    attempt: u32,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, tag: u64, attempt: u32, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            payload,
            tag,
            attempt,
            acker: Some(acker),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Queue-assigned tag, unique per delivery.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// 1 for the first delivery of a message, incremented on each requeue.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.ack(self.tag);
        }
    }

    pub fn requeue(mut self, delay: Duration) {
        if let Some(acker) = self.acker.take() {
            acker.requeue(self.tag, delay);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            tracing::debug!(tag = self.tag, "Delivery dropped unsettled, requeueing");
            acker.requeue(self.tag, Duration::ZERO);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("attempt", &self.attempt)
            .field("payload_len", &self.payload.len())
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

/// A lazy sequence of deliveries from one topic.
pub struct Subscription {
    topic: String,
    inner: BoxStream<'static, Delivery>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, inner: BoxStream<'static, Delivery>) -> Self {
        Self {
            topic: topic.into(),
            inner,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next delivery. `None` once the topic is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.inner.next().await
    }
}

/// Durable FIFO topics with at-least-once delivery.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Append a message to a topic, creating the topic if needed.
    async fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Start consuming a topic, creating it if needed.
    async fn consume(&self, topic: &str) -> Result<Subscription, QueueError>;
}
