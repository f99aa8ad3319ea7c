//! Topic broadcast - best effort, unordered, possibly duplicated delivery

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use zebu_core::{ZebuError, ZebuResult};

/// Default per-subscriber buffer
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

/// Sending half of a subscription
pub type MessageSender = mpsc::Sender<ZebuResult<Bytes>>;

/// Live stream of messages on one topic
///
/// `recv` yields `Some(Err(_))` when the transport reports a failure and
/// `None` once the subscription has ended. Either way the subscriber should
/// subscribe again.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<ZebuResult<Bytes>>,
}

impl Subscription {
    /// Create a subscription and the sender that feeds it
    pub fn channel(topic: impl Into<String>, capacity: usize) -> (MessageSender, Subscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Subscription {
                topic: topic.into(),
                rx,
            },
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, `None` when the subscription is closed
    pub async fn recv(&mut self) -> Option<ZebuResult<Bytes>> {
        self.rx.recv().await
    }
}

/// Topic publish/subscribe
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Hand a message to the transport. Success says nothing about delivery.
    async fn publish(&self, topic: &str, data: Bytes) -> ZebuResult<()>;

    async fn subscribe(&self, topic: &str) -> ZebuResult<Subscription>;
}

/// Delivery counters for a [`MemoryBroadcast`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Process-local broadcast bus
///
/// Every subscriber gets its own bounded channel. A full channel drops the
/// message for that subscriber only.
#[derive(Debug)]
pub struct MemoryBroadcast {
    topics: Mutex<HashMap<String, Vec<MessageSender>>>,
    capacity: usize,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Default for MemoryBroadcast {
    fn default() -> Self {
        MemoryBroadcast::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }
}

impl MemoryBroadcast {
    pub fn new() -> Self {
        MemoryBroadcast::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryBroadcast {
            topics: Mutex::new(HashMap::new()),
            capacity,
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Make `publish` return a transport error
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make `subscribe` return a transport error
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Push an error into every subscription on `topic` and close them
    pub fn fail_subscriptions(&self, topic: &str) -> usize {
        let senders = self.topics.lock().remove(topic).unwrap_or_default();
        let count = senders.len();
        for tx in senders {
            let _ = tx.try_send(Err(ZebuError::SubscriptionClosed(topic.to_string())));
        }
        tracing::debug!(topic, count, "failed subscriptions");
        count
    }

    /// Live subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl BroadcastTransport for MemoryBroadcast {
    async fn publish(&self, topic: &str, data: Bytes) -> ZebuResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ZebuError::Transport(format!("publish to {topic} refused")));
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(topic) else {
            return Ok(());
        };
        subscribers.retain(|tx| match tx.try_send(Ok(data.clone())) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(topic, "subscriber full, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ZebuResult<Subscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ZebuError::Transport(format!("subscribe to {topic} refused")));
        }
        let (tx, subscription) = Subscription::channel(topic, self.capacity);
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(subscription)
    }
}
