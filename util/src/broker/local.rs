//! In-process topic broker.
//!
//! Uses Tokio broadcast channels per topic. Each subscription owns one pump task
//! per topic that forwards into a single mpsc receiver, so a subscriber sees a
//! merged stream while same-topic ordering is kept.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use super::{
    BrokerError, Subscription, SubscriptionControl, TopicBroker, validate_topic,
};

/// Type alias for topic name.
type Topic = String;

/// Sender for a topic's broadcast channel.
type Sender = broadcast::Sender<String>;

/// Receiver for a topic's broadcast channel.
type Receiver = broadcast::Receiver<String>;

const DEFAULT_CAPACITY: usize = 256;

/// Manages broadcast channels per topic.
///
/// - Lazily creates broadcast channels per topic on first subscription
/// - Removes topics when their subscriber count drops to zero after sending
#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<RwLock<HashMap<Topic, Sender>>>,
    capacity: usize,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalBroker {
    /// `capacity` bounds both the per-topic broadcast buffer and each
    /// subscription's merged queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to the given topic, creating it if necessary.
    async fn receiver(&self, topic: &str) -> Receiver {
        let mut map = self.inner.write().await;
        map.entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of topics that currently have a broadcast channel.
    pub async fn topic_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl TopicBroker for LocalBroker {
    /// Broadcasts a message to all subscribers of `topic`.
    ///
    /// If the topic does not exist, it's a no-op.
    /// If the topic has zero subscribers after sending, it is removed.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        validate_topic(topic)?;
        let orphaned = {
            let map = self.inner.read().await;
            match map.get(topic) {
                Some(sender) => sender.send(payload).is_err(),
                None => false,
            }
        };
        if orphaned {
            let mut map = self.inner.write().await;
            if map.get(topic).is_some_and(|s| s.receiver_count() == 0) {
                tracing::debug!(topic = %topic, "Removing topic with no subscribers");
                map.remove(topic);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let control = Arc::new(LocalSubscription {
            broker: self.clone(),
            tx: Mutex::new(Some(tx)),
            pumps: Mutex::new(HashMap::new()),
        });
        for topic in topics {
            control.add(topic).await?;
        }
        Ok(Subscription::new(rx, control))
    }
}

struct LocalSubscription {
    broker: LocalBroker,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    pumps: Mutex<HashMap<Topic, JoinHandle<()>>>,
}

impl LocalSubscription {
    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SubscriptionControl for LocalSubscription {
    async fn add(&self, topic: &str) -> Result<(), BrokerError> {
        validate_topic(topic)?;
        let tx = self.sender().ok_or(BrokerError::Closed)?;
        if self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic)
        {
            return Ok(());
        }

        let brx = self.broker.receiver(topic).await;
        let mut pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        // Re-check: a concurrent add or a close may have raced the await above.
        if pumps.contains_key(topic) {
            return Ok(());
        }
        if self.sender().is_none() {
            return Err(BrokerError::Closed);
        }
        pumps.insert(topic.to_string(), tokio::spawn(pump(topic.to_string(), brx, tx)));
        Ok(())
    }

    async fn remove(&self, topic: &str) {
        let handle = self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if let Some(h) = handle {
            h.abort();
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let mut pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, h) in pumps.drain() {
            h.abort();
        }
    }

    fn topics(&self) -> Vec<String> {
        let pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        let mut topics: Vec<String> = pumps.keys().cloned().collect();
        topics.sort();
        topics
    }
}

async fn pump(topic: String, mut brx: Receiver, tx: mpsc::Sender<String>) {
    loop {
        match brx.recv().await {
            Ok(payload) => {
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(topic = %topic, skipped, "Subscriber lagged behind topic");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
