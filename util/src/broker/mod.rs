//! Topic publish/subscribe boundary used by the real-time layer.
//!
//! The rest of the system only relies on [`TopicBroker::publish`] and
//! [`TopicBroker::subscribe`]. Payloads are already-serialized JSON text and are
//! delivered verbatim. Per-topic publish order is preserved for each subscriber;
//! nothing is promised across topics.

pub mod local;

pub use local::LocalBroker;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("subscription is closed")]
    Closed,
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
}

/// A shared publish/subscribe service. Safe for concurrent publish from many callers.
#[async_trait]
pub trait TopicBroker: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    /// Opens one subscription covering all `topics`. More topics can be added
    /// or removed later through [`Subscription::handle`].
    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError>;
}

/// Mutates the topic list of a live subscription.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    async fn add(&self, topic: &str) -> Result<(), BrokerError>;

    async fn remove(&self, topic: &str);

    /// Stops delivery. Idempotent; `recv` returns `None` once drained.
    fn close(&self);

    fn topics(&self) -> Vec<String>;
}

pub type SubscriptionHandle = Arc<dyn SubscriptionControl>;

/// Receiving end of a broker subscription.
///
/// Dropping it closes the subscription.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
    control: SubscriptionHandle,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<String>, control: SubscriptionHandle) -> Self {
        Self { rx, control }
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn handle(&self) -> SubscriptionHandle {
        Arc::clone(&self.control)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.control.close();
    }
}

/// Rejects empty or whitespace-bearing topic names.
pub(crate) fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() || topic.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}
