use util::broker::TopicBroker;
use uuid::Uuid;

use super::topics::chat_topic;
use super::types::WsOut;

/// Serializes `event` and publishes it. Failures are logged and not retried.
pub async fn publish(broker: &dyn TopicBroker, topic: &str, event: &WsOut) -> bool {
    let Some(payload) = event.to_json() else {
        return false;
    };
    match broker.publish(topic, payload).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Broker publish failed");
            false
        }
    }
}

pub async fn broadcast_to_chat(broker: &dyn TopicBroker, chat_id: Uuid, event: &WsOut) -> bool {
    publish(broker, &chat_topic(chat_id), event).await
}
