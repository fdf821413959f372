//! Online/offline fan-out to everyone who shares a chat with a user.

use chrono::{DateTime, Utc};
use db::ChatStore;
use sea_orm::DbErr;
use std::collections::BTreeSet;
use util::broker::TopicBroker;
use uuid::Uuid;

use super::connection::Connection;
use super::emit::publish;
use super::hub::Hub;
use super::topics::user_topic;
use super::types::WsOut;

/// Distinct users sharing at least one chat with `user_id`, excluding the user.
pub async fn contacts_of(store: &dyn ChatStore, user_id: Uuid) -> Result<BTreeSet<Uuid>, DbErr> {
    let mut contacts = BTreeSet::new();
    for chat_id in store.list_memberships(user_id).await? {
        contacts.extend(store.list_other_members(chat_id, user_id).await?);
    }
    contacts.remove(&user_id);
    Ok(contacts)
}

/// Publishes the user's status to each contact's personal topic.
pub async fn publish_status(
    broker: &dyn TopicBroker,
    contacts: &BTreeSet<Uuid>,
    user_id: Uuid,
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
) {
    let event = WsOut::OnlineStatus {
        user_id,
        is_online,
        timestamp: Utc::now().timestamp(),
        last_seen,
    };
    for contact in contacts {
        publish(broker, &user_topic(*contact), &event).await;
    }
    tracing::debug!(user_id = %user_id, is_online, contacts = contacts.len(), "Presence published");
}

/// Tells a fresh session which of its contacts are connected right now.
pub fn send_snapshot(hub: &Hub, conn: &Connection, contacts: &BTreeSet<Uuid>) -> usize {
    let now = Utc::now().timestamp();
    contacts
        .iter()
        .filter(|c| hub.is_online(**c))
        .filter_map(|c| {
            WsOut::OnlineStatus {
                user_id: *c,
                is_online: true,
                timestamp: now,
                last_seen: None,
            }
            .to_json()
        })
        .filter(|payload| conn.enqueue(payload.clone()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{RecordingBroker, TestWorld};
    use std::sync::Arc;

    #[tokio::test]
    async fn contacts_are_deduplicated_across_chats() {
        let world = TestWorld::new().await;
        let [a, b, c, d] = world.users(["a", "b", "c", "d"]).await;
        world.group(&[a, b, c]).await;
        world.group(&[a, b]).await;
        world.group(&[c, d]).await;

        let contacts = contacts_of(world.store.as_ref(), a).await.unwrap();
        assert_eq!(contacts, BTreeSet::from([b, c]));

        let lonely = world.users(["e"]).await[0];
        assert!(contacts_of(world.store.as_ref(), lonely).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_goes_to_every_contact_topic() {
        let world = TestWorld::new().await;
        let [a, b, c] = world.users(["a", "b", "c"]).await;
        world.group(&[a, b]).await;
        world.group(&[a, c]).await;
        let broker = Arc::new(RecordingBroker::default());

        let seen = Utc::now();
        let contacts = contacts_of(world.store.as_ref(), a).await.unwrap();
        publish_status(broker.as_ref(), &contacts, a, false, Some(seen)).await;

        for contact in [b, c] {
            let events = broker.events_on(&user_topic(contact));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0]["type"], "online_status");
            assert_eq!(events[0]["user_id"], a.to_string());
            assert_eq!(events[0]["is_online"], false);
            assert!(events[0]["last_seen"].is_string());
        }
        assert!(broker.events_on(&user_topic(a)).is_empty());
    }
}
