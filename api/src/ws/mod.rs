//! Live delivery over WebSockets.
//!
//! A session subscribes to `chat:<id>` for every chat the user belongs to plus
//! its own `user:<id>` topic. Client frames go through [`router`], which
//! persists and publishes; the broker then redelivers to every subscribed
//! session, the sender's included.

use axum::{Router, routing::get};

use crate::state::AppState;

pub mod connection;
pub mod emit;
pub mod handler;
pub mod hub;
pub mod presence;
pub mod router;
pub mod session;
pub mod topics;
pub mod types;
pub mod typing;

pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/", get(handler::ws_entry))
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use db::models::{chat, chat_member, message, user};
    use db::test_utils::setup_test_db;
    use db::{ChatSnapshot, ChatStore, NewMessage, SeaOrmChatStore};
    use sea_orm::{DatabaseConnection, DbErr};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use util::broker::{BrokerError, LocalBroker, Subscription, TopicBroker};
    use util::cache::MemoryStore;
    use uuid::Uuid;

    use super::connection::Connection;
    use super::topics::user_topic;
    use crate::auth::JwtValidator;
    use crate::state::{AppState, WsSettings};

    /// Local broker that also keeps every published payload. Publishing can be
    /// switched to fail, in which case payloads are recorded but not delivered.
    #[derive(Default)]
    pub struct RecordingBroker {
        inner: LocalBroker,
        log: Mutex<Vec<(String, String)>>,
        failing: AtomicBool,
    }

    impl RecordingBroker {
        pub fn events_on(&self, topic: &str) -> Vec<serde_json::Value> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, p)| serde_json::from_str(p).unwrap())
                .collect()
        }

        pub fn published(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        pub fn fail_publishes(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TopicBroker for RecordingBroker {
        async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
            self.log
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.clone()));
            if self.failing.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError> {
            self.inner.subscribe(topics).await
        }
    }

    /// SQLite-backed store with switchable faults.
    pub struct TestStore {
        inner: SeaOrmChatStore,
        failing_messages: AtomicBool,
        last_seen_delay: Mutex<Option<Duration>>,
    }

    impl TestStore {
        pub fn connection(&self) -> &DatabaseConnection {
            self.inner.connection()
        }

        pub fn fail_messages(&self, on: bool) {
            self.failing_messages.store(on, Ordering::SeqCst);
        }

        pub fn delay_last_seen(&self, delay: Duration) {
            *self.last_seen_delay.lock().unwrap() = Some(delay);
        }
    }

    #[async_trait]
    impl ChatStore for TestStore {
        async fn membership(
            &self,
            chat_id: Uuid,
            user_id: Uuid,
        ) -> Result<Option<chat_member::Model>, DbErr> {
            self.inner.membership(chat_id, user_id).await
        }

        async fn create_message(&self, msg: NewMessage) -> Result<message::Model, DbErr> {
            if self.failing_messages.load(Ordering::SeqCst) {
                return Err(DbErr::Custom("message insert failed".into()));
            }
            self.inner.create_message(msg).await
        }

        async fn update_last_read(
            &self,
            chat_id: Uuid,
            user_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<(), DbErr> {
            self.inner.update_last_read(chat_id, user_id, at).await
        }

        async fn count_unread(
            &self,
            chat_id: Uuid,
            user_id: Uuid,
            since: DateTime<Utc>,
        ) -> Result<u64, DbErr> {
            self.inner.count_unread(chat_id, user_id, since).await
        }

        async fn last_message_id(&self, chat_id: Uuid) -> Result<Option<Uuid>, DbErr> {
            self.inner.last_message_id(chat_id).await
        }

        async fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, DbErr> {
            self.inner.list_memberships(user_id).await
        }

        async fn list_other_members(&self, chat_id: Uuid, user_id: Uuid) -> Result<Vec<Uuid>, DbErr> {
            self.inner.list_other_members(chat_id, user_id).await
        }

        async fn find_user(&self, user_id: Uuid) -> Result<Option<user::Model>, DbErr> {
            self.inner.find_user(user_id).await
        }

        async fn touch_last_seen(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), DbErr> {
            let delay = *self.last_seen_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.touch_last_seen(user_id, at).await
        }

        async fn find_direct_chat(&self, a: Uuid, b: Uuid) -> Result<Option<ChatSnapshot>, DbErr> {
            self.inner.find_direct_chat(a, b).await
        }

        async fn create_direct_chat(&self, a: Uuid, b: Uuid) -> Result<ChatSnapshot, DbErr> {
            self.inner.create_direct_chat(a, b).await
        }
    }

    pub struct TestWorld {
        pub state: AppState,
        pub broker: Arc<RecordingBroker>,
        pub store: Arc<TestStore>,
        subscriptions: Mutex<Vec<Subscription>>,
    }

    impl TestWorld {
        pub async fn new() -> Self {
            Self::with_settings(WsSettings::default()).await
        }

        pub async fn with_settings(settings: WsSettings) -> Self {
            let store = Arc::new(TestStore {
                inner: SeaOrmChatStore::new(setup_test_db().await),
                failing_messages: AtomicBool::new(false),
                last_seen_delay: Mutex::new(None),
            });
            let broker = Arc::new(RecordingBroker::default());
            let state = AppState::new(
                store.clone(),
                broker.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(JwtValidator::new("test-secret")),
                settings,
                Duration::from_secs(300),
            );
            Self {
                state,
                broker,
                store,
                subscriptions: Mutex::new(Vec::new()),
            }
        }

        pub fn db(&self) -> &DatabaseConnection {
            self.store.connection()
        }

        pub async fn users<const N: usize>(&self, names: [&str; N]) -> [Uuid; N] {
            let mut ids = Vec::with_capacity(N);
            for name in names {
                ids.push(user::Model::create(self.db(), name, None).await.unwrap().id);
            }
            ids.try_into().unwrap()
        }

        pub async fn group(&self, members: &[Uuid]) -> Uuid {
            chat::Model::create_group(self.db(), "group", members)
                .await
                .unwrap()
                .id
        }

        /// A connection that is not registered and has no pumps.
        pub async fn connection(&self, user_id: Uuid) -> (Arc<Connection>, mpsc::Receiver<String>) {
            let sub = self.broker.subscribe(&[user_topic(user_id)]).await.unwrap();
            let handle = sub.handle();
            self.subscriptions.lock().unwrap().push(sub);
            Connection::new(user_id, self.state.settings().outbound_capacity, [], handle)
        }
    }
}
