//! Registry of live sessions, at most one per user.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::connection::Connection;

#[derive(Default)]
pub struct Hub {
    sessions: DashMap<Uuid, Arc<Connection>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `conn` as the user's session. A previous session for the same
    /// user is closed and returned.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let user_id = conn.user_id();
        let evicted = self.sessions.insert(user_id, conn);
        if let Some(old) = &evicted {
            tracing::info!(user_id = %user_id, conn_id = old.id(), "Replacing existing session");
            old.close();
        }
        evicted
    }

    /// Removes the entry only while it still belongs to `conn_id`.
    pub fn unregister(&self, user_id: Uuid, conn_id: u64) -> bool {
        self.sessions
            .remove_if(&user_id, |_, conn| conn.id() == conn_id)
            .is_some()
    }

    pub fn get(&self, user_id: Uuid) -> Option<Arc<Connection>> {
        self.sessions.get(&user_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use util::broker::{LocalBroker, TopicBroker};

    async fn conn(user_id: Uuid) -> (Arc<Connection>, tokio::sync::mpsc::Receiver<String>) {
        let sub = LocalBroker::default().subscribe(&[]).await.unwrap();
        Connection::new(user_id, 8, [], sub.handle())
    }

    #[tokio::test]
    async fn second_session_evicts_and_closes_the_first() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let (first, _r1) = conn(user).await;
        let (second, _r2) = conn(user).await;

        assert!(hub.register(first.clone()).is_none());
        let evicted = hub.register(second.clone()).unwrap();

        assert_eq!(evicted.id(), first.id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.get(user).unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn stale_unregister_leaves_newer_session_alone() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let (first, _r1) = conn(user).await;
        let (second, _r2) = conn(user).await;
        hub.register(first.clone());
        hub.register(second.clone());

        assert!(!hub.unregister(user, first.id()));
        assert!(hub.is_online(user));
        assert!(hub.unregister(user, second.id()));
        assert!(!hub.unregister(user, second.id()));
        assert!(hub.is_empty());
    }
}
