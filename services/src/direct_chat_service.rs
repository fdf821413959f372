use std::sync::Arc;
use std::time::Duration;

use db::{ChatSnapshot, ChatStore, dm_pair_key};
use sea_orm::DbErr;
use util::cache::FastStore;
use uuid::Uuid;

const CACHE_PREFIX: &str = "chat:dm:";

#[derive(Debug, thiserror::Error)]
pub enum DirectChatError {
    #[error("cannot open a direct chat with yourself")]
    SelfChat,
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Resolves the direct chat between two users, creating it on first use.
///
/// Snapshots are cached under the canonical pair key so both orderings of a
/// pair share one entry.
pub struct DirectChatService {
    store: Arc<dyn ChatStore>,
    cache: Arc<dyn FastStore>,
    ttl: Duration,
}

impl DirectChatService {
    pub fn new(store: Arc<dyn ChatStore>, cache: Arc<dyn FastStore>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    pub fn cache_key(a: Uuid, b: Uuid) -> String {
        format!("{CACHE_PREFIX}{}", dm_pair_key(a, b))
    }

    pub async fn get_or_create(&self, a: Uuid, b: Uuid) -> Result<ChatSnapshot, DirectChatError> {
        if a == b {
            return Err(DirectChatError::SelfChat);
        }

        let key = Self::cache_key(a, b);
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<ChatSnapshot>(&raw) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    log::warn!("Discarding unreadable cache entry {}: {}", key, e);
                    self.cache.del(&key).await;
                }
            }
        }

        let snapshot = match self.store.find_direct_chat(a, b).await? {
            Some(existing) => existing,
            None => self.store.create_direct_chat(a, b).await?,
        };

        match serde_json::to_string(&snapshot) {
            Ok(raw) => self.cache.set_ex(&key, raw, self.ttl).await,
            Err(e) => log::warn!("Failed to cache direct chat {}: {}", snapshot.chat.id, e),
        }

        Ok(snapshot)
    }

    /// Drops the cached snapshot for the pair.
    ///
    /// Nothing in this workspace edits direct-chat membership. Whatever does
    /// (an admin tool, a future member route) must call this afterwards.
    pub async fn invalidate(&self, a: Uuid, b: Uuid) {
        self.cache.del(&Self::cache_key(a, b)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::SeaOrmChatStore;
    use db::models::{chat, user};
    use db::test_utils::setup_test_db;
    use sea_orm::{EntityTrait, PaginatorTrait};
    use tokio::task::JoinSet;
    use util::cache::MemoryStore;

    struct Fixture {
        store: Arc<SeaOrmChatStore>,
        cache: Arc<MemoryStore>,
        service: Arc<DirectChatService>,
        a: Uuid,
        b: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = setup_test_db().await;
        let a = user::Model::create(&db, "alice", Some("Alice")).await.unwrap().id;
        let b = user::Model::create(&db, "bob", None).await.unwrap().id;
        let store = Arc::new(SeaOrmChatStore::new(db));
        let cache = Arc::new(MemoryStore::new());
        let service = Arc::new(DirectChatService::new(
            store.clone(),
            cache.clone(),
            Duration::from_secs(300),
        ));
        Fixture { store, cache, service, a, b }
    }

    async fn chat_count(store: &SeaOrmChatStore) -> u64 {
        chat::Entity::find().count(store.connection()).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_chat_with_self() {
        let f = fixture().await;
        let err = f.service.get_or_create(f.a, f.a).await.unwrap_err();
        assert!(matches!(err, DirectChatError::SelfChat));
        assert_eq!(chat_count(&f.store).await, 0);
    }

    #[tokio::test]
    async fn resolution_is_symmetric() {
        let f = fixture().await;
        let ab = f.service.get_or_create(f.a, f.b).await.unwrap();
        let ba = f.service.get_or_create(f.b, f.a).await.unwrap();

        assert_eq!(ab.chat.id, ba.chat.id);
        assert_eq!(ab.members.len(), 2);
        assert_eq!(chat_count(&f.store).await, 1);
        assert_eq!(
            DirectChatService::cache_key(f.a, f.b),
            DirectChatService::cache_key(f.b, f.a)
        );
    }

    #[tokio::test]
    async fn cached_snapshot_is_served_without_store() {
        let f = fixture().await;
        let mut snapshot = f.service.get_or_create(f.a, f.b).await.unwrap();
        snapshot.chat.name = Some("from-cache".into());
        f.cache
            .set_ex(
                &DirectChatService::cache_key(f.a, f.b),
                serde_json::to_string(&snapshot).unwrap(),
                Duration::from_secs(300),
            )
            .await;

        let hit = f.service.get_or_create(f.b, f.a).await.unwrap();
        assert_eq!(hit.chat.name.as_deref(), Some("from-cache"));

        f.service.invalidate(f.a, f.b).await;
        let miss = f.service.get_or_create(f.a, f.b).await.unwrap();
        assert_eq!(miss.chat.name, None);
        assert_eq!(miss.chat.id, snapshot.chat.id);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_falls_back_to_store() {
        let f = fixture().await;
        f.cache
            .set_ex(
                &DirectChatService::cache_key(f.a, f.b),
                "not json".into(),
                Duration::from_secs(300),
            )
            .await;

        let snapshot = f.service.get_or_create(f.a, f.b).await.unwrap();
        assert_eq!(snapshot.members.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_create_a_single_chat() {
        let f = fixture().await;
        let mut set = JoinSet::new();
        for i in 0..100 {
            let service = f.service.clone();
            let (x, y) = if i % 2 == 0 { (f.a, f.b) } else { (f.b, f.a) };
            set.spawn(async move { service.get_or_create(x, y).await });
        }

        let mut ids = Vec::new();
        while let Some(res) = set.join_next().await {
            ids.push(res.unwrap().unwrap().chat.id);
        }

        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(chat_count(&f.store).await, 1);
    }
}
