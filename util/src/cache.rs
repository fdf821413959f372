//! Fast key/value store used as a read-through cache in front of persistence.
//!
//! [`FastStore`] mirrors the small subset of a Redis-like client the services
//! need. [`MemoryStore`] is the in-process implementation with lazy TTL expiry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait FastStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key` for `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration);

    async fn del(&self, key: &str);
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FastStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((value, exp)) if *exp > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value` and sweeps out every entry that has already expired.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, exp)| *exp > now);
        entries.insert(key.to_string(), (value, now + ttl));
    }

    async fn del(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_ex("chat:dm:a:b", "{}".into(), Duration::from_secs(300))
            .await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(store.get("chat:dm:a:b").await.as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("chat:dm:a:b").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_keys_that_are_never_read() {
        let store = MemoryStore::new();
        store.set_ex("chat:dm:a:b", "{}".into(), Duration::from_secs(1)).await;
        store.set_ex("chat:dm:a:c", "{}".into(), Duration::from_secs(1)).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        store.set_ex("chat:dm:b:c", "{}".into(), Duration::from_secs(60)).await;

        let entries = store.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("chat:dm:b:c"));
    }

    #[tokio::test]
    async fn del_removes_entry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(store.len(), 1);
        store.del("k").await;
        assert_eq!(store.get("k").await, None);
    }
}
