//! Typing indicators with a quiet-period expiry.
//!
//! Every `(chat, user)` entry owns the timer that will clear it. A refresh
//! replaces the timer; an explicit clear cancels it.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use util::broker::TopicBroker;
use uuid::Uuid;

use super::emit::broadcast_to_chat;
use super::types::WsOut;

type Key = (Uuid, Uuid);

struct TypingEntry {
    at: Instant,
    timer: AbortHandle,
}

pub struct TypingTracker {
    entries: RwLock<HashMap<Key, TypingEntry>>,
    broker: Arc<dyn TopicBroker>,
    debounce: Duration,
}

impl TypingTracker {
    pub fn new(broker: Arc<dyn TopicBroker>, debounce: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            broker,
            debounce,
        }
    }

    /// Records a typing ping and announces `is_typing: true`.
    ///
    /// `is_typing: false` follows once `debounce` passes without another ping.
    pub async fn touch(self: &Arc<Self>, chat_id: Uuid, user_id: Uuid) {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let at = Instant::now();
            let tracker = Arc::clone(self);
            let deadline = at + self.debounce;
            let timer = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                tracker.expire(chat_id, user_id, at).await;
            });
            let prev = entries.insert(
                (chat_id, user_id),
                TypingEntry {
                    at,
                    timer: timer.abort_handle(),
                },
            );
            if let Some(prev) = prev {
                prev.timer.abort();
            }
        }

        self.announce(chat_id, user_id, true).await;
    }

    async fn expire(&self, chat_id: Uuid, user_id: Uuid, at: Instant) {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&(chat_id, user_id)) {
                Some(entry) if entry.at == at => entries.remove(&(chat_id, user_id)).is_some(),
                _ => false,
            }
        };
        if removed {
            self.announce(chat_id, user_id, false).await;
        }
    }

    /// Drops the entry and its pending timer without announcing anything.
    pub fn clear(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        let entry = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(chat_id, user_id));
        match entry {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Clears every indicator of `user_id` and announces `is_typing: false`
    /// for each. Returns the affected chats.
    pub async fn clear_user(&self, user_id: Uuid) -> Vec<Uuid> {
        let chats: Vec<Uuid> = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<Key> = entries
                .keys()
                .filter(|(_, uid)| *uid == user_id)
                .copied()
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    entries.remove(&key).map(|entry| {
                        entry.timer.abort();
                        key.0
                    })
                })
                .collect()
        };

        for chat_id in &chats {
            self.announce(*chat_id, user_id, false).await;
        }
        chats
    }

    pub fn is_typing(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(chat_id, user_id))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn announce(&self, chat_id: Uuid, user_id: Uuid, is_typing: bool) {
        let event = WsOut::Typing {
            chat_id,
            user_id,
            is_typing,
            timestamp: Utc::now().timestamp(),
        };
        broadcast_to_chat(self.broker.as_ref(), chat_id, &event).await;
    }
}
