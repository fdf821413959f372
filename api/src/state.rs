use db::ChatStore;
use services::DirectChatService;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use util::broker::TopicBroker;
use util::cache::FastStore;
use util::config::AppConfig;

use crate::auth::TokenValidator;
use crate::ws::emit;
use crate::ws::hub::Hub;
use crate::ws::types::WsOut;
use crate::ws::typing::TypingTracker;

/// Tunables for live sessions, resolved once at startup.
#[derive(Debug, Clone)]
pub struct WsSettings {
    pub outbound_capacity: usize,
    pub read_timeout: Duration,
    pub heartbeat: Duration,
    pub write_timeout: Duration,
    pub typing_debounce: Duration,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            read_timeout: Duration::from_secs(60),
            heartbeat: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            typing_debounce: Duration::from_millis(3000),
        }
    }
}

impl WsSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            outbound_capacity: cfg.ws_outbound_capacity.max(1),
            read_timeout: Duration::from_secs(cfg.ws_read_timeout_secs),
            heartbeat: Duration::from_secs(cfg.ws_heartbeat_secs),
            write_timeout: Duration::from_secs(cfg.ws_write_timeout_secs),
            typing_debounce: Duration::from_millis(cfg.typing_debounce_ms),
        }
    }
}

/// Everything a request or live session needs, shared by cheap clones.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ChatStore>,
    broker: Arc<dyn TopicBroker>,
    hub: Arc<Hub>,
    typing: Arc<TypingTracker>,
    direct_chats: Arc<DirectChatService>,
    validator: Arc<dyn TokenValidator>,
    settings: WsSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        broker: Arc<dyn TopicBroker>,
        cache: Arc<dyn FastStore>,
        validator: Arc<dyn TokenValidator>,
        settings: WsSettings,
        dm_cache_ttl: Duration,
    ) -> Self {
        let typing = Arc::new(TypingTracker::new(broker.clone(), settings.typing_debounce));
        let direct_chats = Arc::new(DirectChatService::new(store.clone(), cache, dm_cache_ttl));

        Self {
            store,
            broker,
            hub: Arc::new(Hub::new()),
            typing,
            direct_chats,
            validator,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn TopicBroker> {
        &self.broker
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn typing(&self) -> &Arc<TypingTracker> {
        &self.typing
    }

    pub fn direct_chats(&self) -> &DirectChatService {
        &self.direct_chats
    }

    pub fn validator(&self) -> &dyn TokenValidator {
        self.validator.as_ref()
    }

    pub fn settings(&self) -> &WsSettings {
        &self.settings
    }

    /// Publishes `event` to every session subscribed to the chat.
    pub async fn broadcast_to_chat(&self, chat_id: Uuid, event: &WsOut) -> bool {
        emit::broadcast_to_chat(self.broker.as_ref(), chat_id, event).await
    }
}
