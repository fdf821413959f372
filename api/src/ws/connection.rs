//! One authenticated live session.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use util::broker::SubscriptionHandle;
use uuid::Uuid;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    id: u64,
    user_id: Uuid,
    outbound: mpsc::Sender<String>,
    /// Chats the user belonged to when the session opened.
    initial_chats: HashSet<Uuid>,
    joined_rooms: Mutex<HashSet<Uuid>>,
    dropped: AtomicU64,
    subscription: SubscriptionHandle,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl Connection {
    /// Returns the connection and the receiving end of its outbound queue,
    /// which belongs to the writer pump.
    pub fn new(
        user_id: Uuid,
        capacity: usize,
        initial_chats: impl IntoIterator<Item = Uuid>,
        subscription: SubscriptionHandle,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            outbound: tx,
            initial_chats: initial_chats.into_iter().collect(),
            joined_rooms: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
            subscription,
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        });
        (conn, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queues a serialized event without waiting.
    ///
    /// When the queue is full the event is dropped and counted; the session
    /// stays up. Returns whether the event was queued.
    pub fn enqueue(&self, payload: String) -> bool {
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    user_id = %self.user_id,
                    conn_id = self.id,
                    dropped,
                    "Outbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Events lost to a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn was_member_at_connect(&self, chat_id: Uuid) -> bool {
        self.initial_chats.contains(&chat_id)
    }

    pub fn join_room(&self, chat_id: Uuid) -> bool {
        self.rooms().insert(chat_id)
    }

    pub fn leave_room(&self, chat_id: Uuid) -> bool {
        self.rooms().remove(&chat_id)
    }

    pub fn in_room(&self, chat_id: Uuid) -> bool {
        self.rooms().contains(&chat_id)
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.joined_rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.subscription
    }

    /// Stops all three pumps. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.subscription.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True for exactly one caller; later callers must skip teardown.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
