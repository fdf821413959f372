//! Lifecycle of one live session: subscribe, register, pump, tear down.
//!
//! Three tasks run per session. The reader feeds decoded frames to the router,
//! the writer drains the outbound queue onto the socket, and the forwarder moves
//! broker payloads into the queue. Any of them can end the session by closing
//! the connection; teardown then runs exactly once.

use axum::extract::ws::Message;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use util::broker::Subscription;
use uuid::Uuid;

use super::connection::Connection;
use super::presence;
use super::router;
use super::topics::{chat_topic, user_topic};
use super::types::{WsIn, WsOut};
use crate::state::{AppState, WsSettings};

pub async fn serve<S, R, E>(sink: S, stream: R, state: AppState, user_id: Uuid)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let chat_ids = match state.store().list_memberships(user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load memberships");
            return;
        }
    };

    let mut topics: Vec<String> = chat_ids.iter().copied().map(chat_topic).collect();
    topics.push(user_topic(user_id));
    let subscription = match state.broker().subscribe(&topics).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Broker subscription failed");
            return;
        }
    };

    let settings = state.settings().clone();
    let (conn, outbound) = Connection::new(
        user_id,
        settings.outbound_capacity,
        chat_ids.iter().copied(),
        subscription.handle(),
    );
    state.hub().register(Arc::clone(&conn));
    tracing::info!(user_id = %user_id, conn_id = conn.id(), chats = chat_ids.len(), "Session opened");

    let writer = tokio::spawn(write_pump(sink, outbound, Arc::clone(&conn), settings.clone()));
    let forwarder = tokio::spawn(forward(subscription, Arc::clone(&conn)));

    if let Some(snapshot) = (WsOut::UserChats { chat_ids }).to_json() {
        conn.enqueue(snapshot);
    }
    match presence::contacts_of(state.store().as_ref(), user_id).await {
        Ok(contacts) => {
            presence::send_snapshot(state.hub(), &conn, &contacts);
            presence::publish_status(state.broker().as_ref(), &contacts, user_id, true, None).await;
        }
        Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Failed to load contacts"),
    }

    let reader = tokio::spawn(read_pump(stream, Arc::clone(&conn), state.clone()));

    conn.cancel_token().cancelled().await;
    teardown(&state, &conn).await;
    let _ = tokio::join!(reader, writer, forwarder);
    tracing::info!(user_id = %user_id, conn_id = conn.id(), dropped = conn.dropped(), "Session closed");
}

/// Releases everything the session holds. Safe to call more than once.
///
/// Offline presence, typing clears and the last-seen stamp only happen when this
/// session still owned the registry entry; an evicted session leaves them to
/// its replacement. The same holds for a reconnect that registers while the
/// store calls below are in flight.
pub async fn teardown(state: &AppState, conn: &Connection) {
    conn.close();
    if !conn.begin_teardown() {
        return;
    }
    let user_id = conn.user_id();
    if !state.hub().unregister(user_id, conn.id()) {
        tracing::debug!(user_id = %user_id, conn_id = conn.id(), "Session was already replaced");
        return;
    }

    let now = Utc::now();
    if let Err(e) = state.store().touch_last_seen(user_id, now).await {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to stamp last seen");
    }
    let contacts = presence::contacts_of(state.store().as_ref(), user_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to load contacts for presence");
            BTreeSet::new()
        });

    if state.hub().is_online(user_id) {
        tracing::debug!(user_id = %user_id, "Reconnected during teardown");
        return;
    }
    state.typing().clear_user(user_id).await;

    let broker = state.broker().as_ref();
    presence::publish_status(broker, &contacts, user_id, false, Some(now)).await;
    if state.hub().is_online(user_id) {
        presence::publish_status(broker, &contacts, user_id, true, None).await;
    }
}

pub async fn read_pump<R, E>(mut stream: R, conn: Arc<Connection>, state: AppState)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancel = conn.cancel_token();
    let read_timeout = state.settings().read_timeout;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(read_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::info!(user_id = %conn.user_id(), "Read timed out");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(user_id = %conn.user_id(), error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                let received_at = Utc::now();
                match serde_json::from_str::<WsIn>(text.as_str()) {
                    Ok(frame) => router::dispatch(&state, &conn, frame, received_at).await,
                    Err(e) => {
                        tracing::warn!(user_id = %conn.user_id(), error = %e, "Dropping malformed frame")
                    }
                }
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    conn.close();
}

pub async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    conn: Arc<Connection>,
    settings: WsSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let cancel = conn.cancel_token();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(text) => Message::Text(text.into()),
                None => break,
            },
            _ = sleep(settings.heartbeat) => Message::Ping(Default::default()),
        };

        match timeout(settings.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(user_id = %conn.user_id(), error = %e, "Write failed");
                conn.close();
                return;
            }
            Err(_) => {
                tracing::warn!(user_id = %conn.user_id(), "Write timed out");
                conn.close();
                return;
            }
        }
    }

    let _ = timeout(settings.write_timeout, sink.send(Message::Close(None))).await;
}

/// Moves broker payloads into the outbound queue verbatim.
pub async fn forward(mut subscription: Subscription, conn: Arc<Connection>) {
    let cancel = conn.cancel_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            payload = subscription.recv() => match payload {
                Some(payload) => {
                    conn.enqueue(payload);
                }
                None => break,
            },
        }
    }
}
