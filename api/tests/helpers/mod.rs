#![allow(dead_code)]

use api::auth::{JwtValidator, generate_jwt};
use api::state::{AppState, WsSettings};
use db::SeaOrmChatStore;
use db::models::{chat, user};
use db::test_utils::setup_test_db;
use futures_util::StreamExt;
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use util::broker::LocalBroker;
use util::cache::MemoryStore;
use uuid::Uuid;

pub const SECRET: &str = "integration-secret";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<SeaOrmChatStore>,
}

impl TestApp {
    pub fn db(&self) -> &DatabaseConnection {
        self.store.connection()
    }

    pub async fn user(&self, name: &str) -> Uuid {
        user::Model::create(self.db(), name, Some(name)).await.unwrap().id
    }

    pub async fn group(&self, members: &[Uuid]) -> Uuid {
        chat::Model::create_group(self.db(), "group", members)
            .await
            .unwrap()
            .id
    }
}

pub async fn make_state() -> (AppState, Arc<SeaOrmChatStore>) {
    let store = Arc::new(SeaOrmChatStore::new(setup_test_db().await));
    let state = AppState::new(
        store.clone(),
        Arc::new(LocalBroker::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(JwtValidator::new(SECRET)),
        WsSettings::default(),
        Duration::from_secs(300),
    );
    (state, store)
}

/// Spawns the app on a random local port.
pub async fn spawn_app() -> TestApp {
    let (state, store) = make_state().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::app(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp { addr, state, store }
}

pub fn token_for(user_id: Uuid) -> String {
    generate_jwt(SECRET, user_id, 60).unwrap().0
}

/// Connects to `/ws?token=...`.
pub async fn connect_ws(addr: SocketAddr, token: &str) -> WsClient {
    let req = format!("ws://{addr}/ws?token={token}")
        .into_client_request()
        .unwrap();
    connect_async(req).await.unwrap().0
}

/// Next text frame as JSON; `None` once the server closes or goes quiet.
pub async fn next_json(ws: &mut WsClient, wait: Duration) -> Option<serde_json::Value> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await.ok()?? {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Skips frames until one of type `kind` arrives.
pub async fn next_of(ws: &mut WsClient, kind: &str) -> serde_json::Value {
    loop {
        let event = next_json(ws, Duration::from_secs(2))
            .await
            .unwrap_or_else(|| panic!("no `{kind}` frame arrived"));
        if event["type"] == kind {
            return event;
        }
    }
}
