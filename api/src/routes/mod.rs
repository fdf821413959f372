//! HTTP route entry point for `/api/...`.
//!
//! - `/health` → liveness probe (public)
//! - `/chats` → chat resolution (bearer token)

use crate::routes::{chats::chat_routes, health::health_routes};
use crate::state::AppState;
use axum::Router;

pub mod chats;
pub mod health;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/health", health_routes())
        .nest("/chats", chat_routes())
}
