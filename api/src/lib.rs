pub mod auth;
pub mod response;
pub mod routes;
pub mod state;
pub mod ws;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Builds the full application: HTTP routes under `/api`, the live endpoint at `/ws`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::very_permissive().expose_headers([CONTENT_TYPE]);

    Router::new()
        .nest("/api", routes::routes())
        .nest("/ws", ws::ws_routes())
        .layer(cors)
        .with_state(state)
}
