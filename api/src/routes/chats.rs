use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use services::DirectChatError;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::response::ApiResponse;
use crate::state::AppState;

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/direct", post(open_direct_chat))
}

#[derive(Debug, Deserialize)]
pub struct DirectChatRequest {
    pub user_id: Uuid,
}

/// POST /chats/direct
///
/// Returns the direct chat between the caller and `user_id`, creating it on
/// first contact.
///
/// ### Responses
/// - `200 OK` with the chat and both memberships
/// - `400 Bad Request` when `user_id` is the caller
/// - `404 Not Found` when `user_id` does not exist
async fn open_direct_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DirectChatRequest>,
) -> Response {
    match state.store().find_user(req.user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ApiResponse::<()>::error("User not found").with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up user");
            return ApiResponse::<()>::error("Database error")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    match state.direct_chats().get_or_create(user.id(), req.user_id).await {
        Ok(snapshot) => Json(ApiResponse::success(snapshot, "Direct chat ready")).into_response(),
        Err(DirectChatError::SelfChat) => ApiResponse::<()>::error("Cannot open a chat with yourself")
            .with_status(StatusCode::BAD_REQUEST),
        Err(DirectChatError::Db(e)) => {
            tracing::error!(user_id = %user.id(), peer_id = %req.user_id, error = %e, "Failed to resolve direct chat");
            ApiResponse::<()>::error("Database error").with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
