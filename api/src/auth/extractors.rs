use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use axum_extra::extract::TypedHeader;
use headers::{Authorization, authorization::Bearer};

use crate::auth::claims::{AuthUser, Claims};
use crate::response::ApiResponse;
use crate::state::AppState;

/// Extracts `AuthUser` from a bearer token in the `Authorization` header.
///
/// The token is checked by the validator held in [`AppState`], so HTTP routes
/// and the WebSocket endpoint accept exactly the same tokens.
///
/// # Errors
/// - `401 Unauthorized` if the header is missing, malformed, or the token is invalid or expired.
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(ApiResponse::error("Authentication required")),
                    )
                })?;

        let sub = state.validator().validate(bearer.token()).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Invalid or expired token")),
            )
        })?;

        Ok(AuthUser(Claims { sub, exp: 0 }))
    }
}
