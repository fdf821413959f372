pub mod claims;
pub mod extractors;

pub use claims::{AuthUser, Claims};

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Turns an opaque session token into the id of the user it belongs to.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str) -> Result<Uuid, AuthError>;
}

/// HS256 validator for tokens issued by [`generate_jwt`].
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims.sub)
    }
}

/// Generates a JWT and its expiry timestamp for a given user.
///
/// Returns the token and the RFC 3339 expiry.
pub fn generate_jwt(
    secret: &str,
    user_id: Uuid,
    duration_minutes: i64,
) -> Result<(String, String), AuthError> {
    let expiry = Utc::now() + Duration::minutes(duration_minutes);
    let claims = Claims {
        sub: user_id,
        exp: expiry.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, expiry.to_rfc3339()))
}

fn strip_bearer(raw: &str) -> Option<String> {
    let token = raw.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Finds the session token in the `token` query parameter, falling back to the
/// `Authorization` header. Either may carry a `Bearer ` prefix.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    query_token.and_then(strip_bearer).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(strip_bearer)
    })
}
