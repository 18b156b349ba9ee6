use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};

// ─── JWT Claims ───

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id, owner of every upload it starts
    pub username: String,
    pub exp: usize,
}

/// Sign a token for `user_id`. Tokens are issued by the account service in
/// production; this is used by tooling and tests.
pub fn create_jwt(
    secret: &str,
    user_id: &str,
    username: &str,
    valid_for: chrono::Duration,
) -> UploadResult<String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(valid_for)
        .ok_or_else(|| UploadError::Validation("token lifetime out of range".into()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(UploadError::internal)
}

pub fn extract_claims(secret: &str, headers: &HeaderMap) -> UploadResult<Claims> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| UploadError::Unauthorized("missing Authorization header".into()))?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| UploadError::Unauthorized("invalid Authorization format".into()))?;

    decode_jwt(secret, token)
}

pub fn decode_jwt(secret: &str, token: &str) -> UploadResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| UploadError::Unauthorized(format!("invalid token: {e}")))?;

    Ok(data.claims)
}
