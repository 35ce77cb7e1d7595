//! Capability check for the privileged endpoints.
//!
//! One path for every privileged call, replacing per-function auth checks:
//! an internal shared secret, the service-role credential, or a user JWT
//! whose subject is a superadmin. Anything else — including any lookup
//! failure along the way — denies.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::profiles;
use crate::error::{AppError, Result};

/// Who was allowed through the capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Function-to-function call carrying the internal shared secret.
    Internal,
    /// Bearer token equal to the service-role key.
    Service,
    /// Superadmin user, identified by JWT subject.
    Superadmin(String),
}

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Authorizes a privileged invocation. Order matters only for attribution;
/// all three capabilities grant the same access.
pub async fn authorize_privileged(
    cfg: &Config,
    pool: &SqlitePool,
    headers: &HeaderMap,
) -> Result<Caller> {
    if let Some(secret) = header_str(headers, "x-internal-secret") {
        if secret == cfg.internal_secret {
            return Ok(Caller::Internal);
        }
        return Err(AppError::Unauthorized);
    }

    let Some(token) = bearer_token(headers) else {
        return Err(AppError::Unauthorized);
    };

    if token == cfg.service_role_key {
        return Ok(Caller::Service);
    }

    // Last resort: a user JWT whose profile carries the superadmin role.
    let claims = decode_user_token(cfg, token)?;
    match profiles::get_profile(pool, &claims.sub).await {
        Ok(Some(profile)) if profile.global_role == "superadmin" => {
            Ok(Caller::Superadmin(profile.id))
        }
        // Unknown user, lesser role, or DB failure: deny, never fail open.
        _ => Err(AppError::Unauthorized),
    }
}

/// Authenticates an ordinary user request and returns the subject id.
pub fn authenticate_user(cfg: &Config, headers: &HeaderMap) -> Result<String> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    Ok(decode_user_token(cfg, token)?.sub)
}

fn decode_user_token(cfg: &Config, token: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization")?.strip_prefix("Bearer ")
}
