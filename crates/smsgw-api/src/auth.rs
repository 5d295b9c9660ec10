//! Authentication module

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use smsgw_common::types::now_epoch;
use smsgw_common::{Error, Result};
use smsgw_core::Context;
use smsgw_storage::{DatabasePool, User, DEFAULT_TOKEN_VALIDITY};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Length of issued tokens
pub const TOKEN_LENGTH: usize = 40;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ctx: Context,
    /// Present when running against PostgreSQL; used by readiness checks
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    pub fn new(ctx: Context, db_pool: Option<DatabasePool>) -> Arc<Self> {
        Arc::new(Self { ctx, db_pool })
    }
}

/// Authenticated caller, stored in request extensions
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Credentials presented with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Basic { username: String, password: String },
}

/// Extract credentials from `Authorization` or `X-Token`
pub fn extract_credentials(headers: &HeaderMap) -> Option<Credentials> {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(Credentials::Token(token.trim().to_string()));
        }
        if let Some(encoded) = auth.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
    }

    headers
        .get("x-token")
        .and_then(|v| v.to_str().ok())
        .map(|t| Credentials::Token(t.trim().to_string()))
}

/// SHA-256 hex digest under which a token is stored
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Argon2 PHC string for a new password
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .ok()
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn invalid() -> Error {
    Error::Auth("Invalid credentials".to_string())
}

async fn active_user(ctx: &Context, username: &str) -> Result<User> {
    let user = ctx.users.get_by_username(username).await?.ok_or_else(invalid)?;
    if user.suspended {
        warn!(username, "Suspended user tried to authenticate");
        return Err(Error::Auth("User is suspended".to_string()));
    }
    Ok(user)
}

/// Check a username and password
pub async fn login(ctx: &Context, username: &str, password: &str) -> Result<User> {
    let user = active_user(ctx, username).await?;
    if !verify_password(password, &user.password) {
        warn!(username, "Password mismatch");
        return Err(invalid());
    }
    Ok(user)
}

/// Issue a token for an authenticated user; only its digest is kept
pub async fn issue_token(ctx: &Context, user: &User) -> Result<String> {
    let token = generate_token();
    ctx.tokens
        .create(&user.username, &hash_token(&token), DEFAULT_TOKEN_VALIDITY, now_epoch())
        .await?;
    debug!(username = %user.username, "Token issued");
    Ok(token)
}

/// Resolve presented credentials to an active user, renewing token use
pub async fn authenticate(ctx: &Context, credentials: &Credentials) -> Result<User> {
    match credentials {
        Credentials::Basic { username, password } => login(ctx, username, password).await,
        Credentials::Token(token) => {
            let digest = hash_token(token);
            let now = now_epoch();
            let stored = ctx.tokens.get(&digest).await?.ok_or_else(invalid)?;
            if stored.is_expired(now) {
                ctx.tokens.delete(&digest).await?;
                return Err(Error::Auth("Token has expired".to_string()));
            }
            let user = active_user(ctx, &stored.username).await?;
            ctx.tokens.touch(&digest, now).await?;
            Ok(user)
        }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let credentials = extract_credentials(request.headers()).ok_or_else(|| {
        warn!("Missing credentials in request to {}", request.uri().path());
        Error::Auth("Authentication required".to_string())
    })?;
    let user = authenticate(&state.ctx, &credentials).await?;
    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_extract_bearer_and_x_token() {
        assert_eq!(
            extract_credentials(&headers(header::AUTHORIZATION, "Bearer abc")),
            Some(Credentials::Token("abc".to_string()))
        );
        assert_eq!(
            extract_credentials(&headers(header::HeaderName::from_static("x-token"), "xyz")),
            Some(Credentials::Token("xyz".to_string()))
        );
        assert_eq!(extract_credentials(&HeaderMap::new()), None);
    }

    #[test]
    fn test_extract_basic() {
        let value = format!("Basic {}", STANDARD.encode("alice:s3cr:et"));
        assert_eq!(
            extract_credentials(&headers(header::AUTHORIZATION, &value)),
            Some(Credentials::Basic {
                username: "alice".to_string(),
                password: "s3cr:et".to_string(),
            })
        );
        assert_eq!(
            extract_credentials(&headers(header::AUTHORIZATION, "Basic !!!")),
            None
        );
    }

    #[test]
    fn test_token_shape_and_digest() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(hash_token(&token).len(), 64);
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn test_password_round() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not a phc string"));
    }
}
