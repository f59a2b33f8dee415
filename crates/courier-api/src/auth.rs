//! Account registration, login and token issuing.
//!
//! Passwords are hashed with Argon2id. Hashing and verification are CPU-bound,
//! so both run on the blocking pool together with the user lookup.

use std::sync::Arc;

use anyhow::Context;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_db::queries::is_constraint_violation;
use courier_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::conversation::ThreadLimits;
use crate::unread::UnreadCache;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub unread_cache: UnreadCache,
    pub thread_limits: ThreadLimits,
}

const USERNAME_CHARS: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_CHARS: usize = 8;
const TOKEN_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username must be 3 to 32 characters and password at least 8")]
    InvalidCredentials,

    #[error("username is already taken")]
    UsernameTaken,

    /// Unknown user or wrong password; deliberately not told apart.
    #[error("invalid username or password")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AuthError::UsernameTaken => StatusCode::CONFLICT,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Internal(e) => {
                error!("Auth request failed: {:#}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

fn validate(req: &RegisterRequest) -> Result<(), AuthError> {
    let name_ok = USERNAME_CHARS.contains(&req.username.chars().count());
    let password_ok = req.password.chars().count() >= MIN_PASSWORD_CHARS;
    if name_ok && password_ok {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// A stored hash that does not parse is a server-side problem, not a wrong password.
fn password_matches(password: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("unreadable password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

async fn run_blocking<F, T>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("auth task panicked")?
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AuthError> {
    validate(&req)?;

    let db = state.clone();
    let username = req.username.clone();
    let user_id = run_blocking(move || {
        if db.db.get_user_by_username(&req.username)?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let password_hash = hash_password(&req.password)?;
        let user_id = Uuid::new_v4();

        // A concurrent registration can still win the race to the unique index.
        db.db
            .create_user(&user_id.to_string(), &req.username, &password_hash)
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    AuthError::UsernameTaken
                } else {
                    AuthError::Internal(e.context(format!("creating user '{}'", req.username)))
                }
            })?;
        Ok(user_id)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &username)?;
    info!("Registered user {} ({})", username, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let db = state.clone();
    let attempted = req.username.clone();
    let user = run_blocking(move || {
        let user = db
            .db
            .get_user_by_username(&req.username)?
            .ok_or(AuthError::Unauthorized)?;
        if !password_matches(&req.password, &user.password)? {
            return Err(AuthError::Unauthorized);
        }
        Ok(user)
    })
    .await
    .inspect_err(|e| {
        if matches!(e, AuthError::Unauthorized) {
            warn!("Failed login for '{}'", attempted);
        }
    })?;

    let user_id: Uuid = user
        .id
        .parse()
        .with_context(|| format!("stored user id '{}' is not a UUID", user.id))?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// Issue an HS256 token carrying the user's id and name.
pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let expires = chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS);
    let claims = Claims {
        sub: user_id,
        username: username.to_owned(),
        exp: expires.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("signing token")
}
