use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::{error, info};

use courier_types::api::{Claims, UserDeletionResponse};

use crate::auth::AppState;

/// DELETE /users/me
///
/// Removes the caller and everything that exists only
/// in reference to them.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserDeletionResponse>, StatusCode> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let summary = tokio::task::spawn_blocking(move || db.db.delete_user(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to delete user {}: {:#}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.unread_cache.invalidate(&claims.sub.to_string());
    info!("User {} ({}) deleted their account", claims.username, claims.sub);

    Ok(Json(UserDeletionResponse {
        messages: summary.messages,
        notifications: summary.notifications,
        history: summary.history,
        detached_replies: summary.detached_replies,
    }))
}
