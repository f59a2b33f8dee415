use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::error;
use uuid::Uuid;

use courier_types::api::{Claims, NotificationResponse, ReadStateResponse};

use crate::auth::AppState;
use crate::convert;

/// GET /notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<NotificationResponse>>, StatusCode> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.notifications_for(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to list notifications: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(rows.into_iter().map(convert::notification_response).collect()))
}

/// POST /notifications/{notification_id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReadStateResponse>, StatusCode> {
    let db = state.clone();
    let nid = notification_id.to_string();
    let uid = claims.sub.to_string();

    let changed = tokio::task::spawn_blocking(move || db.db.mark_notification_read(&nid, &uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to mark notification {} read: {:#}", notification_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ReadStateResponse { changed }))
}
