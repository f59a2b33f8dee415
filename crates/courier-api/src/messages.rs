use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use courier_db::models::{EditOutcome, MessageRow};
use courier_db::queries::is_constraint_violation;
use courier_types::api::{
    Claims, EditMessageRequest, HistoryEntry, MessageResponse, ReadStateResponse,
    SendMessageRequest,
};

use crate::auth::AppState;
use crate::convert;

const MAX_CONTENT_LEN: usize = 10_000;

fn validate_content(content: &str) -> Result<(), StatusCode> {
    if content.trim().is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

/// Runs a blocking store call on the blocking pool, mapping store errors to 500.
async fn blocking<F, T>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Message store error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Load a message, hiding it unless `allowed` accepts it for the caller.
async fn load_visible(
    state: &AppState,
    message_id: Uuid,
    allowed: impl Fn(&MessageRow) -> bool,
) -> Result<MessageRow, StatusCode> {
    let db = state.clone();
    let mid = message_id.to_string();
    blocking(move || db.db.get_message(&mid))
        .await?
        .filter(|row| allowed(row))
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    validate_content(&req.content)?;

    let message_id = Uuid::new_v4();
    let db = state.clone();
    let mid = message_id.to_string();
    let sid = claims.sub.to_string();
    let rid = req.receiver_id.to_string();
    let parent = req.parent_id.map(|p| p.to_string());

    let row = tokio::task::spawn_blocking(move || {
        db.db.create_message(&mid, &sid, &rid, &req.content, parent.as_deref())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        if is_constraint_violation(&e) {
            // Unknown receiver or parent
            warn!("Rejected message {}: {}", message_id, e);
            StatusCode::BAD_REQUEST
        } else {
            error!("Failed to store message {}: {:#}", message_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    Ok((StatusCode::CREATED, Json(convert::message_response(row))))
}

/// PATCH /messages/{message_id}
///
/// Only the sender may edit.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessageResponse>, StatusCode> {
    validate_content(&req.content)?;

    let caller = claims.sub.to_string();
    load_visible(&state, message_id, |row| row.sender_id == caller).await?;

    let db = state.clone();
    let mid = message_id.to_string();
    let row = blocking(move || {
        match db.db.update_content(&mid, &caller, &req.content)? {
            EditOutcome::NotFound => Ok(None),
            EditOutcome::Unchanged | EditOutcome::Edited => db.db.get_message(&mid),
        }
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(convert::message_response(row)))
}

/// POST /messages/{message_id}/read
///
/// Only the receiver may mark a message read.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReadStateResponse>, StatusCode> {
    let caller = claims.sub.to_string();
    load_visible(&state, message_id, |row| row.receiver_id == caller).await?;

    let db = state.clone();
    let mid = message_id.to_string();
    let changed = blocking(move || db.db.mark_read(&mid)).await?;

    Ok(Json(ReadStateResponse { changed }))
}

/// GET /messages/{message_id}/history
pub async fn message_history(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<HistoryEntry>>, StatusCode> {
    let caller = claims.sub.to_string();
    load_visible(&state, message_id, |row| {
        row.sender_id == caller || row.receiver_id == caller
    })
    .await?;

    let db = state.clone();
    let mid = message_id.to_string();
    let rows = blocking(move || db.db.history_for(&mid)).await?;

    Ok(Json(rows.into_iter().map(convert::history_entry).collect()))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::test_support::{call, seed_user, send, test_state};

    #[tokio::test]
    async fn send_creates_message_and_notification() {
        let state = test_state();
        let (alice, alice_token) = seed_user(&state, "alice");
        let (bob, _) = seed_user(&state, "bob");
        let app = crate::router(state.clone());

        let (status, body) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice_token),
            Some(json!({ "receiver_id": bob, "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["sender"], "alice");
        assert_eq!(body["receiver"], "bob");
        assert_eq!(body["edited"], false);
        assert_eq!(body["read"], false);

        assert_eq!(state.db.notifications_for(&bob.to_string()).unwrap().len(), 1);
        assert!(state.db.notifications_for(&alice.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_rejects_unknown_parent_and_empty_content() {
        let state = test_state();
        let (_, alice_token) = seed_user(&state, "alice");
        let (bob, _) = seed_user(&state, "bob");
        let app = crate::router(state);

        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice_token),
            Some(json!({ "receiver_id": bob, "content": "hi", "parent_id": Uuid::new_v4() })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice_token),
            Some(json!({ "receiver_id": Uuid::new_v4(), "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice_token),
            Some(json!({ "receiver_id": bob, "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn edit_is_sender_only_and_logs_history() {
        let state = test_state();
        let (alice, alice_token) = seed_user(&state, "alice");
        let (bob, bob_token) = seed_user(&state, "bob");
        let id = send(&state, alice, bob, "Original", None);
        let app = crate::router(state);
        let uri = format!("/messages/{id}");

        let (status, _) = call(
            &app,
            Method::PATCH,
            &uri,
            Some(&bob_token),
            Some(json!({ "content": "hijacked" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &uri,
            Some(&alice_token),
            Some(json!({ "content": "Original" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], false);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &uri,
            Some(&alice_token),
            Some(json!({ "content": "Revised" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], true);
        assert_eq!(body["content"], "Revised");

        let history_uri = format!("/messages/{id}/history");
        let (status, history) = call(&app, Method::GET, &history_uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["old_content"], "Original");
        assert_eq!(history[0]["edited_by"], alice.to_string());
    }

    #[tokio::test]
    async fn mark_read_is_receiver_only_and_monotonic() {
        let state = test_state();
        let (alice, alice_token) = seed_user(&state, "alice");
        let (bob, bob_token) = seed_user(&state, "bob");
        let id = send(&state, alice, bob, "hi", None);
        let app = crate::router(state.clone());
        let uri = format!("/messages/{id}/read");

        let (status, _) = call(&app, Method::POST, &uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::POST, &uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);

        let (_, body) = call(&app, Method::POST, &uri, Some(&bob_token), None).await;
        assert_eq!(body["changed"], false);
        assert!(state.db.get_message(&id.to_string()).unwrap().unwrap().read);
    }
}
