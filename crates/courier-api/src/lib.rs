pub mod auth;
mod convert;
pub mod conversation;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod unread;
pub mod users;

use axum::{
    Json, Router,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Build the full HTTP surface: public auth routes plus the JWT-protected API.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/messages", post(messages::send_message))
        .route("/messages/{message_id}", patch(messages::edit_message))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/messages/{message_id}/history", get(messages::message_history))
        .route("/conversation/{message_id}", get(conversation::get_conversation))
        .route("/unread_messages", get(unread::unread_messages))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/{notification_id}/read",
            post(notifications::mark_notification_read),
        )
        .route("/users/me", delete(users::delete_me))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
