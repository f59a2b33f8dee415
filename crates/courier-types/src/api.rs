use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims issued at register/login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender: String,
    pub receiver_id: Uuid,
    pub receiver: String,
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub edited: bool,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of a monotonic read-state transition.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadStateResponse {
    pub changed: bool,
}

/// A prior version of a message, recorded when its content was edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub old_content: String,
    pub edited_by: Option<Uuid>,
    pub edited_at: DateTime<Utc>,
}

// -- Threads --

/// One message in a conversation tree, with its direct replies in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationNode {
    pub id: Uuid,
    pub content: String,
    pub sender: String,
    pub receiver: String,
    pub timestamp: DateTime<Utc>,
    pub replies: Vec<ConversationNode>,
}

// -- Unread --

/// Restricted projection served by the unread endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadMessage {
    pub id: Uuid,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

// -- Users --

/// Row counts removed when an account is deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDeletionResponse {
    pub messages: usize,
    pub notifications: usize,
    pub history: usize,
    pub detached_replies: usize,
}
