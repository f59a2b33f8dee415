/// Database row types. These map directly to SQLite rows.
/// Distinct from courier-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

/// A message joined with the usernames of both participants.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub receiver_id: String,
    pub receiver_username: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub edited: bool,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: String,
    pub message_id: String,
    pub old_content: String,
    pub edited_by: Option<String>,
    pub edited_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Outcome of a content update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    NotFound,
    /// New content equals the stored content; nothing was written.
    Unchanged,
    /// Prior content was appended to the history and the message flagged as edited.
    Edited,
}

/// Rows affected by deleting a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    pub messages: usize,
    pub notifications: usize,
    pub history: usize,
    /// Replies between other users whose parent was removed; they become roots.
    pub detached_replies: usize,
}
