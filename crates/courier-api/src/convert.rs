//! Row → API model conversion.
//!
//! Rows come from our own schema, so a malformed id or timestamp means a
//! corrupt row: it is logged and replaced with a default instead of failing
//! the whole response.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use courier_db::models::{HistoryRow, MessageRow, NotificationRow};
use courier_types::api::{
    HistoryEntry, MessageResponse, NotificationResponse, UnreadMessage,
};

pub(crate) fn parse_uuid(raw: &str, field: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on row '{}': {}", field, raw, owner, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

pub(crate) fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "id", &row.id),
        sender_id: parse_uuid(&row.sender_id, "sender_id", &row.id),
        receiver_id: parse_uuid(&row.receiver_id, "receiver_id", &row.id),
        parent_id: row
            .parent_id
            .as_deref()
            .map(|p| parse_uuid(p, "parent_id", &row.id)),
        timestamp: parse_timestamp(&row.created_at, &row.id),
        sender: row.sender_username,
        receiver: row.receiver_username,
        content: row.content,
        edited: row.edited,
        read: row.read,
    }
}

pub(crate) fn unread_message(row: MessageRow) -> UnreadMessage {
    UnreadMessage {
        id: parse_uuid(&row.id, "id", &row.id),
        timestamp: parse_timestamp(&row.created_at, &row.id),
        sender: row.sender_username,
        content: row.content,
    }
}

pub(crate) fn history_entry(row: HistoryRow) -> HistoryEntry {
    HistoryEntry {
        id: parse_uuid(&row.id, "id", &row.id),
        edited_by: row
            .edited_by
            .as_deref()
            .map(|u| parse_uuid(u, "edited_by", &row.id)),
        edited_at: parse_timestamp(&row.edited_at, &row.id),
        old_content: row.old_content,
    }
}

pub(crate) fn notification_response(row: NotificationRow) -> NotificationResponse {
    NotificationResponse {
        id: parse_uuid(&row.id, "id", &row.id),
        message_id: parse_uuid(&row.message_id, "message_id", &row.id),
        timestamp: parse_timestamp(&row.created_at, &row.id),
        is_read: row.is_read,
    }
}
