use crate::models::{
    DeletionSummary, EditOutcome, HistoryRow, MessageRow, NotificationRow, UserRow,
};
use crate::{Database, now_timestamp};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

/// Column list shared by every query returning a [`MessageRow`].
pub(crate) const MESSAGE_SELECT: &str = "
    SELECT m.id, m.sender_id, s.username, m.receiver_id, r.username,
           m.content, m.parent_id, m.edited, m.is_read, m.created_at
    FROM messages m
    JOIN users s ON s.id = m.sender_id
    JOIN users r ON r.id = m.receiver_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, now_timestamp()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Delete a user together with everything that exists only in reference to them.
    ///
    /// Replies exchanged between two other users under one of the removed
    /// messages are kept and detached into roots. Returns `None` when the
    /// user does not exist.
    pub fn delete_user(&self, user_id: &str) -> Result<Option<DeletionSummary>> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let exists = tx
                .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let detached_replies = tx.execute(
                "UPDATE messages SET parent_id = NULL
                 WHERE parent_id IN (
                     SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1
                 )
                   AND sender_id != ?1
                   AND receiver_id != ?1",
                [user_id],
            )?;
            let history = tx.execute("DELETE FROM message_history WHERE edited_by = ?1", [user_id])?;
            let notifications = tx.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?;
            let messages = tx.execute(
                "DELETE FROM messages WHERE sender_id = ?1 OR receiver_id = ?1",
                [user_id],
            )?;
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            tx.commit()?;

            let summary = DeletionSummary {
                messages,
                notifications,
                history,
                detached_replies,
            };
            info!("Deleted user {}: {:?}", user_id, summary);
            Ok(Some(summary))
        })
    }

    // -- Messages --

    /// Insert a message and the receiver's notification in one transaction.
    ///
    /// `parent_id` is only checked by the foreign key; an unknown parent or
    /// receiver fails with a constraint violation (see [`is_constraint_violation`]).
    pub fn create_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let now = now_timestamp();
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, parent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, sender_id, receiver_id, content, parent_id, now],
            )?;
            tx.execute(
                "INSERT INTO notifications (id, user_id, message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![Uuid::new_v4().to_string(), receiver_id, id, now],
            )?;
            tx.commit()?;

            query_message(conn, id)?.ok_or_else(|| anyhow!("Message missing after insert: {}", id))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Replace a message's content, logging the prior content when it changes.
    pub fn update_content(&self, id: &str, editor_id: &str, new_content: &str) -> Result<EditOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let current: Option<String> = tx
                .query_row("SELECT content FROM messages WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(current) = current else {
                return Ok(EditOutcome::NotFound);
            };
            if current == new_content {
                return Ok(EditOutcome::Unchanged);
            }

            tx.execute(
                "INSERT INTO message_history (id, message_id, old_content, edited_by, edited_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![Uuid::new_v4().to_string(), id, current, editor_id, now_timestamp()],
            )?;
            tx.execute(
                "UPDATE messages SET content = ?1, edited = 1 WHERE id = ?2",
                rusqlite::params![new_content, id],
            )?;
            tx.commit()?;

            Ok(EditOutcome::Edited)
        })
    }

    /// Mark a message read. Returns true only if it was unread before.
    pub fn mark_read(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Prior versions of a message, oldest first.
    pub fn history_for(&self, message_id: &str) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, old_content, edited_by, edited_at
                 FROM message_history
                 WHERE message_id = ?1
                 ORDER BY edited_at, rowid",
            )?;

            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        old_content: row.get(2)?,
                        edited_by: row.get(3)?,
                        edited_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Notifications --

    /// A user's notifications, newest first.
    pub fn notifications_for(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message_id, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        message_id: row.get(2)?,
                        is_read: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Returns `None` if the notification does not belong to `user_id`,
    /// otherwise whether it was unread before this call.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<Option<bool>> {
        self.with_conn_mut(|conn| {
            let owned = conn
                .query_row(
                    "SELECT 1 FROM notifications WHERE id = ?1 AND user_id = ?2",
                    [id, user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !owned {
                return Ok(None);
            }

            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                [id],
            )?;
            Ok(Some(changed > 0))
        })
    }
}

/// True when the error came from a violated SQLite constraint, such as a
/// foreign key pointing at a missing user or parent message.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {} = ?1", column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    let row = conn.query_row(&sql, [id], message_from_row).optional()?;
    Ok(row)
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        receiver_id: row.get(3)?,
        receiver_username: row.get(4)?,
        content: row.get(5)?,
        parent_id: row.get(6)?,
        edited: row.get(7)?,
        read: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn seed_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash").unwrap();
        id
    }

    pub(crate) fn send(db: &Database, from: &str, to: &str, content: &str, parent: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_message(&id, from, to, content, parent).unwrap();
        id
    }

    fn count(db: &Database, sql: &str, param: &str) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row(sql, [param], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn create_message_stores_fields_and_joins_usernames() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let id = send(&db, &alice, &bob, "Hello, this is a test message.", None);
        let row = db.get_message(&id).unwrap().unwrap();

        assert_eq!(row.sender_username, "alice");
        assert_eq!(row.receiver_username, "bob");
        assert_eq!(row.content, "Hello, this is a test message.");
        assert!(!row.edited);
        assert!(!row.read);
        assert_eq!(row.parent_id, None);
    }

    #[test]
    fn create_message_notifies_receiver_only() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let id = send(&db, &alice, &bob, "ping", None);

        let bob_notes = db.notifications_for(&bob).unwrap();
        assert_eq!(bob_notes.len(), 1);
        assert_eq!(bob_notes[0].message_id, id);
        assert!(!bob_notes[0].is_read);
        assert!(db.notifications_for(&alice).unwrap().is_empty());
    }

    #[test]
    fn create_message_with_unknown_parent_is_rejected_atomically() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let err = db
            .create_message("m1", &alice, &bob, "orphan", Some("does-not-exist"))
            .unwrap_err();
        assert!(is_constraint_violation(&err));
        assert!(db.get_message("m1").unwrap().is_none());
        assert!(db.notifications_for(&bob).unwrap().is_empty());
    }

    #[test]
    fn create_message_with_unknown_receiver_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");

        let err = db.create_message("m1", &alice, "ghost", "hi", None).unwrap_err();
        assert!(is_constraint_violation(&err));
    }

    #[test]
    fn edit_logs_prior_content_and_sets_edited() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "Original message content", None);

        let outcome = db.update_content(&id, &alice, "Updated message content").unwrap();
        assert_eq!(outcome, EditOutcome::Edited);

        let history = db.history_for(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_content, "Original message content");
        assert_eq!(history[0].edited_by.as_deref(), Some(alice.as_str()));

        let row = db.get_message(&id).unwrap().unwrap();
        assert!(row.edited);
        assert_eq!(row.content, "Updated message content");
    }

    #[test]
    fn multiple_edits_log_in_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "Original message content", None);

        db.update_content(&id, &alice, "First edit").unwrap();
        db.update_content(&id, &alice, "Second edit").unwrap();

        let history = db.history_for(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].old_content, "Original message content");
        assert_eq!(history[1].old_content, "First edit");
    }

    #[test]
    fn edit_with_same_content_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "same", None);

        let outcome = db.update_content(&id, &alice, "same").unwrap();
        assert_eq!(outcome, EditOutcome::Unchanged);
        assert!(db.history_for(&id).unwrap().is_empty());
        assert!(!db.get_message(&id).unwrap().unwrap().edited);
    }

    #[test]
    fn edit_of_missing_message_reports_not_found() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        assert_eq!(db.update_content("nope", &alice, "x").unwrap(), EditOutcome::NotFound);
    }

    #[test]
    fn edits_do_not_create_notifications() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "v1", None);

        db.update_content(&id, &alice, "v2").unwrap();
        assert_eq!(db.notifications_for(&bob).unwrap().len(), 1);
    }

    #[test]
    fn mark_read_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "hi", None);

        assert!(db.mark_read(&id).unwrap());
        assert!(!db.mark_read(&id).unwrap());
        assert!(db.get_message(&id).unwrap().unwrap().read);
        assert!(!db.mark_read("missing").unwrap());
    }

    #[test]
    fn mark_notification_read_checks_owner() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        send(&db, &alice, &bob, "hi", None);
        let note = db.notifications_for(&bob).unwrap().remove(0);

        assert_eq!(db.mark_notification_read(&note.id, &alice).unwrap(), None);
        assert_eq!(db.mark_notification_read(&note.id, &bob).unwrap(), Some(true));
        assert_eq!(db.mark_notification_read(&note.id, &bob).unwrap(), Some(false));
    }

    #[test]
    fn delete_user_cascades_to_owned_data() {
        let db = Database::open_in_memory().unwrap();
        let user1 = seed_user(&db, "user1");
        let user2 = seed_user(&db, "user2");

        let m1 = send(&db, &user1, &user2, "Hello from user1", None);
        send(&db, &user2, &user1, "Hello from user2", None);
        db.update_content(&m1, &user1, "Edited by user1").unwrap();

        let summary = db.delete_user(&user1).unwrap().unwrap();
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.notifications, 1);
        assert_eq!(summary.history, 1);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM messages WHERE sender_id = ?1 OR receiver_id = ?1", &user1), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM notifications WHERE user_id = ?1", &user1), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM message_history WHERE edited_by = ?1", &user1), 0);
        assert!(db.get_user_by_id(&user1).unwrap().is_none());
        assert!(db.get_user_by_id(&user2).unwrap().is_some());
    }

    #[test]
    fn delete_user_leaves_other_users_data_alone() {
        let db = Database::open_in_memory().unwrap();
        let user1 = seed_user(&db, "user1");
        let user2 = seed_user(&db, "user2");
        let user3 = seed_user(&db, "user3");

        let root = send(&db, &user1, &user2, "root", None);
        let reply = send(&db, &user2, &user3, "aside", Some(&root));
        let unrelated = send(&db, &user3, &user2, "unrelated", None);
        db.update_content(&unrelated, &user3, "unrelated, edited").unwrap();

        let summary = db.delete_user(&user1).unwrap().unwrap();
        assert_eq!(summary.detached_replies, 1);

        let kept = db.get_message(&reply).unwrap().unwrap();
        assert_eq!(kept.parent_id, None);
        assert_eq!(kept.content, "aside");
        assert!(db.get_message(&unrelated).unwrap().is_some());
        assert_eq!(db.history_for(&unrelated).unwrap().len(), 1);
        assert_eq!(db.notifications_for(&user3).unwrap().len(), 1);
        // user2's notification for the deleted root goes with the root
        assert_eq!(db.notifications_for(&user2).unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_user_returns_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.delete_user("ghost").unwrap().is_none());
    }
}
