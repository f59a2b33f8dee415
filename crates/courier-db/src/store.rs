//! Read interface consumed by the thread resolver and the unread cache.

use anyhow::Result;

use crate::Database;
use crate::models::MessageRow;
use crate::queries::{MESSAGE_SELECT, OptionalExt, message_from_row};

/// Parent ids per `IN (...)` query. Kept under SQLite's historical
/// 999-variable limit.
const MAX_IDS_PER_QUERY: usize = 900;

pub trait MessageStore: Send + Sync {
    /// The message with `id`, only if `sender_id` sent it.
    fn owned_message(&self, id: &str, sender_id: &str) -> Result<Option<MessageRow>>;

    /// Direct replies of every message in `parent_ids`, ordered by
    /// `(parent, creation time)`. Replies of one parent are contiguous.
    ///
    /// At most `max_rows` rows are read. A caller that needs to know whether
    /// more exist asks for one more than it can accept.
    fn replies_of_many(&self, parent_ids: &[String], max_rows: usize) -> Result<Vec<MessageRow>>;

    /// Unread messages addressed to `user_id`, oldest first.
    fn unread_for(&self, user_id: &str) -> Result<Vec<MessageRow>>;
}

impl MessageStore for Database {
    fn owned_message(&self, id: &str, sender_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.id = ?1 AND m.sender_id = ?2", MESSAGE_SELECT);
            let row = conn.query_row(&sql, [id, sender_id], message_from_row).optional()?;
            Ok(row)
        })
    }

    fn replies_of_many(&self, parent_ids: &[String], max_rows: usize) -> Result<Vec<MessageRow>> {
        if parent_ids.is_empty() || max_rows == 0 {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let mut replies = Vec::new();

            for chunk in parent_ids.chunks(MAX_IDS_PER_QUERY) {
                let remaining = max_rows - replies.len();
                if remaining == 0 {
                    break;
                }

                let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "{} WHERE m.parent_id IN ({}) ORDER BY m.parent_id, m.created_at, m.rowid LIMIT ?{}",
                    MESSAGE_SELECT,
                    placeholders.join(", "),
                    chunk.len() + 1
                );

                let limit = i64::try_from(remaining).unwrap_or(i64::MAX);
                let mut stmt = conn.prepare(&sql)?;
                let mut params: Vec<&dyn rusqlite::types::ToSql> = chunk
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql)
                    .collect();
                params.push(&limit);

                let rows = stmt
                    .query_map(params.as_slice(), message_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                replies.extend(rows);
            }

            Ok(replies)
        })
    }

    fn unread_for(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.receiver_id = ?1 AND m.is_read = 0 ORDER BY m.created_at, m.rowid",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;

            let rows = stmt
                .query_map([user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::tests::{seed_user, send};

    #[test]
    fn unread_for_filters_by_receiver_and_read_state() {
        let db = Database::open_in_memory().unwrap();
        let user1 = seed_user(&db, "user1");
        let user2 = seed_user(&db, "user2");

        send(&db, &user1, &user2, "Unread message 1", None);
        let read = send(&db, &user1, &user2, "Unread message 2", None);
        db.mark_read(&read).unwrap();
        send(&db, &user2, &user1, "Unread message 3", None);

        let for_user2 = db.unread_for(&user2).unwrap();
        assert_eq!(for_user2.len(), 1);
        assert_eq!(for_user2[0].content, "Unread message 1");

        let for_user1 = db.unread_for(&user1).unwrap();
        assert_eq!(for_user1.len(), 1);
        assert_eq!(for_user1[0].content, "Unread message 3");

        for row in for_user1.iter().chain(&for_user2) {
            assert!(!row.read);
        }
    }

    #[test]
    fn owned_message_hides_messages_sent_by_others() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let id = send(&db, &alice, &bob, "mine", None);

        assert!(db.owned_message(&id, &alice).unwrap().is_some());
        assert!(db.owned_message(&id, &bob).unwrap().is_none());
        assert!(db.owned_message("missing", &alice).unwrap().is_none());
    }

    #[test]
    fn replies_come_back_grouped_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let a = send(&db, &alice, &bob, "a", None);
        let b = send(&db, &alice, &bob, "b", None);
        let a1 = send(&db, &bob, &alice, "a1", Some(&a));
        let b1 = send(&db, &bob, &alice, "b1", Some(&b));
        let a2 = send(&db, &bob, &alice, "a2", Some(&a));

        let replies = db.replies_of_many(&[a.clone(), b.clone()], 100).unwrap();
        let of_a: Vec<&str> = replies
            .iter()
            .filter(|r| r.parent_id.as_deref() == Some(a.as_str()))
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(of_a, vec![a1.as_str(), a2.as_str()]);
        assert!(replies.iter().any(|r| r.id == b1));
        assert_eq!(replies.len(), 3);

        assert!(db.replies_of_many(&[], 100).unwrap().is_empty());
    }

    #[test]
    fn reply_reads_stop_at_the_row_budget() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let root = send(&db, &alice, &bob, "root", None);
        let first = send(&db, &bob, &alice, "0", Some(&root));
        for i in 1..50 {
            send(&db, &bob, &alice, &i.to_string(), Some(&root));
        }

        let capped = db.replies_of_many(&[root.clone()], 5).unwrap();
        assert_eq!(capped.len(), 5);
        assert_eq!(capped[0].id, first);

        assert_eq!(db.replies_of_many(&[root.clone()], 500).unwrap().len(), 50);
        assert!(db.replies_of_many(&[root], 0).unwrap().is_empty());
    }
}
