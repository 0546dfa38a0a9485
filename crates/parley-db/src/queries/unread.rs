use anyhow::Result;

use crate::Database;

impl Database {
    /// Advance the caller's read watermark. Forward-only: a stale mark
    /// (older than the stored watermark) is a no-op. Returns whether
    /// the watermark moved.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (last_read_at IS NULL OR last_read_at < ?3)",
                rusqlite::params![conversation_id, user_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Messages from others, not deleted, newer than the watermark.
    /// A NULL watermark means the user has read nothing yet.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN participants p
                   ON p.conversation_id = m.conversation_id AND p.user_id = ?2
                 WHERE m.conversation_id = ?1
                   AND m.sender_id != ?2
                   AND m.is_deleted = 0
                   AND (p.last_read_at IS NULL OR m.created_at > p.last_read_at)",
                [conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Aggregate unread across all non-archived conversations in one
    /// set-based query — no per-conversation fan-out.
    pub fn total_unread(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM participants p
                 JOIN messages m ON m.conversation_id = p.conversation_id
                 WHERE p.user_id = ?1
                   AND p.is_archived = 0
                   AND m.sender_id != ?1
                   AND m.is_deleted = 0
                   AND (p.last_read_at IS NULL OR m.created_at > p.last_read_at)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::queries::testutil::{direct, test_db, text_message, user};
    use crate::{format_ts, now_ts};
    use chrono::{Duration, Utc};

    #[test]
    fn unread_counts_only_unseen_messages_from_others() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);

        text_message(&db, &conversation_id, &a, &now_ts());
        text_message(&db, &conversation_id, &a, &now_ts());
        // B's own message never counts against B.
        text_message(&db, &conversation_id, &b, &now_ts());

        assert_eq!(db.unread_count(&conversation_id, &b).unwrap(), 2);
        assert_eq!(db.unread_count(&conversation_id, &a).unwrap(), 1);
    }

    #[test]
    fn mark_read_zeroes_the_count_and_never_moves_backwards() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);
        text_message(&db, &conversation_id, &a, &now_ts());

        let watermark = format_ts(Utc::now() + Duration::seconds(1));
        assert!(db.mark_read(&conversation_id, &b, &watermark).unwrap());
        assert_eq!(db.unread_count(&conversation_id, &b).unwrap(), 0);

        // A stale mark does not rewind the watermark.
        let stale = format_ts(Utc::now() - Duration::hours(1));
        assert!(!db.mark_read(&conversation_id, &b, &stale).unwrap());
        let row = db.find_participant(&conversation_id, &b).unwrap().unwrap();
        assert_eq!(row.last_read_at.as_deref(), Some(watermark.as_str()));
    }

    #[test]
    fn deleted_messages_drop_out_of_the_count() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);
        let message_id = text_message(&db, &conversation_id, &a, &now_ts());

        assert_eq!(db.unread_count(&conversation_id, &b).unwrap(), 1);
        db.soft_delete_message(&message_id, &now_ts()).unwrap();
        assert_eq!(db.unread_count(&conversation_id, &b).unwrap(), 0);
    }

    #[test]
    fn total_unread_spans_conversations_but_skips_archived() {
        let db = test_db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let with_b = direct(&db, &a, &b);
        let with_c = direct(&db, &a, &c);

        text_message(&db, &with_b, &b, &now_ts());
        text_message(&db, &with_c, &c, &now_ts());
        text_message(&db, &with_c, &c, &now_ts());

        assert_eq!(db.total_unread(&a).unwrap(), 3);

        db.set_archived(&with_c, &a, true).unwrap();
        assert_eq!(db.total_unread(&a).unwrap(), 1);
    }
}
