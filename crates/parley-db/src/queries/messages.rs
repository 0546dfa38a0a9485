use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::{MediaRow, MessageRow, NewMedia, NewMessage};
use crate::queries::{MESSAGE_COLUMNS, map_message_row};

impl Database {
    /// Persist a message with its media rows and bump the
    /// conversation's activity timestamp, all in one transaction.
    pub fn insert_message(&self, message: &NewMessage<'_>, media: &[NewMedia<'_>]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages
                     (id, conversation_id, sender_id, ciphertext, nonce, kind, reply_to_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.ciphertext,
                    message.nonce,
                    message.kind,
                    message.reply_to_id,
                    message.now,
                ],
            )?;

            for item in media {
                tx.execute(
                    "INSERT INTO message_media
                         (id, message_id, kind, url, filename, size_bytes, content_type,
                          width, height, duration_secs, thumbnail_url)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        item.id,
                        message.id,
                        item.kind,
                        item.url,
                        item.filename,
                        item.size_bytes,
                        item.content_type,
                        item.width,
                        item.height,
                        item.duration_secs,
                        item.thumbnail_url,
                    ],
                )?;
            }

            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![message.conversation_id, message.now],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1"
        );
        self.with_conn(|conn| {
            let row = conn.query_row(&sql, [id], map_message_row).optional()?;
            Ok(row)
        })
    }

    /// Newest-first page. `before` is the `created_at` of the oldest
    /// message from the previous page (cursor pagination).
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        let cursor = if before.is_some() {
            "AND m.created_at < ?3"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.conversation_id = ?1 {cursor}
             ORDER BY m.created_at DESC
             LIMIT ?2"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = match before {
                Some(cursor) => stmt
                    .query_map(
                        rusqlite::params![conversation_id, limit, cursor],
                        map_message_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(rusqlite::params![conversation_id, limit], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    /// Replace the sealed body after an edit. The caller has already
    /// re-checked the edit window against the stored `created_at`.
    pub fn mark_edited(&self, id: &str, ciphertext: &[u8], nonce: &[u8], now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages
                 SET ciphertext = ?2, nonce = ?3, is_edited = 1, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, ciphertext, nonce, now],
            )?;
            Ok(())
        })
    }

    /// Tombstone: flag the row, scrub the sealed body, drop media rows.
    /// Returns the media URLs so the caller can release the blobs.
    pub fn soft_delete_message(&self, id: &str, now: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE messages
                 SET is_deleted = 1, ciphertext = NULL, nonce = NULL, updated_at = ?2
                 WHERE id = ?1",
                rusqlite::params![id, now],
            )?;

            let urls = {
                let mut stmt = tx.prepare("SELECT url FROM message_media WHERE message_id = ?1")?;
                stmt.query_map([id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM message_media WHERE message_id = ?1", [id])?;

            tx.commit()?;
            Ok(urls)
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET is_pinned = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, pinned, now],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch media for a set of message ids.
    pub fn media_for_messages(&self, message_ids: &[String]) -> Result<Vec<MediaRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id, message_id, kind, url, filename, size_bytes, content_type,
                        width, height, duration_secs, thumbnail_url
                 FROM message_media WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(MediaRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        kind: row.get(2)?,
                        url: row.get(3)?,
                        filename: row.get(4)?,
                        size_bytes: row.get(5)?,
                        content_type: row.get(6)?,
                        width: row.get(7)?,
                        height: row.get(8)?,
                        duration_secs: row.get(9)?,
                        thumbnail_url: row.get(10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Candidate window for decrypted search: newest messages with a
    /// body, restricted to conversations the requester participates
    /// in. The caller decrypts and substring-filters the result.
    pub fn search_candidates(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        window: u32,
    ) -> Result<Vec<MessageRow>> {
        let scope = if conversation_id.is_some() {
            "AND m.conversation_id = ?3"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             JOIN participants p
               ON p.conversation_id = m.conversation_id AND p.user_id = ?1
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.is_deleted = 0 AND m.ciphertext IS NOT NULL {scope}
             ORDER BY m.created_at DESC
             LIMIT ?2"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = match conversation_id {
                Some(cid) => stmt
                    .query_map(rusqlite::params![user_id, window, cid], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(rusqlite::params![user_id, window], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }
}
