pub mod conversations;
pub mod messages;
pub mod reactions;
pub mod unread;
pub mod users;

use crate::models::MessageRow;

/// Column list shared by every message query; `m` is the messages
/// table, `u` the profile cache.
pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, \
     COALESCE(u.username, 'unknown'), m.ciphertext, m.nonce, m.kind, \
     m.is_edited, m.is_deleted, m.is_pinned, m.reply_to_id, m.created_at, m.updated_at";

pub(crate) fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        ciphertext: row.get(4)?,
        nonce: row.get(5)?,
        kind: row.get(6)?,
        is_edited: row.get(7)?,
        is_deleted: row.get(8)?,
        is_pinned: row.get(9)?,
        reply_to_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// True when an INSERT hit a UNIQUE/PRIMARY KEY constraint. The store
/// treats these as races to resolve (fetch existing conversation,
/// retry reaction as update), never as hard errors.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
