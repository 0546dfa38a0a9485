use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Snapshot cache of the external identity service. Refreshed
        -- from verified claims; never authoritative, no credentials.
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            avatar_url  TEXT,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name        TEXT,
            avatar_url  TEXT,
            created_by  TEXT NOT NULL,
            -- Canonical unordered pair 'min_uuid:max_uuid' for direct
            -- chats; NULL for groups. The UNIQUE constraint is what
            -- serializes two users starting the same chat at once.
            direct_key  TEXT UNIQUE,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at);

        CREATE TABLE IF NOT EXISTS participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL,
            role            TEXT NOT NULL CHECK (role IN ('admin', 'member')),
            joined_at       TEXT NOT NULL,
            last_read_at    TEXT,
            is_muted        INTEGER NOT NULL DEFAULT 0,
            is_archived     INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL,
            -- ciphertext and nonce are NULL together: media-only
            -- message, or a soft-deleted tombstone.
            ciphertext      BLOB,
            nonce           BLOB,
            kind            TEXT NOT NULL CHECK (kind IN ('text', 'media', 'voice', 'mixed')),
            is_edited       INTEGER NOT NULL DEFAULT 0,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            is_pinned       INTEGER NOT NULL DEFAULT 0,
            reply_to_id     TEXT REFERENCES messages(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_media (
            id            TEXT PRIMARY KEY,
            message_id    TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            kind          TEXT NOT NULL CHECK (kind IN ('image', 'video', 'audio', 'document', 'voice')),
            url           TEXT NOT NULL,
            filename      TEXT NOT NULL,
            size_bytes    INTEGER NOT NULL,
            content_type  TEXT NOT NULL,
            width         INTEGER,
            height        INTEGER,
            duration_secs REAL,
            thumbnail_url TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_media_message
            ON message_media(message_id);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            -- One active reaction per user per message. Toggling the
            -- same emoji removes the row; a different emoji updates it.
            UNIQUE (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
