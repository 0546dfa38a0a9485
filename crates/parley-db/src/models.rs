/// Database row types — these map directly to SQLite rows.
/// Distinct from the parley-types API models to keep the DB layer
/// independent of the wire format.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A conversation joined with the requesting user's participant row,
/// as returned by the per-user listing.
#[derive(Debug, Clone)]
pub struct ConversationForUser {
    pub conversation: ConversationRow,
    pub is_muted: bool,
    pub is_archived: bool,
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
    pub last_read_at: Option<String>,
    pub is_muted: bool,
    pub is_archived: bool,
}

/// Participant joined with the profile cache for hydration.
#[derive(Debug, Clone)]
pub struct ParticipantDetail {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub last_read_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub ciphertext: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub kind: String,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub is_pinned: bool,
    pub reply_to_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub ciphertext: Option<&'a [u8]>,
    pub nonce: Option<&'a [u8]>,
    pub kind: &'a str,
    pub reply_to_id: Option<&'a str>,
    pub now: &'a str,
}

#[derive(Debug, Clone)]
pub struct MediaRow {
    pub id: String,
    pub message_id: String,
    pub kind: String,
    pub url: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
}

pub struct NewMedia<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub url: &'a str,
    pub filename: &'a str,
    pub size_bytes: i64,
    pub content_type: &'a str,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}
