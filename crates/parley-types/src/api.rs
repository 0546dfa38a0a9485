use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationKind, MediaKind, MessageKind, ParticipantRole, ToggleOutcome};

// -- JWT Claims --

/// Claims minted by the external identity service and verified by both
/// parley-api (REST middleware) and parley-gateway (WebSocket Identify).
/// Canonical definition lives here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Groups,
    Archived,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartDirectRequest {
    pub target_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub user_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// For direct chats this is the other participant's username.
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub participants: Vec<ParticipantSummary>,
    /// Decrypted preview of the newest message, truncated to 50 chars.
    pub last_message_preview: Option<String>,
    pub unread_count: u64,
    pub is_archived: bool,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMediaItem {
    /// Raw bytes, base64-encoded. The core hands these to the blob
    /// store and persists only the returned URL.
    pub data: String,
    pub kind: MediaKind,
    pub content_type: String,
    pub filename: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub media: Vec<NewMediaItem>,
    pub reply_to_id: Option<Uuid>,
}

/// Mutations applied via `PATCH /messages/{id}`, tagged by action so the
/// boundary validates shape before any state machine runs.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", deny_unknown_fields)]
pub enum MessageAction {
    Edit { content: String },
    Pin,
    Unpin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Uuid,
    pub kind: MediaKind,
    pub url: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// Lenient preview of the message being replied to. A deleted target
/// keeps the reference intact with `content: None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: Option<String>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    /// Decrypted plaintext. `None` for deleted or media-only messages;
    /// a placeholder string when decryption fails.
    pub content: Option<String>,
    pub kind: MessageKind,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub is_pinned: bool,
    pub reply_to: Option<ReplyPreview>,
    pub media: Vec<MediaItem>,
    pub reactions: Vec<ReactionGroup>,
    /// Participants whose read watermark covers this message.
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleReactionResponse {
    pub outcome: ToggleOutcome,
}

// -- Search & unread --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub conversation_id: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total: u64,
}
