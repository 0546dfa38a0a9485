use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
///
/// Message payloads are deliberately thin: `MessageCreated` carries only
/// ids so plaintext never crosses the fan-out transport — subscribers
/// fetch the hydrated message via `GET /messages/{id}/full`. Flag-only
/// updates let clients patch local state without a refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A new message was persisted in a conversation
    MessageCreated {
        message_id: Uuid,
        conversation_id: Uuid,
    },

    /// A message's mutable flags changed (edit / pin / soft delete)
    MessageUpdated {
        message_id: Uuid,
        conversation_id: Uuid,
        is_edited: bool,
        is_deleted: bool,
        is_pinned: bool,
    },

    /// A reaction was added, removed or replaced; subscribers refetch
    /// the message's reaction list
    ReactionChanged {
        message_id: Uuid,
        conversation_id: Uuid,
    },

    /// Typing indicator. Subscribers must treat `is_typing = true` as
    /// expired 3 seconds after `at` unless refreshed.
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
        is_typing: bool,
        at: DateTime<Utc>,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to a specific
    /// conversation. Events that return `None` are global and are
    /// delivered to every connected client.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreated {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::MessageUpdated {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::ReactionChanged {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Typing {
                conversation_id, ..
            } => Some(*conversation_id),
            // Ready and PresenceUpdate are global
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific conversations. Ids the caller
    /// does not participate in are ignored.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Drop subscriptions, e.g. when leaving a conversation view
    Unsubscribe { conversation_ids: Vec<Uuid> },

    /// Announce typing in a conversation (refresh at least every 3s)
    TypingStart { conversation_id: Uuid },

    /// Explicitly stop the typing indicator
    TypingStop { conversation_id: Uuid },
}
