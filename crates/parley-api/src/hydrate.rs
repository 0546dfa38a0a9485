use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_crypto::MessageCodec;
use parley_db::models::{MessageRow, ParticipantDetail};
use parley_db::{Database, parse_ts};
use parley_types::api::{
    ConversationSummary, MediaItem, MessageResponse, ParticipantSummary, ReactionGroup,
    ReplyPreview,
};
use parley_types::models::{ConversationKind, MediaKind, MessageKind, ParticipantRole};

/// What a reader sees in place of a body that exists but cannot be
/// decrypted (key rotation gone wrong, corrupted row). Listing must
/// never fail because of one bad row.
pub const UNAVAILABLE_PLACEHOLDER: &str = "[message unavailable]";

const PREVIEW_CHARS: usize = 50;

/// Decrypt a stored body, degrading to the placeholder on failure.
/// `None` means there is no body at all (media-only or tombstone).
pub(crate) fn decrypt_lenient(codec: &MessageCodec, row: &MessageRow) -> Option<String> {
    match (&row.ciphertext, &row.nonce) {
        (Some(ciphertext), Some(nonce)) => match codec.decrypt(ciphertext, nonce) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("undecryptable message {}: {}", row.id, e);
                Some(UNAVAILABLE_PLACEHOLDER.to_string())
            }
        },
        _ => None,
    }
}

fn parse_uuid_lenient(value: &str, context: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("corrupt uuid '{}' in {}: {}", value, context, e);
        Uuid::default()
    })
}

fn parse_ts_lenient(value: &str, context: &str) -> DateTime<Utc> {
    parse_ts(value).unwrap_or_else(|| {
        warn!("corrupt timestamp '{}' in {}", value, context);
        DateTime::default()
    })
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        text.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Hydrate message rows with media, grouped reactions, a lenient reply
/// preview and the read-receipt list. Blocking: run under
/// `spawn_blocking` together with the queries that produced the rows.
pub(crate) fn hydrate_messages(
    db: &Database,
    codec: &MessageCodec,
    rows: Vec<MessageRow>,
) -> anyhow::Result<Vec<MessageResponse>> {
    let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    // Media, skipped for tombstones at build time below.
    let mut media_map: HashMap<String, Vec<MediaItem>> = HashMap::new();
    for m in db.media_for_messages(&message_ids)? {
        let kind = MediaKind::from_str(&m.kind).unwrap_or_else(|| {
            warn!("corrupt media kind '{}' on media {}", m.kind, m.id);
            MediaKind::Document
        });
        media_map.entry(m.message_id.clone()).or_default().push(MediaItem {
            id: parse_uuid_lenient(&m.id, "media id"),
            kind,
            url: m.url,
            filename: m.filename,
            size_bytes: m.size_bytes,
            content_type: m.content_type,
            width: m.width,
            height: m.height,
            duration_secs: m.duration_secs,
            thumbnail_url: m.thumbnail_url,
        });
    }

    // Group reactions by message -> emoji -> user ids.
    let mut reaction_map: HashMap<String, HashMap<String, Vec<Uuid>>> = HashMap::new();
    for r in db.reactions_for_messages(&message_ids)? {
        let emoji_map = reaction_map.entry(r.message_id.clone()).or_default();
        let user_ids = emoji_map.entry(r.emoji.clone()).or_default();
        if let Ok(uid) = r.user_id.parse::<Uuid>() {
            user_ids.push(uid);
        }
    }

    // Reply previews, fetched once per distinct target.
    let mut reply_map: HashMap<String, ReplyPreview> = HashMap::new();
    for row in &rows {
        let Some(reply_id) = &row.reply_to_id else {
            continue;
        };
        if reply_map.contains_key(reply_id) {
            continue;
        }
        if let Some(target) = db.get_message(reply_id)? {
            let content = if target.is_deleted {
                None
            } else {
                decrypt_lenient(codec, &target)
            };
            reply_map.insert(
                reply_id.clone(),
                ReplyPreview {
                    id: parse_uuid_lenient(&target.id, "reply id"),
                    sender_id: parse_uuid_lenient(&target.sender_id, "reply sender"),
                    sender_username: target.sender_username.clone(),
                    content,
                    is_deleted: target.is_deleted,
                },
            );
        }
    }

    // Participant watermarks per conversation, for read receipts.
    let mut roster_cache: HashMap<String, Vec<ParticipantDetail>> = HashMap::new();
    for row in &rows {
        if !roster_cache.contains_key(&row.conversation_id) {
            roster_cache.insert(row.conversation_id.clone(), db.participants(&row.conversation_id)?);
        }
    }

    let messages = rows
        .into_iter()
        .map(|row| {
            let content = if row.is_deleted {
                None
            } else {
                decrypt_lenient(codec, &row)
            };

            let media = if row.is_deleted {
                vec![]
            } else {
                media_map.remove(&row.id).unwrap_or_default()
            };

            let reactions = reaction_map
                .remove(&row.id)
                .map(|emoji_map| {
                    emoji_map
                        .into_iter()
                        .map(|(emoji, user_ids)| ReactionGroup {
                            count: user_ids.len(),
                            emoji,
                            user_ids,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let read_by = roster_cache
                .get(&row.conversation_id)
                .map(|roster| {
                    roster
                        .iter()
                        .filter(|p| {
                            p.user_id != row.sender_id
                                && p.last_read_at
                                    .as_deref()
                                    .is_some_and(|mark| mark >= row.created_at.as_str())
                        })
                        .map(|p| parse_uuid_lenient(&p.user_id, "participant id"))
                        .collect()
                })
                .unwrap_or_default();

            let kind = MessageKind::from_str(&row.kind).unwrap_or_else(|| {
                warn!("corrupt message kind '{}' on message {}", row.kind, row.id);
                MessageKind::Text
            });

            MessageResponse {
                id: parse_uuid_lenient(&row.id, "message id"),
                conversation_id: parse_uuid_lenient(&row.conversation_id, "conversation id"),
                sender_id: parse_uuid_lenient(&row.sender_id, "sender id"),
                sender_username: row.sender_username.clone(),
                content,
                kind,
                is_edited: row.is_edited,
                is_deleted: row.is_deleted,
                is_pinned: row.is_pinned,
                reply_to: row
                    .reply_to_id
                    .as_ref()
                    .and_then(|id| reply_map.get(id).cloned()),
                media,
                reactions,
                read_by,
                created_at: parse_ts_lenient(&row.created_at, "message created_at"),
                updated_at: parse_ts_lenient(&row.updated_at, "message updated_at"),
            }
        })
        .collect();

    Ok(messages)
}

/// Build the per-user conversation summary: resolved display name and
/// avatar (direct chats take the other side's profile), decrypted
/// last-message preview, unread count and roster.
pub(crate) fn summarize_conversation(
    db: &Database,
    codec: &MessageCodec,
    user_id: &str,
    conversation: &parley_db::models::ConversationRow,
    is_muted: bool,
    is_archived: bool,
) -> anyhow::Result<ConversationSummary> {
    let roster = db.participants(&conversation.id)?;

    let kind = ConversationKind::from_str(&conversation.kind).unwrap_or_else(|| {
        warn!(
            "corrupt conversation kind '{}' on {}",
            conversation.kind, conversation.id
        );
        ConversationKind::Group
    });

    let (name, avatar_url) = match kind {
        ConversationKind::Group => (conversation.name.clone(), conversation.avatar_url.clone()),
        ConversationKind::Direct => {
            let other = roster.iter().find(|p| p.user_id != user_id);
            (
                other.map(|p| p.username.clone()),
                other.and_then(|p| p.avatar_url.clone()),
            )
        }
    };

    let last_message_preview = db
        .list_messages(&conversation.id, 1, None)?
        .into_iter()
        .next()
        .filter(|row| !row.is_deleted)
        .and_then(|row| decrypt_lenient(codec, &row))
        .map(|text| truncate_preview(&text));

    let unread_count = db.unread_count(&conversation.id, user_id)?;

    let participants = roster
        .into_iter()
        .map(|p| ParticipantSummary {
            user_id: parse_uuid_lenient(&p.user_id, "participant id"),
            username: p.username,
            avatar_url: p.avatar_url,
            role: ParticipantRole::from_str(&p.role).unwrap_or(ParticipantRole::Member),
        })
        .collect();

    Ok(ConversationSummary {
        id: parse_uuid_lenient(&conversation.id, "conversation id"),
        kind,
        name,
        avatar_url,
        participants,
        last_message_preview,
        unread_count,
        is_archived,
        is_muted,
        created_at: parse_ts_lenient(&conversation.created_at, "conversation created_at"),
        updated_at: parse_ts_lenient(&conversation.updated_at, "conversation updated_at"),
    })
}

/// Summary for a conversation the caller is known to participate in.
pub(crate) fn summarize_by_id(
    db: &Database,
    codec: &MessageCodec,
    user_id: &str,
    conversation_id: &str,
) -> anyhow::Result<Option<ConversationSummary>> {
    let Some(conversation) = db.get_conversation(conversation_id)? else {
        return Ok(None);
    };
    let Some(participant) = db.find_participant(conversation_id, user_id)? else {
        return Ok(None);
    };
    summarize_conversation(
        db,
        codec,
        user_id,
        &conversation,
        participant.is_muted,
        participant.is_archived,
    )
    .map(Some)
}
