use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{NewMedia, NewMessage};
use parley_db::now_ts;
use parley_types::api::{Claims, MessageAction, MessageResponse, NewMediaItem, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::{MediaKind, MessageKind};

use crate::error::{ApiError, join_error};
use crate::hydrate::hydrate_messages;
use crate::state::AppState;

/// Senders may rewrite their message for this long after creation.
/// The boundary is inclusive and always re-checked against the stored
/// `created_at`, never a cached copy.
const EDIT_WINDOW_SECS: i64 = 600;

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor pagination: `created_at` of the oldest message from the
    /// previous page.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// Media uploaded to the blob store, waiting to be persisted.
struct StoredMedia {
    id: String,
    kind: &'static str,
    url: String,
    filename: String,
    size_bytes: i64,
    content_type: String,
    width: Option<i64>,
    height: Option<i64>,
    duration_secs: Option<f64>,
}

/// Best-effort release of blobs whose message never landed.
async fn release_blobs(state: &AppState, urls: Vec<String>) {
    for url in urls {
        if let Err(e) = state.blobs.delete(&url).await {
            warn!("failed to release orphaned blob {}: {:#}", url, e);
        }
    }
}

fn derive_kind(content: &Option<String>, media: &[NewMediaItem]) -> MessageKind {
    match (content.is_some(), media.is_empty()) {
        (true, true) => MessageKind::Text,
        (true, false) => MessageKind::Mixed,
        (false, false) => {
            if media.iter().all(|m| m.kind == MediaKind::Voice) {
                MessageKind::Voice
            } else {
                MessageKind::Media
            }
        }
        // Rejected before we get here.
        (false, true) => MessageKind::Text,
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let content = req
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from);

    if content.is_none() && req.media.is_empty() {
        return Err(ApiError::Validation(
            "a message needs text content or at least one media item".into(),
        ));
    }

    // Authorization and reply validation before any side effect.
    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();
    let reply_to = req.reply_to_id.map(|id| id.to_string());
    {
        let db = state.db.clone();
        let cid = cid.clone();
        let sender = sender.clone();
        let reply_to = reply_to.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
            if db.get_conversation(&cid)?.is_none() {
                return Err(ApiError::NotFound);
            }
            if !db.is_participant(&cid, &sender)? {
                return Err(ApiError::Forbidden);
            }
            if let Some(reply_id) = &reply_to {
                let target = db
                    .get_message(reply_id)?
                    .ok_or_else(|| ApiError::Validation("reply target does not exist".into()))?;
                if target.conversation_id != cid {
                    return Err(ApiError::Validation(
                        "reply target belongs to another conversation".into(),
                    ));
                }
            }
            Ok(())
        })
        .await
        .map_err(join_error)??;
    }

    // Decode everything up front so malformed input is rejected before
    // any blob leaves the process.
    let mut decoded = Vec::with_capacity(req.media.len());
    for item in &req.media {
        let bytes = B64
            .decode(&item.data)
            .map_err(|_| ApiError::Validation("media data is not valid base64".into()))?;
        decoded.push(bytes);
    }

    // Hand media bytes to the blob store; only URLs are persisted. Any
    // failure after an upload releases what already went out, so no
    // blob is left orphaned without a message row.
    let mut stored: Vec<StoredMedia> = Vec::with_capacity(req.media.len());
    for (item, bytes) in req.media.iter().zip(decoded) {
        let size_bytes = bytes.len() as i64;
        let path_hint = format!("{}/{}", conversation_id, Uuid::new_v4());

        let url = match state.blobs.store(bytes, &item.content_type, &path_hint).await {
            Ok(url) => url,
            Err(e) => {
                release_blobs(&state, stored.iter().map(|m| m.url.clone()).collect()).await;
                return Err(ApiError::Persistence(e));
            }
        };

        stored.push(StoredMedia {
            id: Uuid::new_v4().to_string(),
            kind: item.kind.as_str(),
            url,
            filename: item.filename.clone(),
            size_bytes,
            content_type: item.content_type.clone(),
            width: item.width,
            height: item.height,
            duration_secs: item.duration_secs,
        });
    }

    let kind = derive_kind(&content, &req.media);
    let message_id = Uuid::new_v4();
    let uploaded: Vec<String> = stored.iter().map(|m| m.url.clone()).collect();

    let db = state.db.clone();
    let codec = state.codec.clone();
    let mid = message_id.to_string();
    let insert_result = tokio::task::spawn_blocking(move || -> Result<MessageResponse, ApiError> {
        let sealed = match &content {
            Some(text) => Some(
                codec
                    .encrypt(text)
                    .map_err(|e| ApiError::Persistence(anyhow::anyhow!("encrypt: {e}")))?,
            ),
            None => None,
        };

        let media_rows: Vec<NewMedia<'_>> = stored
            .iter()
            .map(|m| NewMedia {
                id: &m.id,
                kind: m.kind,
                url: &m.url,
                filename: &m.filename,
                size_bytes: m.size_bytes,
                content_type: &m.content_type,
                width: m.width,
                height: m.height,
                duration_secs: m.duration_secs,
                thumbnail_url: None,
            })
            .collect();

        db.insert_message(
            &NewMessage {
                id: &mid,
                conversation_id: &cid,
                sender_id: &sender,
                ciphertext: sealed.as_ref().map(|s| s.ciphertext.as_slice()),
                nonce: sealed.as_ref().map(|s| s.nonce.as_slice()),
                kind: kind.as_str(),
                reply_to_id: reply_to.as_deref(),
                now: &now_ts(),
            },
            &media_rows,
        )?;

        let row = db.get_message(&mid)?.ok_or_else(|| {
            ApiError::Persistence(anyhow::anyhow!("message vanished after insert"))
        })?;
        let mut hydrated = hydrate_messages(&db, &codec, vec![row])?;
        Ok(hydrated.remove(0))
    })
    .await
    .map_err(join_error);

    let hydrated = match insert_result {
        Ok(Ok(hydrated)) => hydrated,
        Ok(Err(e)) | Err(e) => {
            // The message never landed; the uploads must not outlive it.
            release_blobs(&state, uploaded).await;
            return Err(e);
        }
    };

    // Id-only event: subscribers fetch the hydrated payload themselves.
    state.dispatcher.broadcast(GatewayEvent::MessageCreated {
        message_id,
        conversation_id,
    });

    Ok((StatusCode::CREATED, Json(hydrated)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let db = state.db.clone();
    let codec = state.codec.clone();
    let cid = conversation_id.to_string();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let messages = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::NotFound);
        }
        if !db.is_participant(&cid, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        let rows = db.list_messages(&cid, limit, before.as_deref())?;
        Ok(hydrate_messages(&db, &codec, rows)?)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(messages))
}

/// Single hydrated message, the fetch realtime consumers use after a
/// `MessageCreated` notification.
pub async fn get_message_full(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageResponse>, ApiError> {
    let db = state.db.clone();
    let codec = state.codec.clone();
    let mid = message_id.to_string();
    let user_id = claims.sub.to_string();

    let message = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let row = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;
        if !db.is_participant(&row.conversation_id, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        let mut hydrated = hydrate_messages(&db, &codec, vec![row])?;
        Ok(hydrated.remove(0))
    })
    .await
    .map_err(join_error)??;

    Ok(Json(message))
}

pub async fn patch_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(action): Json<MessageAction>,
) -> Result<Json<MessageResponse>, ApiError> {
    let db = state.db.clone();
    let codec = state.codec.clone();
    let mid = message_id.to_string();
    let user_id = claims.sub.to_string();

    let (hydrated, conversation_id, flags) =
        tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
            let row = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;

            match &action {
                MessageAction::Edit { content } => {
                    if row.sender_id != user_id {
                        return Err(ApiError::Forbidden);
                    }
                    if row.is_deleted {
                        return Err(ApiError::Validation("message is deleted".into()));
                    }

                    let content = content.trim();
                    if content.is_empty() {
                        return Err(ApiError::Validation(
                            "message content cannot be empty".into(),
                        ));
                    }

                    let created_at = parley_db::parse_ts(&row.created_at).ok_or_else(|| {
                        ApiError::Persistence(anyhow::anyhow!(
                            "corrupt created_at on message {}",
                            row.id
                        ))
                    })?;
                    let elapsed = Utc::now() - created_at;
                    if elapsed.num_seconds() > EDIT_WINDOW_SECS {
                        return Err(ApiError::Validation("edit window expired".into()));
                    }

                    let sealed = codec
                        .encrypt(content)
                        .map_err(|e| ApiError::Persistence(anyhow::anyhow!("encrypt: {e}")))?;
                    db.mark_edited(&row.id, &sealed.ciphertext, &sealed.nonce, &now_ts())?;
                }
                MessageAction::Pin | MessageAction::Unpin => {
                    if row.is_deleted {
                        return Err(ApiError::Validation(
                            "deleted messages cannot be pinned".into(),
                        ));
                    }

                    let participant = db
                        .find_participant(&row.conversation_id, &user_id)?
                        .ok_or(ApiError::Forbidden)?;
                    let conversation =
                        db.get_conversation(&row.conversation_id)?.ok_or_else(|| {
                            ApiError::Persistence(anyhow::anyhow!(
                                "conversation missing for message {}",
                                row.id
                            ))
                        })?;
                    // Direct chats: any participant may pin. Groups:
                    // admins only.
                    if conversation.kind == "group" && participant.role != "admin" {
                        return Err(ApiError::Forbidden);
                    }

                    let pin = matches!(action, MessageAction::Pin);
                    db.set_pinned(&row.id, pin, &now_ts())?;
                }
            }

            let updated = db.get_message(&mid)?.ok_or_else(|| {
                ApiError::Persistence(anyhow::anyhow!("message vanished after update"))
            })?;
            let conversation_id = updated
                .conversation_id
                .parse::<Uuid>()
                .unwrap_or_default();
            let flags = (updated.is_edited, updated.is_deleted, updated.is_pinned);
            let mut hydrated = hydrate_messages(&db, &codec, vec![updated])?;
            Ok((hydrated.remove(0), conversation_id, flags))
        })
        .await
        .map_err(join_error)??;

    state.dispatcher.broadcast(GatewayEvent::MessageUpdated {
        message_id,
        conversation_id,
        is_edited: flags.0,
        is_deleted: flags.1,
        is_pinned: flags.2,
    });

    Ok(Json(hydrated))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let mid = message_id.to_string();
    let user_id = claims.sub.to_string();

    let outcome = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let row = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;

        let participant = db
            .find_participant(&row.conversation_id, &user_id)?
            .ok_or(ApiError::Forbidden)?;
        // Sender may always delete their own message; conversation
        // admins may moderate anyone's.
        if row.sender_id != user_id && participant.role != "admin" {
            return Err(ApiError::Forbidden);
        }

        // Deleting a tombstone is an idempotent no-op.
        if row.is_deleted {
            return Ok(None);
        }

        let media_urls = db.soft_delete_message(&row.id, &now_ts())?;
        Ok(Some((row, media_urls)))
    })
    .await
    .map_err(join_error)??;

    if let Some((row, media_urls)) = outcome {
        state.dispatcher.broadcast(GatewayEvent::MessageUpdated {
            message_id,
            conversation_id: row.conversation_id.parse().unwrap_or_default(),
            is_edited: row.is_edited,
            is_deleted: true,
            is_pinned: row.is_pinned,
        });

        // Blob cleanup is best-effort and never rolls back the delete.
        for url in media_urls {
            let blobs = state.blobs.clone();
            tokio::spawn(async move {
                if let Err(e) = blobs.delete(&url).await {
                    warn!("failed to release blob {}: {:#}", url, e);
                }
            });
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
