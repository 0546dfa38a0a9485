use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use parley_db::now_ts;
use parley_types::api::{
    Claims, ConversationSummary, MessageResponse, SearchQuery, StartDirectRequest,
    UnreadCountResponse,
};

use crate::error::{ApiError, join_error};
use crate::hydrate::{hydrate_messages, summarize_by_id};
use crate::state::AppState;

const DEFAULT_SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_LIMIT: u32 = 100;

/// Candidates fetched per requested result. Search decrypts an
/// over-fetch window and filters; an under-full page when more matches
/// exist deeper in history is accepted.
const SEARCH_OVERFETCH: u32 = 5;

/// Get-or-create the direct conversation with the target user.
/// Idempotent: both sides starting the chat concurrently land on the
/// same row.
pub async fn start_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartDirectRequest>,
) -> Result<(StatusCode, Json<ConversationSummary>), ApiError> {
    if req.target_user_id == claims.sub {
        return Err(ApiError::Validation(
            "cannot start a conversation with yourself".into(),
        ));
    }

    let db = state.db.clone();
    let codec = state.codec.clone();
    let caller = claims.sub.to_string();
    let target = req.target_user_id.to_string();
    let new_id = Uuid::new_v4().to_string();

    let (summary, created) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let (conversation_id, created) = db.create_direct(&new_id, &caller, &target, &now_ts())?;
        let summary = summarize_by_id(&db, &codec, &caller, &conversation_id)?.ok_or_else(|| {
            ApiError::Persistence(anyhow::anyhow!("conversation vanished after create"))
        })?;
        Ok((summary, created))
    })
    .await
    .map_err(join_error)??;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(summary)))
}

/// Case-insensitive substring search over decrypted bodies, restricted
/// to the caller's conversations. Ciphertext cannot be matched
/// directly, so a bounded window of recent messages is decrypted and
/// filtered; rows that fail to decrypt are skipped, never surfaced.
pub async fn search_messages(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let needle = query.q.trim().to_lowercase();
    if needle.chars().count() < 2 {
        return Ok(Json(vec![]));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let scope = query.conversation_id.map(|id| id.to_string());

    let db = state.db.clone();
    let codec = state.codec.clone();
    let user_id = claims.sub.to_string();

    let messages = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        if let Some(conversation_id) = &scope {
            if !db.is_participant(conversation_id, &user_id)? {
                return Err(ApiError::Forbidden);
            }
        }

        let candidates =
            db.search_candidates(&user_id, scope.as_deref(), limit * SEARCH_OVERFETCH)?;

        let mut matched = Vec::new();
        for row in candidates {
            let (Some(ciphertext), Some(nonce)) = (&row.ciphertext, &row.nonce) else {
                continue;
            };
            let Ok(text) = codec.decrypt(ciphertext, nonce) else {
                continue;
            };
            if text.to_lowercase().contains(&needle) {
                matched.push(row);
                if matched.len() as u32 == limit {
                    break;
                }
            }
        }

        Ok(hydrate_messages(&db, &codec, matched)?)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(messages))
}

/// Aggregate unread count across the caller's non-archived
/// conversations, computed in a single set-based query.
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let total = tokio::task::spawn_blocking(move || db.total_unread(&user_id))
        .await
        .map_err(join_error)??;

    Ok(Json(UnreadCountResponse { total }))
}
