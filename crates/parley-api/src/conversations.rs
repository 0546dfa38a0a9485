use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_db::now_ts;
use parley_types::api::{Claims, ConversationFilter, ConversationSummary, CreateGroupRequest};

use crate::error::{ApiError, join_error};
use crate::hydrate::{summarize_by_id, summarize_conversation};
use crate::state::AppState;

/// Hard cap on group size, creator included.
pub const MAX_GROUP_PARTICIPANTS: usize = 200;

#[derive(Debug, Default, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub filter: ConversationFilter,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let db = state.db.clone();
    let codec = state.codec.clone();
    let user_id = claims.sub.to_string();
    let filter = query.filter;

    let mut summaries = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let listed = db.list_for_user(&user_id, filter)?;
        let mut out = Vec::with_capacity(listed.len());
        for item in listed {
            out.push(summarize_conversation(
                &db,
                &codec,
                &user_id,
                &item.conversation,
                item.is_muted,
                item.is_archived,
            )?);
        }
        Ok(out)
    })
    .await
    .map_err(join_error)??;

    // Unread filtering needs the computed counts, so it runs last.
    if filter == ConversationFilter::Unread {
        summaries.retain(|summary| summary.unread_count > 0);
    }

    Ok(Json(summaries))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationSummary>), ApiError> {
    let creator = claims.sub;

    // Dedupe and drop the creator, who is always included.
    let mut seen = HashSet::new();
    let members: Vec<String> = req
        .participant_ids
        .into_iter()
        .filter(|id| *id != creator && seen.insert(*id))
        .map(|id| id.to_string())
        .collect();

    if members.len() < 2 || members.len() >= MAX_GROUP_PARTICIPANTS {
        return Err(ApiError::Validation(format!(
            "a group needs between 2 and {} other participants",
            MAX_GROUP_PARTICIPANTS - 1
        )));
    }

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from);

    let db = state.db.clone();
    let codec = state.codec.clone();
    let creator_id = creator.to_string();
    let conversation_id = Uuid::new_v4().to_string();

    let summary = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        db.create_group(
            &conversation_id,
            &creator_id,
            name.as_deref(),
            &members,
            &now_ts(),
        )?;
        summarize_by_id(&db, &codec, &creator_id, &conversation_id)?.ok_or_else(|| {
            ApiError::Persistence(anyhow::anyhow!("conversation vanished after create"))
        })
    })
    .await
    .map_err(join_error)??;

    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let user_id = claims.sub.to_string();

    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::NotFound);
        }
        if !db.is_participant(&cid, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        db.mark_read(&cid, &user_id, &now_ts())?;
        Ok(())
    })
    .await
    .map_err(join_error)??;

    Ok(StatusCode::NO_CONTENT)
}
