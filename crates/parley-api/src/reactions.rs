use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::warn;
use uuid::Uuid;

use parley_db::now_ts;
use parley_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use parley_types::events::GatewayEvent;
use parley_types::models::{ToggleOutcome, is_allowed_reaction};

use crate::error::{ApiError, join_error};
use crate::state::AppState;

/// Toggle the caller's reaction on a message. One active reaction per
/// user per message: same emoji removes, different emoji replaces.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    if !is_allowed_reaction(&req.emoji) {
        return Err(ApiError::Validation(format!(
            "'{}' is not an allowed reaction",
            req.emoji
        )));
    }

    let db = state.db.clone();
    let mid = message_id.to_string();
    let user_id = claims.sub.to_string();
    let emoji = req.emoji.clone();

    let (outcome, conversation_id, sender_id) =
        tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
            let row = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;
            if !db.is_participant(&row.conversation_id, &user_id)? {
                return Err(ApiError::Forbidden);
            }

            let outcome = db.toggle_reaction(
                &Uuid::new_v4().to_string(),
                &mid,
                &user_id,
                &emoji,
                &now_ts(),
            )?;
            Ok((outcome, row.conversation_id, row.sender_id))
        })
        .await
        .map_err(join_error)??;

    state.dispatcher.broadcast(GatewayEvent::ReactionChanged {
        message_id,
        conversation_id: conversation_id.parse().unwrap_or_default(),
    });

    // Notify the author when someone reacts to their message. Best
    // effort, after commit.
    if outcome == ToggleOutcome::Added {
        if let Ok(sender) = sender_id.parse::<Uuid>() {
            if sender != claims.sub {
                let notifier = state.notifier.clone();
                let payload = serde_json::json!({
                    "message_id": message_id,
                    "reactor_id": claims.sub,
                    "reactor_username": claims.username,
                    "emoji": req.emoji,
                });
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(sender, "reaction.added", payload).await {
                        warn!("reaction notification failed: {:#}", e);
                    }
                });
            }
        }
    }

    Ok(Json(ToggleReactionResponse { outcome }))
}
