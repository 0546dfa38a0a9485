use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{Duration, Utc};
use uuid::Uuid;

use parley_crypto::{MessageCodec, generate_key};
use parley_db::models::NewMessage;
use parley_db::{Database, format_ts, now_ts};
use parley_gateway::dispatcher::Dispatcher;
use parley_types::api::{
    Claims, ConversationFilter, CreateGroupRequest, MessageAction, MessageResponse, NewMediaItem,
    SearchQuery, SendMessageRequest, StartDirectRequest, ToggleReactionRequest,
};
use parley_types::models::{MediaKind, MessageKind, ToggleOutcome};

use async_trait::async_trait;

use crate::chat;
use crate::collab::{BlobStore, LogNotifier, NullBlobStore};
use crate::conversations::{self, ListConversationsQuery};
use crate::error::ApiError;
use crate::messages::{self, ListMessagesQuery};
use crate::reactions;
use crate::state::{AppState, AppStateInner};

fn test_state() -> AppState {
    test_state_with_blobs(Arc::new(NullBlobStore))
}

fn test_state_with_blobs(blobs: Arc<dyn BlobStore>) -> AppState {
    Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        codec: MessageCodec::new(&generate_key()),
        dispatcher: Dispatcher::default(),
        blobs,
        notifier: Arc::new(LogNotifier),
        jwt_secret: "test-secret".into(),
    })
}

/// Accepts exactly one blob, then errors, recording stores and deletes.
#[derive(Default)]
struct SingleSlotBlobStore {
    stored: std::sync::Mutex<Vec<String>>,
    deleted: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for SingleSlotBlobStore {
    async fn store(
        &self,
        _bytes: Vec<u8>,
        _content_type: &str,
        path_hint: &str,
    ) -> anyhow::Result<String> {
        let mut stored = self.stored.lock().unwrap();
        if !stored.is_empty() {
            anyhow::bail!("storage full");
        }
        let url = format!("test://{path_hint}");
        stored.push(url.clone());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Stand-in for the auth middleware: seed the profile cache and hand
/// back the claims a verified token would carry.
fn register(state: &AppState, username: &str) -> Claims {
    let sub = Uuid::new_v4();
    state
        .db
        .upsert_user(&sub.to_string(), username, None, &now_ts())
        .unwrap();
    Claims {
        sub,
        username: username.to_string(),
        avatar_url: None,
        exp: 4_102_444_800,
    }
}

async fn direct(state: &AppState, caller: &Claims, target: &Claims) -> Uuid {
    let (_, Json(summary)) = chat::start_direct(
        State(state.clone()),
        Extension(caller.clone()),
        Json(StartDirectRequest {
            target_user_id: target.sub,
        }),
    )
    .await
    .unwrap();
    summary.id
}

async fn send_text(
    state: &AppState,
    sender: &Claims,
    conversation_id: Uuid,
    text: &str,
) -> MessageResponse {
    let (status, Json(message)) = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(sender.clone()),
        Json(SendMessageRequest {
            content: Some(text.to_string()),
            media: vec![],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    message
}

async fn total_unread(state: &AppState, who: &Claims) -> u64 {
    chat::unread_count(State(state.clone()), Extension(who.clone()))
        .await
        .unwrap()
        .0
        .total
}

#[tokio::test]
async fn send_read_edit_delete_lifecycle() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;

    let sent = send_text(&state, &alice, conversation_id, "Hello").await;
    assert_eq!(sent.content.as_deref(), Some("Hello"));
    assert_eq!(sent.kind, MessageKind::Text);
    assert!(!sent.is_edited);

    assert_eq!(total_unread(&state, &bob).await, 1);
    assert_eq!(total_unread(&state, &alice).await, 0);

    let status = conversations::mark_read(
        State(state.clone()),
        Path(conversation_id),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(total_unread(&state, &bob).await, 0);

    let Json(edited) = messages::patch_message(
        State(state.clone()),
        Path(sent.id),
        Extension(alice.clone()),
        Json(MessageAction::Edit {
            content: "Hello again".into(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(edited.content.as_deref(), Some("Hello again"));
    assert!(edited.is_edited);

    let status = messages::delete_message(
        State(state.clone()),
        Path(sent.id),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let Json(tombstone) = messages::get_message_full(
        State(state.clone()),
        Path(sent.id),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert!(tombstone.is_deleted);
    assert_eq!(tombstone.content, None);

    // Deleting a tombstone again stays a no-op.
    let status = messages::delete_message(
        State(state.clone()),
        Path(sent.id),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn start_direct_is_idempotent_and_rejects_self() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");

    let (status, Json(first)) = chat::start_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Json(StartDirectRequest {
            target_user_id: bob.sub,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);

    // Bob starting from the other side lands on the same conversation.
    let (status, Json(second)) = chat::start_direct(
        State(state.clone()),
        Extension(bob.clone()),
        Json(StartDirectRequest {
            target_user_id: alice.sub,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first.id, second.id);

    let err = chat::start_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Json(StartDirectRequest {
            target_user_id: alice.sub,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn direct_summary_uses_the_other_participants_profile() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;
    send_text(&state, &alice, conversation_id, "a very long greeting that certainly exceeds the preview limit of fifty characters").await;

    let Json(listed) = conversations::list_conversations(
        State(state.clone()),
        Query(ListConversationsQuery {
            filter: ConversationFilter::All,
        }),
        Extension(alice.clone()),
    )
    .await
    .unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name.as_deref(), Some("bob"));
    let preview = listed[0].last_message_preview.as_deref().unwrap();
    assert_eq!(preview.chars().count(), 50);
}

#[tokio::test]
async fn unread_filter_keeps_only_conversations_with_unread() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let carol = register(&state, "carol");

    let with_bob = direct(&state, &alice, &bob).await;
    let with_carol = direct(&state, &alice, &carol).await;
    send_text(&state, &bob, with_bob, "unread one").await;
    send_text(&state, &carol, with_carol, "soon read").await;

    conversations::mark_read(
        State(state.clone()),
        Path(with_carol),
        Extension(alice.clone()),
    )
    .await
    .unwrap();

    let Json(listed) = conversations::list_conversations(
        State(state.clone()),
        Query(ListConversationsQuery {
            filter: ConversationFilter::Unread,
        }),
        Extension(alice.clone()),
    )
    .await
    .unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, with_bob);
    assert_eq!(listed[0].unread_count, 1);
}

#[tokio::test]
async fn read_receipts_appear_after_mark_read() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;
    let sent = send_text(&state, &alice, conversation_id, "seen yet?").await;
    assert!(sent.read_by.is_empty());

    conversations::mark_read(
        State(state.clone()),
        Path(conversation_id),
        Extension(bob.clone()),
    )
    .await
    .unwrap();

    let Json(page) = messages::get_messages(
        State(state.clone()),
        Path(conversation_id),
        Query(ListMessagesQuery {
            limit: 50,
            before: None,
        }),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].read_by, vec![bob.sub]);
}

#[tokio::test]
async fn outsiders_are_rejected_across_the_surface() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let mallory = register(&state, "mallory");
    let conversation_id = direct(&state, &alice, &bob).await;
    let sent = send_text(&state, &alice, conversation_id, "private").await;

    let err = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(mallory.clone()),
        Json(SendMessageRequest {
            content: Some("let me in".into()),
            media: vec![],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let err = messages::get_messages(
        State(state.clone()),
        Path(conversation_id),
        Query(ListMessagesQuery {
            limit: 50,
            before: None,
        }),
        Extension(mallory.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let err = reactions::toggle_reaction(
        State(state.clone()),
        Path(sent.id),
        Extension(mallory.clone()),
        Json(ToggleReactionRequest { emoji: "👍".into() }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let err = chat::search_messages(
        State(state.clone()),
        Query(SearchQuery {
            q: "private".into(),
            conversation_id: Some(conversation_id),
            limit: None,
        }),
        Extension(mallory.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
}

#[tokio::test]
async fn edit_is_sender_only_and_window_bound() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;
    let sent = send_text(&state, &alice, conversation_id, "typo herr").await;

    let err = messages::patch_message(
        State(state.clone()),
        Path(sent.id),
        Extension(bob.clone()),
        Json(MessageAction::Edit {
            content: "hijacked".into(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    // Backdated row: created past the window, so the edit is refused
    // no matter what the client believes.
    let stale_id = Uuid::new_v4();
    state
        .db
        .insert_message(
            &NewMessage {
                id: &stale_id.to_string(),
                conversation_id: &conversation_id.to_string(),
                sender_id: &alice.sub.to_string(),
                ciphertext: Some(b"sealed"),
                nonce: Some(&[0u8; 12]),
                kind: "text",
                reply_to_id: None,
                now: &format_ts(Utc::now() - Duration::minutes(11)),
            },
            &[],
        )
        .unwrap();

    let err = messages::patch_message(
        State(state.clone()),
        Path(stale_id),
        Extension(alice.clone()),
        Json(MessageAction::Edit {
            content: "too late".into(),
        }),
    )
    .await
    .unwrap_err();
    match err {
        ApiError::Validation(msg) => assert!(msg.contains("window")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn pinning_is_admin_only_in_groups_but_open_in_directs() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let carol = register(&state, "carol");

    let (_, Json(group)) = conversations::create_group(
        State(state.clone()),
        Extension(alice.clone()),
        Json(CreateGroupRequest {
            name: Some("plans".into()),
            participant_ids: vec![bob.sub, carol.sub],
        }),
    )
    .await
    .unwrap();
    let sent = send_text(&state, &bob, group.id, "pin me").await;

    let err = messages::patch_message(
        State(state.clone()),
        Path(sent.id),
        Extension(bob.clone()),
        Json(MessageAction::Pin),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let Json(pinned) = messages::patch_message(
        State(state.clone()),
        Path(sent.id),
        Extension(alice.clone()),
        Json(MessageAction::Pin),
    )
    .await
    .unwrap();
    assert!(pinned.is_pinned);

    // Direct chats have no admin; either side may pin.
    let dm = direct(&state, &alice, &bob).await;
    let dm_message = send_text(&state, &alice, dm, "note").await;
    let Json(pinned) = messages::patch_message(
        State(state.clone()),
        Path(dm_message.id),
        Extension(bob.clone()),
        Json(MessageAction::Pin),
    )
    .await
    .unwrap();
    assert!(pinned.is_pinned);
}

#[tokio::test]
async fn group_creation_validates_membership() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");

    // Creator and duplicates collapse; one remaining member is not
    // enough for a group.
    let err = conversations::create_group(
        State(state.clone()),
        Extension(alice.clone()),
        Json(CreateGroupRequest {
            name: None,
            participant_ids: vec![alice.sub, bob.sub, bob.sub],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn reaction_toggle_follows_the_toggle_law() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;
    let sent = send_text(&state, &alice, conversation_id, "react to me").await;

    let toggle = |who: Claims, emoji: &str| {
        let state = state.clone();
        let emoji = emoji.to_string();
        async move {
            reactions::toggle_reaction(
                State(state),
                Path(sent.id),
                Extension(who),
                Json(ToggleReactionRequest { emoji }),
            )
            .await
            .map(|Json(r)| r.outcome)
        }
    };

    assert_eq!(toggle(bob.clone(), "👍").await.unwrap(), ToggleOutcome::Added);
    assert_eq!(
        toggle(bob.clone(), "❤️").await.unwrap(),
        ToggleOutcome::Updated
    );
    assert_eq!(
        toggle(bob.clone(), "❤️").await.unwrap(),
        ToggleOutcome::Removed
    );

    let err = toggle(bob.clone(), "🦀").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn messages_need_content_or_media() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;

    let err = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: Some("   ".into()),
            media: vec![],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn media_only_message_stores_blob_urls() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;

    let (status, Json(message)) = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: None,
            media: vec![NewMediaItem {
                data: B64.encode(b"png bytes"),
                kind: MediaKind::Image,
                content_type: "image/png".into(),
                filename: "photo.png".into(),
                width: Some(640),
                height: Some(480),
                duration_secs: None,
            }],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message.kind, MessageKind::Media);
    assert_eq!(message.content, None);
    assert_eq!(message.media.len(), 1);
    assert!(message.media[0].url.starts_with("null://"));
    assert_eq!(message.media[0].size_bytes, 9);

    let err = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: None,
            media: vec![NewMediaItem {
                data: "not base64 !!!".into(),
                kind: MediaKind::Image,
                content_type: "image/png".into(),
                filename: "bad.png".into(),
                width: None,
                height: None,
                duration_secs: None,
            }],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn failed_send_releases_already_uploaded_blobs() {
    let blobs = Arc::new(SingleSlotBlobStore::default());
    let state = test_state_with_blobs(blobs.clone());
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;

    let item = |name: &str| NewMediaItem {
        data: B64.encode(b"bytes"),
        kind: MediaKind::Image,
        content_type: "image/png".into(),
        filename: name.into(),
        width: None,
        height: None,
        duration_secs: None,
    };

    // Second upload fails; the first must be released again.
    let err = messages::send_message(
        State(state.clone()),
        Path(conversation_id),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: None,
            media: vec![item("a.png"), item("b.png")],
            reply_to_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Persistence(_)));

    let stored = blobs.stored.lock().unwrap().clone();
    let deleted = blobs.deleted.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored, deleted);
}

#[tokio::test]
async fn replies_must_target_the_same_conversation() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let carol = register(&state, "carol");
    let with_bob = direct(&state, &alice, &bob).await;
    let with_carol = direct(&state, &alice, &carol).await;
    let elsewhere = send_text(&state, &alice, with_carol, "over here").await;

    let err = messages::send_message(
        State(state.clone()),
        Path(with_bob),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: Some("cross-link".into()),
            media: vec![],
            reply_to_id: Some(elsewhere.id),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let target = send_text(&state, &alice, with_bob, "original").await;
    let (_, Json(reply)) = messages::send_message(
        State(state.clone()),
        Path(with_bob),
        Extension(bob.clone()),
        Json(SendMessageRequest {
            content: Some("replying".into()),
            media: vec![],
            reply_to_id: Some(target.id),
        }),
    )
    .await
    .unwrap();
    let preview = reply.reply_to.unwrap();
    assert_eq!(preview.id, target.id);
    assert_eq!(preview.content.as_deref(), Some("original"));
}

#[tokio::test]
async fn search_is_case_insensitive_and_needs_two_chars() {
    let state = test_state();
    let alice = register(&state, "alice");
    let bob = register(&state, "bob");
    let conversation_id = direct(&state, &alice, &bob).await;
    send_text(&state, &alice, conversation_id, "The quick brown fox").await;
    send_text(&state, &bob, conversation_id, "nothing to see").await;

    let Json(hits) = chat::search_messages(
        State(state.clone()),
        Query(SearchQuery {
            q: "QUICK".into(),
            conversation_id: None,
            limit: None,
        }),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content.as_deref(), Some("The quick brown fox"));

    let Json(hits) = chat::search_messages(
        State(state.clone()),
        Query(SearchQuery {
            q: "q".into(),
            conversation_id: None,
            limit: None,
        }),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert!(hits.is_empty());
}
