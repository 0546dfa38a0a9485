use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready,
/// then the event loop until disconnect.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with a valid token
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Ok(ready_text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_text.into())).await.is_err() {
        return;
    }

    let conn_id = Uuid::new_v4();

    // Flush current presence so this client sees who is already here
    for (online_id, online_name) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: online_id,
            username: online_name,
            online: true,
        };
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    dispatcher.user_online(user_id, username.clone(), conn_id).await;

    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection conversation subscriptions, shared between the
    // send task (filtering) and the recv task (updates).
    let subscriptions: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    // Events addressed to this connection alone (typing replay on
    // subscribe), bypassing the subscription filter.
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts the connection is subscribed to, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let deliver = match send_subscriptions.read() {
                        Ok(subscribed) => should_deliver(&event, &subscribed),
                        // Poisoned lock: the connection state is gone,
                        // tear down.
                        Err(_) => break,
                    };
                    if !deliver {
                        continue;
                    }

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                maybe_direct = direct_rx.recv() => {
                    let Some(event) = maybe_direct else { break; };
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let recv_dispatcher = dispatcher.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    let Ok(command) = serde_json::from_str::<GatewayCommand>(&text) else {
                        warn!("Unparseable gateway command from {}", user_id);
                        continue;
                    };
                    handle_command(
                        command,
                        &recv_dispatcher,
                        &db,
                        &subscriptions,
                        &direct_tx,
                        user_id,
                        &recv_username,
                    )
                    .await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever task finishes first tears the connection down
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Conversation-scoped events go only to subscribers; global events
/// (Ready, PresenceUpdate) pass through.
fn should_deliver(event: &GatewayEvent, subscriptions: &HashSet<Uuid>) -> bool {
    match event.conversation_id() {
        Some(conversation_id) => subscriptions.contains(&conversation_id),
        None => true,
    }
}

async fn handle_command(
    command: GatewayCommand,
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    subscriptions: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
    direct_tx: &mpsc::UnboundedSender<GatewayEvent>,
    user_id: Uuid,
    username: &str,
) {
    match command {
        // Identify after the handshake is a no-op
        GatewayCommand::Identify { .. } => {}

        GatewayCommand::Subscribe { conversation_ids } => {
            let allowed = filter_memberships(db, user_id, conversation_ids).await;
            if let Ok(mut subscribed) = subscriptions.write() {
                subscribed.extend(allowed.iter().copied());
            }

            // Replay in-flight typing indicators to the new subscriber,
            // the same way presence is flushed at connect.
            for conversation_id in allowed {
                for (typist_id, typist_name) in dispatcher.typing_users(conversation_id).await {
                    let _ = direct_tx.send(GatewayEvent::Typing {
                        conversation_id,
                        user_id: typist_id,
                        username: typist_name,
                        is_typing: true,
                        at: Utc::now(),
                    });
                }
            }
        }

        GatewayCommand::Unsubscribe { conversation_ids } => {
            if let Ok(mut subscribed) = subscriptions.write() {
                for conversation_id in conversation_ids {
                    subscribed.remove(&conversation_id);
                }
            }
        }

        GatewayCommand::TypingStart { conversation_id } => {
            if is_subscribed(subscriptions, conversation_id) {
                dispatcher
                    .typing_start(conversation_id, user_id, username.to_string())
                    .await;
            }
        }

        GatewayCommand::TypingStop { conversation_id } => {
            if is_subscribed(subscriptions, conversation_id) {
                dispatcher
                    .typing_stop(conversation_id, user_id, username.to_string())
                    .await;
            }
        }
    }
}

fn is_subscribed(
    subscriptions: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
    conversation_id: Uuid,
) -> bool {
    subscriptions
        .read()
        .map(|subscribed| subscribed.contains(&conversation_id))
        .unwrap_or(false)
}

/// Drop requested conversation ids the user does not participate in;
/// the fan-out only ever reaches participants.
async fn filter_memberships(
    db: &Arc<Database>,
    user_id: Uuid,
    conversation_ids: Vec<Uuid>,
) -> Vec<Uuid> {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let uid = user_id.to_string();
        conversation_ids
            .into_iter()
            .filter(|conversation_id| {
                db.is_participant(&conversation_id.to_string(), &uid)
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>()
    })
    .await;

    match result {
        Ok(allowed) => allowed,
        Err(e) => {
            warn!("membership check task failed: {}", e);
            vec![]
        }
    }
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text)
        else {
            continue;
        };

        let token_data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;

        return Some((token_data.claims.sub, token_data.claims.username));
    }
    None
}
