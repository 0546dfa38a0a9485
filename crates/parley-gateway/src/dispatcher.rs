use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Typing announcements expire after this long without a refresh.
/// Clients apply the same TTL on their side; the server prunes its
/// ephemeral map so late subscribers never see stale typists.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// Manages connected clients, presence and typing state, and
/// broadcasts events to subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast bus — every connection receives every event and
    /// filters by its own subscription set.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Online users: user_id -> (owning connection id, username).
    /// The connection id guards against a reconnect racing the old
    /// connection's teardown.
    online_users: RwLock<HashMap<Uuid, (Uuid, String)>>,

    /// Ephemeral typing state: conversation -> user -> (username, last
    /// refresh). Usernames are kept so current typists can be replayed
    /// to a connection that subscribes mid-indicator.
    typing: RwLock<HashMap<Uuid, HashMap<Uuid, (String, Instant)>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                typing: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a user as online under the given connection id.
    pub async fn user_online(&self, user_id: Uuid, username: String, conn_id: Uuid) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, (conn_id, username.clone()));

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: true,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id still
    /// owns the presence entry — a newer connection keeps it.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let username = {
            let mut online = self.inner.online_users.write().await;
            match online.get(&user_id) {
                Some((owner, _)) if *owner == conn_id => {
                    online.remove(&user_id).map(|(_, name)| name)
                }
                _ => return,
            }
        };

        // Drop any typing entries the user left behind.
        {
            let mut typing = self.inner.typing.write().await;
            for participants in typing.values_mut() {
                participants.remove(&user_id);
            }
            typing.retain(|_, participants| !participants.is_empty());
        }

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username: username.unwrap_or_default(),
            online: false,
        });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, (_, name))| (*id, name.clone()))
            .collect()
    }

    /// Record and broadcast a typing announcement. Repeated calls act
    /// as the client-managed heartbeat refreshing the TTL.
    pub async fn typing_start(&self, conversation_id: Uuid, user_id: Uuid, username: String) {
        {
            let mut typing = self.inner.typing.write().await;
            typing
                .entry(conversation_id)
                .or_default()
                .insert(user_id, (username.clone(), Instant::now()));
        }

        self.broadcast(GatewayEvent::Typing {
            conversation_id,
            user_id,
            username,
            is_typing: true,
            at: Utc::now(),
        });
    }

    /// Explicit stop: clear the entry and tell subscribers.
    pub async fn typing_stop(&self, conversation_id: Uuid, user_id: Uuid, username: String) {
        {
            let mut typing = self.inner.typing.write().await;
            if let Some(participants) = typing.get_mut(&conversation_id) {
                participants.remove(&user_id);
                if participants.is_empty() {
                    typing.remove(&conversation_id);
                }
            }
        }

        self.broadcast(GatewayEvent::Typing {
            conversation_id,
            user_id,
            username,
            is_typing: false,
            at: Utc::now(),
        });
    }

    /// Users currently typing in a conversation, pruning entries whose
    /// TTL elapsed without a refresh. Called when a connection
    /// subscribes, so late subscribers see in-flight indicators.
    pub async fn typing_users(&self, conversation_id: Uuid) -> Vec<(Uuid, String)> {
        let mut typing = self.inner.typing.write().await;
        let Some(participants) = typing.get_mut(&conversation_id) else {
            return vec![];
        };

        participants.retain(|_, (_, refreshed)| refreshed.elapsed() < TYPING_TTL);
        let users: Vec<(Uuid, String)> = participants
            .iter()
            .map(|(id, (name, _))| (*id, name.clone()))
            .collect();
        if users.is_empty() {
            typing.remove(&conversation_id);
        }
        users
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
