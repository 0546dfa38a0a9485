use std::sync::Arc;

use parley_crypto::MessageCodec;
use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;

use crate::collab::{BlobStore, Notifier};

pub type AppState = Arc<AppStateInner>;

/// Explicitly constructed shared state — every component receives its
/// handles through here, no ambient globals.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub codec: MessageCodec,
    pub dispatcher: Dispatcher,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub jwt_secret: String,
}
