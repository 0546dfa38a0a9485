mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::collab::{BlobStore, HttpBlobStore, HttpNotifier, LogNotifier, Notifier, NullBlobStore};
use parley_api::middleware::require_auth;
use parley_api::state::{AppState, AppStateInner};
use parley_api::{chat, conversations, messages, reactions};
use parley_crypto::MessageCodec;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&config.db_path))?);
    let codec = MessageCodec::new(&config.message_key);
    let dispatcher = Dispatcher::new();

    let blobs: Arc<dyn BlobStore> = match &config.blob_url {
        Some(url) => Arc::new(HttpBlobStore::new(url.clone())),
        None => Arc::new(NullBlobStore),
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        codec,
        dispatcher,
        blobs,
        notifier,
        jwt_secret: config.jwt_secret.clone(),
    });

    // Routes
    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_group),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(conversations::mark_read),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}/full", get(messages::get_message_full))
        .route(
            "/messages/{message_id}",
            patch(messages::patch_message).delete(messages::delete_message),
        )
        .route(
            "/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/chat/start", post(chat::start_direct))
        .route("/chat/search", get(chat::search_messages))
        .route("/chat/unread-count", get(chat::unread_count))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // The gateway authenticates in-band via Identify, not via the
    // bearer middleware.
    let app = Router::new()
        .merge(protected_routes)
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
