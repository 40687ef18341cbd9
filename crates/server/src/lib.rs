//! Relay Chat Server Library
//!
//! Real-time room/presence fan-out core behind an axum HTTP + WebSocket
//! edge: a session directory tracks live connections and subscriptions,
//! a presence tracker turns connection-count edges into broadcasts, and
//! a router fans newly stored messages out to exactly the live
//! connections that should see them.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod router;
pub mod session;
pub mod store;
pub mod typing;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, routing::post, Router as AxumRouter};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use auth::AuthManager;
use config::{AppState, ServerConfig};
use handlers::{create_room, join_room, login, online_users, signup};
use presence::PresenceTracker;
use router::Router;
use session::SessionDirectory;
use store::ChatStore;
use typing::TypingCoordinator;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Relay Chat Server ===");
    info!("Features: Auth | Rooms | Private Messages | Presence | Typing");

    let config = ServerConfig::from_env();
    config.ensure_dirs().await?;
    info!("Data directory: {:?}", config.data_dir);

    // Persisted store (external collaborator of the fan-out core)
    let store = Arc::new(ChatStore::new(&config.db_path).await?);

    // Auth boundary
    let auth = Arc::new(AuthManager::new(store.clone()));
    info!("Auth Manager initialized");

    // Fan-out core: directory -> router -> presence/typing
    let directory = Arc::new(SessionDirectory::new());
    let router = Arc::new(Router::new(directory.clone()));
    let presence = Arc::new(PresenceTracker::new(router.clone(), store.clone()));
    let typing = Arc::new(TypingCoordinator::new(
        router.clone(),
        config.typing_debounce,
    ));
    info!("Session Directory initialized");

    let app_state = AppState {
        config: config.clone(),
        store,
        auth,
        directory,
        router,
        presence,
        typing,
    };

    let app = AxumRouter::new()
        // Auth endpoints
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        // Room membership (authorization source for socket subscribes)
        .route("/rooms", post(create_room))
        .route("/rooms/{room_id}/join", post(join_room))
        // Presence snapshot
        .route("/presence", get(online_users))
        // Real-time event channel
        .route("/ws", get(ws::ws_handler))
        // Health check
        .route("/health", get(health_check))
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Relay Chat Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - Relay Chat Server"
}
