//! Server configuration and shared handler state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::presence::PresenceTracker;
use crate::router::Router;
use crate::session::SessionDirectory;
use crate::store::ChatStore;
use crate::typing::TypingCoordinator;

/// Configuration for the relay chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Base data directory
    pub data_dir: PathBuf,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Port to bind
    pub port: u16,
    /// Capacity of each connection's outbound event buffer
    pub channel_capacity: usize,
    /// Suppress repeated identical typing states within this window.
    /// Zero disables debouncing.
    pub typing_debounce: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("relay_data");
        Self {
            db_path: data_dir.join("chat.sqlite"),
            data_dir,
            port: 3001,
            channel_capacity: 64,
            typing_debounce: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    /// Build config from the environment (`RELAY_ROOT`, `PORT`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("RELAY_ROOT") {
            config.data_dir = PathBuf::from(root);
            config.db_path = config.data_dir.join("chat.sqlite");
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        config
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<ChatStore>,
    pub auth: Arc<AuthManager>,
    pub directory: Arc<SessionDirectory>,
    pub router: Arc<Router>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingCoordinator>,
}
