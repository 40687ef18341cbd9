//! Presence Tracker: turns connection-count edges into presence events.
//!
//! The Session Directory reports an edge only when a user's live
//! connection count crosses 0, so a multi-tab user stays online until
//! their last tab closes. Each edge carries a per-user sequence number
//! taken under the directory lock; the tracker drops any edge older
//! than the latest one it has broadcast, so a reconnect that races a
//! disconnect can never leave watchers showing the stale state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::ServerEvent;
use crate::router::Router;
use crate::session::{PresenceEdge, PresenceTransition, UserId};
use crate::store::ChatStore;

pub struct PresenceTracker {
    router: Arc<Router>,
    store: Arc<ChatStore>,
    last_broadcast: Mutex<HashMap<UserId, u64>>,
}

impl PresenceTracker {
    pub fn new(router: Arc<Router>, store: Arc<ChatStore>) -> Self {
        Self {
            router,
            store,
            last_broadcast: Mutex::new(HashMap::new()),
        }
    }

    /// Broadcast a presence edge and persist it.
    ///
    /// Edges older than the latest broadcast for that user are dropped.
    /// The broadcast happens under the per-tracker mutex so a user's
    /// edges reach watchers in sequence order; persistence runs after,
    /// and is skipped if a newer edge has been broadcast in between.
    pub async fn transition(&self, edge: PresenceEdge) -> Result<()> {
        let is_online = matches!(edge.transition, PresenceTransition::Online);
        {
            let mut last = self.last_broadcast.lock();
            let seen = last.entry(edge.user_id).or_insert(0);
            if edge.seq <= *seen {
                tracing::debug!(
                    "presence: dropping stale edge for {} (seq {} <= {})",
                    edge.user_id,
                    edge.seq,
                    seen
                );
                return Ok(());
            }
            *seen = edge.seq;

            info!(
                "presence: user {} is now {}",
                edge.user_id,
                if is_online { "online" } else { "offline" }
            );
            let delivered = self.router.broadcast_all(ServerEvent::PresenceChanged {
                user_id: edge.user_id,
                is_online,
                timestamp: Utc::now(),
            });
            tracing::debug!(
                "presence change for {} reached {} connections",
                edge.user_id,
                delivered
            );
        }

        // Only the still-latest edge gets persisted.
        if self.last_broadcast.lock().get(&edge.user_id) != Some(&edge.seq) {
            return Ok(());
        }
        if let Err(e) = self.store.set_presence(edge.user_id, is_online).await {
            warn!("failed to persist presence for {}: {}", edge.user_id, e);
            return Err(e);
        }
        Ok(())
    }
}
