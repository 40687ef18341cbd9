//! Typing Indicator Coordinator.
//!
//! Ephemeral, never persisted. Room-scoped indicators go to every
//! subscriber except the typist's own connection; private-scoped ones go
//! to the peer's connections only. An optional debounce window can
//! suppress repeats of the same boolean; it defaults to off so the
//! per-keystroke timing clients expect is unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::ServerEvent;
use crate::router::Router;
use crate::session::{ConnId, RoomId, UserId};

/// Where a typing indicator is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypingScope {
    Room(RoomId),
    User(UserId),
}

pub struct TypingCoordinator {
    router: Arc<Router>,
    debounce: Duration,
    recent: Mutex<HashMap<(UserId, TypingScope), (bool, Instant)>>,
}

impl TypingCoordinator {
    pub fn new(router: Arc<Router>, debounce: Duration) -> Self {
        Self {
            router,
            debounce,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Relay a typing state to its target set. Returns deliveries made.
    pub fn set_typing(
        &self,
        origin: ConnId,
        user_id: UserId,
        username: &str,
        scope: TypingScope,
        is_typing: bool,
    ) -> usize {
        if self.suppressed(user_id, scope, is_typing) {
            return 0;
        }

        let event = ServerEvent::TypingStatus {
            user_id,
            username: username.to_string(),
            is_typing,
        };
        match scope {
            TypingScope::Room(room_id) => {
                self.router.deliver_to_room_except(room_id, origin, event)
            }
            TypingScope::User(peer_id) => self.router.deliver_to_user(peer_id, event),
        }
    }

    fn suppressed(&self, user_id: UserId, scope: TypingScope, is_typing: bool) -> bool {
        if self.debounce.is_zero() {
            return false;
        }
        let now = Instant::now();
        let mut recent = self.recent.lock();
        if let Some((last_state, at)) = recent.get(&(user_id, scope)) {
            if *last_state == is_typing && now.duration_since(*at) < self.debounce {
                return true;
            }
        }
        recent.insert((user_id, scope), (is_typing, now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionDirectory;
    use tokio::sync::mpsc;

    fn setup(debounce: Duration) -> (Arc<SessionDirectory>, TypingCoordinator) {
        let directory = Arc::new(SessionDirectory::new());
        let router = Arc::new(Router::new(directory.clone()));
        (directory.clone(), TypingCoordinator::new(router, debounce))
    }

    #[tokio::test]
    async fn room_typing_skips_originator_and_relays_verbatim() {
        let (dir, typing) = setup(Duration::ZERO);
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (c1, c2) = (ConnId::new(), ConnId::new());
        dir.register(c1, 1, tx1);
        dir.register(c2, 2, tx2);
        dir.subscribe(c1, 9).unwrap();
        dir.subscribe(c2, 9).unwrap();

        assert_eq!(typing.set_typing(c1, 1, "ana", TypingScope::Room(9), true), 1);
        match rx2.recv().await {
            Some(ServerEvent::TypingStatus {
                user_id,
                username,
                is_typing,
            }) => {
                assert_eq!(user_id, 1);
                assert_eq!(username, "ana");
                assert!(is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx1.try_recv().is_err(), "typist must not hear themselves");

        // The false state is relayed just as verbatim.
        assert_eq!(typing.set_typing(c1, 1, "ana", TypingScope::Room(9), false), 1);
        assert!(matches!(
            rx2.recv().await,
            Some(ServerEvent::TypingStatus { is_typing: false, .. })
        ));
    }

    #[tokio::test]
    async fn private_typing_goes_to_peer_only() {
        let (dir, typing) = setup(Duration::ZERO);
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (c1, c2) = (ConnId::new(), ConnId::new());
        dir.register(c1, 1, tx1);
        dir.register(c2, 2, tx2);

        assert_eq!(typing.set_typing(c1, 1, "ana", TypingScope::User(2), true), 1);
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn debounce_suppresses_repeats_of_same_state() {
        let (dir, typing) = setup(Duration::from_millis(300));
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (c1, c2) = (ConnId::new(), ConnId::new());
        dir.register(c1, 1, tx1);
        dir.register(c2, 2, tx2);
        dir.subscribe(c1, 9).unwrap();
        dir.subscribe(c2, 9).unwrap();

        assert_eq!(typing.set_typing(c1, 1, "ana", TypingScope::Room(9), true), 1);
        assert_eq!(
            typing.set_typing(c1, 1, "ana", TypingScope::Room(9), true),
            0,
            "same state within the window is dropped"
        );
        // A state change always goes through.
        assert_eq!(typing.set_typing(c1, 1, "ana", TypingScope::Room(9), false), 1);

        assert!(rx2.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }
}
