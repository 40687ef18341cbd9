//! Session Directory: the in-memory registry of live connections.
//!
//! Sole owner of who is connected, which user each connection belongs
//! to, and which rooms each connection is subscribed to. Everything
//! lives under a single lock so a connection-count mutation and the
//! presence edge it implies are one atomic step: there is no window
//! where a user has zero connections but still reads as online.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ServerEvent;

pub type UserId = i64;
pub type RoomId = i64;

/// Opaque identifier for one transport-level link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded outbound channel into one connection's writer task.
pub type Outbound = mpsc::Sender<ServerEvent>;

/// Edge crossing of a user's live-connection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    Online,
    Offline,
}

/// A presence edge as observed inside the directory's write lock.
///
/// `seq` increases per user with every edge, taken in the same atomic
/// step as the connection-count mutation. The Presence Tracker uses it
/// to discard an edge that another task has already superseded, so a
/// reconnect race can never broadcast a stale state last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEdge {
    pub user_id: UserId,
    pub transition: PresenceTransition,
    pub seq: u64,
}

struct ConnEntry {
    user_id: UserId,
    rooms: HashSet<RoomId>,
    outbound: Outbound,
}

#[derive(Default)]
struct DirectoryInner {
    conns: HashMap<ConnId, ConnEntry>,
    users: HashMap<UserId, HashSet<ConnId>>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
    presence_seq: HashMap<UserId, u64>,
}

impl DirectoryInner {
    fn next_edge(&mut self, user_id: UserId, transition: PresenceTransition) -> PresenceEdge {
        let seq = self.presence_seq.entry(user_id).or_insert(0);
        *seq += 1;
        PresenceEdge {
            user_id,
            transition,
            seq: *seq,
        }
    }
}

/// In-memory source of truth for live subscriptions. The store's
/// membership table is the authorization source checked at subscribe
/// time; it is never consulted per delivery.
pub struct SessionDirectory {
    inner: RwLock<DirectoryInner>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DirectoryInner::default()),
        }
    }

    /// Bind a connection to an authenticated user identity.
    ///
    /// Returns an `Online` edge iff this is the user's first live
    /// connection. Registering an already-known connection is a no-op.
    pub fn register(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        outbound: Outbound,
    ) -> Option<PresenceEdge> {
        let inner = &mut *self.inner.write();
        if inner.conns.contains_key(&conn_id) {
            return None;
        }
        inner.conns.insert(
            conn_id,
            ConnEntry {
                user_id,
                rooms: HashSet::new(),
                outbound,
            },
        );
        let conns = inner.users.entry(user_id).or_default();
        conns.insert(conn_id);
        let first = conns.len() == 1;
        first.then(|| inner.next_edge(user_id, PresenceTransition::Online))
    }

    /// Remove a connection and all of its subscriptions.
    ///
    /// Returns an `Offline` edge for the owning user iff this was the
    /// user's last live connection.
    pub fn unregister(&self, conn_id: ConnId) -> Option<PresenceEdge> {
        let inner = &mut *self.inner.write();
        let entry = inner.conns.remove(&conn_id)?;
        for room_id in &entry.rooms {
            if let Some(subs) = inner.rooms.get_mut(room_id) {
                subs.remove(&conn_id);
                if subs.is_empty() {
                    inner.rooms.remove(room_id);
                }
            }
        }
        let last = match inner.users.get_mut(&entry.user_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                conns.is_empty()
            }
            None => false,
        };
        if last {
            inner.users.remove(&entry.user_id);
            Some(inner.next_edge(entry.user_id, PresenceTransition::Offline))
        } else {
            None
        }
    }

    /// Subscribe a connection to a room. Idempotent.
    pub fn subscribe(&self, conn_id: ConnId, room_id: RoomId) -> Result<()> {
        let inner = &mut *self.inner.write();
        let entry = inner.conns.get_mut(&conn_id).ok_or(Error::Unauthenticated)?;
        if entry.rooms.insert(room_id) {
            inner.rooms.entry(room_id).or_default().insert(conn_id);
        }
        Ok(())
    }

    /// Unsubscribe a connection from a room. Unsubscribing a room that
    /// was never subscribed is a no-op, not an error.
    pub fn unsubscribe(&self, conn_id: ConnId, room_id: RoomId) -> Result<()> {
        let inner = &mut *self.inner.write();
        let entry = inner.conns.get_mut(&conn_id).ok_or(Error::Unauthenticated)?;
        if entry.rooms.remove(&room_id) {
            if let Some(subs) = inner.rooms.get_mut(&room_id) {
                subs.remove(&conn_id);
                if subs.is_empty() {
                    inner.rooms.remove(&room_id);
                }
            }
        }
        Ok(())
    }

    /// Snapshot of a user's connections with their outbound channels.
    pub fn connections_for(&self, user_id: UserId) -> Vec<(ConnId, Outbound)> {
        let inner = self.inner.read();
        match inner.users.get(&user_id) {
            Some(conns) => conns
                .iter()
                .filter_map(|id| inner.conns.get(id).map(|e| (*id, e.outbound.clone())))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of a room's subscribed connections.
    pub fn subscribers_of(&self, room_id: RoomId) -> Vec<(ConnId, Outbound)> {
        let inner = self.inner.read();
        match inner.rooms.get(&room_id) {
            Some(subs) => subs
                .iter()
                .filter_map(|id| inner.conns.get(id).map(|e| (*id, e.outbound.clone())))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of every live connection (presence broadcasts).
    pub fn all_connections(&self) -> Vec<(ConnId, Outbound)> {
        let inner = self.inner.read();
        inner
            .conns
            .iter()
            .map(|(id, e)| (*id, e.outbound.clone()))
            .collect()
    }

    /// Users with at least one live connection.
    pub fn online_users(&self) -> Vec<UserId> {
        self.inner.read().users.keys().copied().collect()
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .read()
            .users
            .get(&user_id)
            .map_or(0, |conns| conns.len())
    }
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> Outbound {
        let (tx, rx) = mpsc::channel(8);
        // Keep the receiver alive for the test's duration by leaking it;
        // these tests only inspect directory state.
        std::mem::forget(rx);
        tx
    }

    #[test]
    fn online_iff_connection_count_positive() {
        let dir = SessionDirectory::new();
        let (c1, c2) = (ConnId::new(), ConnId::new());

        let edge = dir.register(c1, 1, outbound()).unwrap();
        assert_eq!(edge.transition, PresenceTransition::Online);
        assert_eq!(dir.register(c2, 1, outbound()), None);
        assert_eq!(dir.connection_count(1), 2);
        assert!(dir.online_users().contains(&1));

        assert_eq!(dir.unregister(c1), None);
        assert_eq!(dir.connection_count(1), 1);
        assert!(dir.online_users().contains(&1));

        let edge = dir.unregister(c2).unwrap();
        assert_eq!(edge.user_id, 1);
        assert_eq!(edge.transition, PresenceTransition::Offline);
        assert_eq!(dir.connection_count(1), 0);
        assert!(dir.online_users().is_empty());
    }

    #[test]
    fn presence_edges_are_sequenced_per_user() {
        let dir = SessionDirectory::new();
        let (c1, c2, c3) = (ConnId::new(), ConnId::new(), ConnId::new());

        let online = dir.register(c1, 1, outbound()).unwrap();
        let offline = dir.unregister(c1).unwrap();
        let online_again = dir.register(c2, 1, outbound()).unwrap();
        assert!(online.seq < offline.seq);
        assert!(offline.seq < online_again.seq);

        // Another user's edges count independently.
        let other = dir.register(c3, 2, outbound()).unwrap();
        assert_eq!(other.seq, 1);
    }

    #[test]
    fn register_is_idempotent_per_connection() {
        let dir = SessionDirectory::new();
        let c1 = ConnId::new();
        assert!(dir.register(c1, 1, outbound()).is_some());
        assert!(dir.register(c1, 1, outbound()).is_none());
        assert_eq!(dir.connection_count(1), 1);
    }

    #[test]
    fn subscribe_twice_same_as_once() {
        let dir = SessionDirectory::new();
        let c1 = ConnId::new();
        dir.register(c1, 1, outbound());

        dir.subscribe(c1, 10).unwrap();
        dir.subscribe(c1, 10).unwrap();
        assert_eq!(dir.subscribers_of(10).len(), 1);

        dir.unsubscribe(c1, 10).unwrap();
        dir.unsubscribe(c1, 10).unwrap();
        assert!(dir.subscribers_of(10).is_empty());
    }

    #[test]
    fn operations_on_unknown_connection_are_unauthenticated() {
        let dir = SessionDirectory::new();
        let ghost = ConnId::new();
        assert!(matches!(
            dir.subscribe(ghost, 1),
            Err(Error::Unauthenticated)
        ));
        assert!(matches!(
            dir.unsubscribe(ghost, 1),
            Err(Error::Unauthenticated)
        ));
        assert!(dir.unregister(ghost).is_none());
    }

    #[test]
    fn unregister_drops_room_subscriptions() {
        let dir = SessionDirectory::new();
        let (c1, c2) = (ConnId::new(), ConnId::new());
        dir.register(c1, 1, outbound());
        dir.register(c2, 2, outbound());
        dir.subscribe(c1, 10).unwrap();
        dir.subscribe(c2, 10).unwrap();

        dir.unregister(c1);
        let subs = dir.subscribers_of(10);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].0, c2);
    }
}
