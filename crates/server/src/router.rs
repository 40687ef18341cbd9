//! Room/Conversation Router: fan-out of one event to many connections.
//!
//! Targets are snapshotted from the Session Directory, then pushed with
//! `try_send` so a slow or dead consumer only ever costs itself its own
//! copy. Counts returned are deliveries accepted by an open channel.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::models::ServerEvent;
use crate::session::{ConnId, Outbound, RoomId, SessionDirectory, UserId};

pub struct Router {
    directory: Arc<SessionDirectory>,
}

impl Router {
    pub fn new(directory: Arc<SessionDirectory>) -> Self {
        Self { directory }
    }

    /// Push an event to every connection subscribed to a room. An empty
    /// subscriber set is not an error; returns 0.
    pub fn deliver_to_room(&self, room_id: RoomId, event: ServerEvent) -> usize {
        self.push_all(self.directory.subscribers_of(room_id), &event)
    }

    /// Room delivery that skips one connection (typing indicators never
    /// echo back to their originator).
    pub fn deliver_to_room_except(
        &self,
        room_id: RoomId,
        skip: ConnId,
        event: ServerEvent,
    ) -> usize {
        let targets = self
            .directory
            .subscribers_of(room_id)
            .into_iter()
            .filter(|(id, _)| *id != skip)
            .collect();
        self.push_all(targets, &event)
    }

    /// Push an event to every connection a user has open.
    pub fn deliver_to_user(&self, user_id: UserId, event: ServerEvent) -> usize {
        self.push_all(self.directory.connections_for(user_id), &event)
    }

    /// Private-message delivery: the union of both users' connections,
    /// sender included so their other open tabs see the sent message.
    pub fn deliver_private(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        event: ServerEvent,
    ) -> usize {
        let mut targets = self.directory.connections_for(sender_id);
        if receiver_id != sender_id {
            targets.extend(self.directory.connections_for(receiver_id));
        }
        self.push_all(targets, &event)
    }

    /// Push an event to every live connection (presence changes).
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        self.push_all(self.directory.all_connections(), &event)
    }

    fn push_all(&self, targets: Vec<(ConnId, Outbound)>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (conn_id, outbound) in targets {
            match outbound.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("dropping delivery to {}: outbound buffer full", conn_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("dropping delivery to {}: channel closed", conn_id);
                }
            }
        }
        delivered
    }
}
