//! Wire events and store rows.
//!
//! Client/server events mirror the Socket.IO payloads of the original
//! web client, as tagged JSON objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{RoomId, UserId};

/// A message persisted in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub file_type: Option<String>,
    pub voice_message_url: Option<String>,
    pub parent_message_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub sender_username: String,
    pub sender_profile_pic: String,
    pub reactions: Vec<ReactionSummary>,
}

/// A direct message between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub file_type: Option<String>,
    pub voice_message_url: Option<String>,
    pub parent_message_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub sender_username: String,
    pub sender_profile_pic: String,
    pub reactions: Vec<ReactionSummary>,
}

/// One emoji's aggregate state on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub usernames: Vec<String>,
    pub count: i64,
}

/// Body of a message before it has a row in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub file_type: Option<String>,
    pub voice_url: Option<String>,
    pub parent_id: Option<i64>,
}

impl MessageDraft {
    /// A message needs text, media, or voice to be sendable.
    pub fn is_empty(&self) -> bool {
        let has = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.is_empty());
        !has(&self.content) && !has(&self.media_url) && !has(&self.voice_url)
    }
}

/// Events received from a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Subscribe {
        room_id: RoomId,
    },
    Unsubscribe {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: Option<String>,
        media_url: Option<String>,
        file_type: Option<String>,
        voice_url: Option<String>,
        parent_id: Option<i64>,
    },
    SendPrivateMessage {
        receiver_id: UserId,
        content: Option<String>,
        media_url: Option<String>,
        file_type: Option<String>,
        voice_url: Option<String>,
        parent_id: Option<i64>,
    },
    SetReaction {
        message_id: i64,
        emoji: String,
        #[serde(default)]
        is_private: bool,
        room_id: Option<RoomId>,
        receiver_id: Option<UserId>,
    },
    SetTyping {
        room_id: Option<RoomId>,
        receiver_id: Option<UserId>,
        is_typing: bool,
    },
}

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PresenceChanged {
        user_id: UserId,
        is_online: bool,
        timestamp: DateTime<Utc>,
    },
    NewMessage(Message),
    NewPrivateMessage(PrivateMessage),
    MessageReacted {
        message_id: i64,
        reactions: Vec<ReactionSummary>,
    },
    PrivateMessageReacted {
        message_id: i64,
        reactions: Vec<ReactionSummary>,
    },
    TypingStatus {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    MembersUpdated {
        room_id: RoomId,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_tagged_json() {
        let json = r#"{"type":"subscribe","room_id":7}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::Subscribe { room_id: 7 }));
    }

    #[test]
    fn draft_empty_detection() {
        assert!(MessageDraft::default().is_empty());
        assert!(MessageDraft {
            content: Some(String::new()),
            ..Default::default()
        }
        .is_empty());
        assert!(!MessageDraft {
            voice_url: Some("uploads/voice/a.webm".into()),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn server_event_uses_source_payload_names() {
        let event = ServerEvent::TypingStatus {
            user_id: 3,
            username: "ana".into(),
            is_typing: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "typing_status");
        assert_eq!(json["is_typing"], true);
    }
}
