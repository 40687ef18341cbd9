//! WebSocket transport boundary.
//!
//! On `GET /ws?token=...` the token must resolve to a user before the
//! upgrade; the Session Directory never registers an anonymous
//! connection. Each socket gets a reader task (inbound client events)
//! and a writer task draining the connection's bounded outbound channel,
//! so one slow client can only ever stall itself.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::AuthedUser;
use crate::config::AppState;
use crate::error::{Error, Result};
use crate::models::{ClientEvent, MessageDraft, ServerEvent};
use crate::session::ConnId;
use crate::typing::TypingScope;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let user = state
        .auth
        .resolve(&params.token)
        .await
        .ok_or(Error::Unauthenticated)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthedUser) {
    let conn_id = ConnId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.channel_capacity);

    info!("ws connect: {} as user {}", conn_id, user.user_id);

    if let Some(edge) = state.directory.register(conn_id, user.user_id, tx.clone()) {
        if let Err(e) = state.presence.transition(edge).await {
            warn!("presence persistence failed on connect: {}", e);
        }
    }

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = ws_rx.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!("ignoring malformed frame from {}: {}", conn_id, e);
                continue;
            }
        };
        handle_event(&state, conn_id, &user, &tx, event).await;
    }

    // Disconnect is the cancellation signal: deregister first so no
    // further deliveries target the dead channel, then re-evaluate
    // presence from the surviving connection count.
    if let Some(edge) = state.directory.unregister(conn_id) {
        if let Err(e) = state.presence.transition(edge).await {
            warn!("presence persistence failed on disconnect: {}", e);
        }
    }
    writer.abort();
    info!("ws disconnect: {}", conn_id);
}

/// Run one client event and route any failure back to its sender.
///
/// Errors stay local to this connection: the sender hears about it,
/// bystanders never do.
async fn handle_event(
    state: &AppState,
    conn_id: ConnId,
    user: &AuthedUser,
    outbound: &mpsc::Sender<ServerEvent>,
    event: ClientEvent,
) {
    if let Err(e) = dispatch(state, conn_id, user, event).await {
        warn!("event from {} failed: {}", conn_id, e);
        let _ = outbound.try_send(ServerEvent::Error {
            message: e.to_string(),
        });
    }
}

async fn dispatch(
    state: &AppState,
    conn_id: ConnId,
    user: &AuthedUser,
    event: ClientEvent,
) -> Result<()> {
    match event {
        ClientEvent::Subscribe { room_id } => {
            // Membership is the authorization source, checked once here,
            // never per delivered message.
            if !state.store.is_room_member(user.user_id, room_id).await? {
                return Err(Error::NotRoomMember(room_id));
            }
            state.directory.subscribe(conn_id, room_id)?;
            state
                .router
                .deliver_to_room(room_id, ServerEvent::MembersUpdated { room_id });
            Ok(())
        }
        ClientEvent::Unsubscribe { room_id } => {
            state.directory.unsubscribe(conn_id, room_id)?;
            state
                .router
                .deliver_to_room(room_id, ServerEvent::MembersUpdated { room_id });
            Ok(())
        }
        ClientEvent::SendMessage {
            room_id,
            content,
            media_url,
            file_type,
            voice_url,
            parent_id,
        } => {
            let draft = MessageDraft {
                content,
                media_url,
                file_type,
                voice_url,
                parent_id,
            };
            if draft.is_empty() {
                return Err(Error::BadRequest("message has no content".into()));
            }
            // Persist first; the fan-out only ever carries stored rows.
            let message = state
                .store
                .record_message(room_id, user.user_id, &draft)
                .await?;
            let delivered = state
                .router
                .deliver_to_room(room_id, ServerEvent::NewMessage(message));
            debug!("message to room {} reached {} connections", room_id, delivered);
            Ok(())
        }
        ClientEvent::SendPrivateMessage {
            receiver_id,
            content,
            media_url,
            file_type,
            voice_url,
            parent_id,
        } => {
            let draft = MessageDraft {
                content,
                media_url,
                file_type,
                voice_url,
                parent_id,
            };
            if draft.is_empty() {
                return Err(Error::BadRequest("message has no content".into()));
            }
            let message = state
                .store
                .record_private_message(user.user_id, receiver_id, &draft)
                .await?;
            let delivered = state.router.deliver_private(
                user.user_id,
                receiver_id,
                ServerEvent::NewPrivateMessage(message),
            );
            debug!(
                "private message {} -> {} reached {} connections",
                user.user_id, receiver_id, delivered
            );
            Ok(())
        }
        ClientEvent::SetReaction {
            message_id,
            emoji,
            is_private,
            room_id,
            receiver_id,
        } => {
            let reactions = state
                .store
                .toggle_reaction(user.user_id, message_id, &emoji, is_private)
                .await?;
            if is_private {
                let receiver_id = receiver_id.ok_or_else(|| {
                    Error::BadRequest("receiver_id required for private reactions".into())
                })?;
                state.router.deliver_private(
                    user.user_id,
                    receiver_id,
                    ServerEvent::PrivateMessageReacted {
                        message_id,
                        reactions,
                    },
                );
            } else {
                let room_id = room_id.ok_or_else(|| {
                    Error::BadRequest("room_id required for room reactions".into())
                })?;
                state.router.deliver_to_room(
                    room_id,
                    ServerEvent::MessageReacted {
                        message_id,
                        reactions,
                    },
                );
            }
            Ok(())
        }
        ClientEvent::SetTyping {
            room_id,
            receiver_id,
            is_typing,
        } => {
            let scope = match (room_id, receiver_id) {
                (Some(room_id), _) => TypingScope::Room(room_id),
                (None, Some(peer_id)) => TypingScope::User(peer_id),
                (None, None) => {
                    return Err(Error::BadRequest(
                        "typing needs a room_id or receiver_id".into(),
                    ))
                }
            };
            state
                .typing
                .set_typing(conn_id, user.user_id, &user.username, scope, is_typing);
            Ok(())
        }
    }
}
