//! Room membership and presence handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::require_auth;
use crate::config::AppState;
use crate::error::Result;
use crate::session::{RoomId, UserId};

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room_id: RoomId,
    pub name: String,
}

/// POST /rooms
pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<RoomResponse>> {
    let user = require_auth(&state, &headers).await?;
    info!("POST /rooms - {} by {}", req.name, user.username);

    let room_id = state.store.create_room(&req.name, user.user_id).await?;
    Ok(Json(RoomResponse {
        room_id,
        name: req.name,
    }))
}

/// POST /rooms/{room_id}/join
///
/// Adds the caller to the membership table. Live subscription still
/// happens over the socket; this only grants the authorization the
/// subscribe check reads.
pub async fn join_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<RoomId>,
) -> Result<StatusCode> {
    let user = require_auth(&state, &headers).await?;
    info!("POST /rooms/{}/join - {}", room_id, user.username);

    state.store.join_room(room_id, user.user_id).await?;
    Ok(StatusCode::OK)
}

/// GET /presence: users with at least one live connection.
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<UserId>> {
    let mut users = state.directory.online_users();
    users.sort_unstable();
    Json(users)
}
