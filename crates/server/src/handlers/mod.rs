//! HTTP handlers for the server edge.
//!
//! Thin by design: the fan-out core lives behind the WebSocket; these
//! routes only cover account setup, room membership, and presence reads.

pub mod auth;
pub mod rooms;

pub use auth::{login, signup};
pub use rooms::{create_room, join_room, online_users};

use axum::http::{header, HeaderMap};

use crate::auth::AuthedUser;
use crate::config::AppState;
use crate::error::{Error, Result};

/// Resolve the bearer token on a request to an authenticated user.
pub(crate) async fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Error::Unauthenticated)?;
    state.auth.resolve(token).await.ok_or(Error::Unauthenticated)
}
