use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::session::RoomId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Auth errors
    #[error("login failed")]
    LoginFail,
    #[error("connection has no bound user identity")]
    Unauthenticated,

    // Fan-out errors
    #[error("not a member of room {0}")]
    NotRoomMember(RoomId),

    // Persistence
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    // Generic
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Error::LoginFail => (StatusCode::UNAUTHORIZED, "Login failed".to_string()),
            Error::Unauthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            Error::NotRoomMember(room_id) => (
                StatusCode::FORBIDDEN,
                format!("Not a member of room {}", room_id),
            ),
            Error::StoreUnavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
