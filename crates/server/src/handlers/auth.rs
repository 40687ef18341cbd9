//! Auth handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppState;
use crate::error::Result;
use crate::session::UserId;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/signup - {}", req.username);
    let (user_id, token) = state.auth.signup(&req.username, &req.password).await?;
    Ok(Json(AuthResponse {
        token,
        user_id,
        username: req.username,
    }))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/login - {}", req.username);
    let (user_id, token) = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(AuthResponse {
        token,
        user_id,
        username: req.username,
    }))
}
