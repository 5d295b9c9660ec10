use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::{issue_token, login, AppState};
use crate::error::ApiResult;
use crate::response::ok;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponse {
    pub token: String,
}

/// POST /auth: exchange a username and password for a token
pub async fn token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = login(&state.ctx, &req.username, &req.password).await?;
    let token = issue_token(&state.ctx, &user).await?;
    info!(username = %user.username, "User logged in");
    Ok(ok(LoginResponse { token }))
}
