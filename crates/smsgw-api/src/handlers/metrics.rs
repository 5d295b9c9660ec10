use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::ApiResult;

/// Prometheus text exposition of the process counters
pub async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let body = state.ctx.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
