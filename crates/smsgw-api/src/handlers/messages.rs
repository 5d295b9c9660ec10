//! Message handlers

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use smsgw_core::{ExportFormat, NewMessage};
use smsgw_storage::{Message, MessageCriteria, MessageStats};
use std::sync::Arc;
use tracing::info;

use crate::auth::{AppState, AuthUser};
use crate::error::ApiResult;
use crate::response::{ok, Created};

/// Listing switches that sit beside the criteria
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListOptions {
    pub stats: bool,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageList {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<MessageStats>,
}

/// POST /message
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<NewMessage>,
) -> ApiResult<impl IntoResponse> {
    let id = state.ctx.message_service().submit(&user, req).await?;
    info!(msg_id = id, username = %user.username, "Message accepted");
    Ok(ok(Created { id }))
}

/// GET /message/filter
pub async fn filter_messages(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(criteria): Query<MessageCriteria>,
    Query(options): Query<ListOptions>,
) -> ApiResult<Response> {
    let format = options
        .format
        .as_deref()
        .filter(|f| !f.is_empty())
        .map(str::parse::<ExportFormat>)
        .transpose()?;

    let service = state.ctx.message_service();
    let stats = if options.stats && format.is_none() {
        Some(service.stats(&user, criteria.clone()).await?)
    } else {
        None
    };
    let messages = service.list(&user, criteria).await?;

    match format {
        Some(format) => {
            let body = format.render(&messages)?;
            let disposition = format!("attachment; filename=\"{}\"", format.file_name());
            Ok((
                [
                    (header::CONTENT_TYPE, format.content_type().to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response())
        }
        None => Ok(ok(MessageList { messages, stats }).into_response()),
    }
}
