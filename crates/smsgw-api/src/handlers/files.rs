//! Destination file handlers

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use smsgw_common::types::FileId;
use smsgw_common::Error;
use smsgw_storage::NumFileCriteria;
use std::sync::Arc;

use crate::auth::{AppState, AuthUser};
use crate::error::ApiResult;
use crate::response::ok;

#[derive(Debug, Deserialize)]
pub struct FileRef {
    #[serde(rename = "ID")]
    pub id: FileId,
}

fn multipart_err(e: MultipartError) -> Error {
    Error::Request(format!("Couldn't read upload: {}", e.body_text()))
}

/// POST /file/upload, multipart with `File` and `Description`
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file = None;
    let mut description = String::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let part = field.name().unwrap_or_default().to_string();
        match part.as_str() {
            "File" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_err)?;
                file = Some((name, data));
            }
            "Description" => {
                description = field.text().await.map_err(multipart_err)?;
            }
            _ => {}
        }
    }

    let (name, data) = file.ok_or_else(|| Error::field("File", "No file uploaded"))?;
    let saved = state
        .ctx
        .file_service()
        .upload(&user, &name, &description, &data)
        .await?;
    Ok(ok(saved))
}

/// GET /file/filter
pub async fn filter_files(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(criteria): Query<NumFileCriteria>,
) -> ApiResult<impl IntoResponse> {
    let files = state.ctx.file_service().list(&user, criteria).await?;
    Ok(ok(files))
}

/// POST /file/delete
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<FileRef>,
) -> ApiResult<impl IntoResponse> {
    state.ctx.file_service().delete(&user, req.id).await?;
    Ok(ok(serde_json::json!({ "ID": req.id })))
}
