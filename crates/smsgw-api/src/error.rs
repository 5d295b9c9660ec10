//! Error responses
//!
//! Every failure renders as `{"Ok":false,"Errors":[...]}` with one entry per
//! field error, or a single entry for everything else.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use smsgw_common::Error;
use tracing::error;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEntry {
    #[serde(rename = "Type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    pub ok: bool,
    pub errors: Vec<ErrorEntry>,
}

/// Handler error wrapping the common taxonomy
#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    pub fn body(&self) -> ErrorBody {
        let kind = self.0.code();
        let errors = match &self.0 {
            Error::Form(fields) => fields
                .iter()
                .map(|f| ErrorEntry {
                    kind,
                    field: Some(f.field.clone()),
                    message: f.message.clone(),
                })
                .collect(),
            // internals stay in the log
            Error::Store(_) | Error::Internal(_) | Error::Other(_) => vec![ErrorEntry {
                kind,
                field: None,
                message: "Internal server error".to_string(),
            }],
            other => vec![ErrorEntry {
                kind,
                field: None,
                message: other.to_string(),
            }],
        };
        ErrorBody { ok: false, errors }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use smsgw_common::FieldError;

    #[test]
    fn test_form_errors_render_per_field() {
        let err = ApiError(Error::Form(vec![
            FieldError::new("Src", "Source address can't be empty."),
            FieldError::new("Msg", "Can't send empty message."),
        ]));
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "Ok": false,
                "Errors": [
                    {"Type": "form", "Field": "Src", "Message": "Source address can't be empty."},
                    {"Type": "form", "Field": "Msg", "Message": "Can't send empty message."}
                ]
            })
        );
    }

    #[test]
    fn test_store_errors_are_hidden() {
        let err = ApiError(Error::Store("connection refused on 10.0.0.5".into()));
        let body = err.body();
        assert_eq!(body.errors[0].kind, "db");
        assert_eq!(body.errors[0].message, "Internal server error");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_status() {
        let response = ApiError(Error::Auth("Invalid token".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
