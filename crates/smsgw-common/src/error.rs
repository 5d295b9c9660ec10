//! Error types for smsgw

use serde::Serialize;
use thiserror::Error;

/// A validation failure attached to one request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for smsgw
#[derive(Error, Debug)]
pub enum Error {
    #[error("Request error: {0}")]
    Request(String),

    #[error("Validation failed: {}", join_fields(.0))]
    Form(Vec<FieldError>),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The row moved to a state the write may not follow
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SMPP error: {0}")]
    Smpp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for smsgw
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Request(_) => 400,
            Error::Form(_) => 400,
            Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Store(_) => 500,
            Error::Queue(_) => 500,
            Error::Config(_) => 500,
            Error::Smpp(_) => 500,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error type string used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Request(_) => "request",
            Error::Form(_) => "form",
            Error::Auth(_) => "auth",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "notfound",
            Error::Conflict(_) => "conflict",
            Error::Store(_) => "db",
            Error::Queue(_) => "queue",
            Error::Config(_) => "config",
            Error::Smpp(_) => "smpp",
            Error::Internal(_) => "internal",
            Error::Other(_) => "internal",
        }
    }

    /// Shorthand for a single-field validation error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Form(vec![FieldError::new(field, message)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Request("bad".into()).status_code(), 400);
        assert_eq!(Error::field("Dst", "too short").status_code(), 400);
        assert_eq!(Error::Auth("no token".into()).status_code(), 401);
        assert_eq!(Error::Forbidden("nope".into()).status_code(), 403);
        assert_eq!(Error::Queue("down".into()).status_code(), 500);
    }

    #[test]
    fn test_form_display_lists_fields() {
        let err = Error::Form(vec![
            FieldError::new("Src", "Source address can't be empty."),
            FieldError::new("Msg", "Can't send empty message."),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: Src: Source address can't be empty.; Msg: Can't send empty message."
        );
        assert_eq!(err.code(), "form");
    }
}
