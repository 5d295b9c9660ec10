//! Success envelope, the counterpart of [`crate::error::ErrorBody`]

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<T> {
    pub ok: bool,
    pub response: T,
}

pub fn ok<T: Serialize>(response: T) -> Json<Envelope<T>> {
    Json(Envelope { ok: true, response })
}

/// `{"ID": ..}` reply for created rows
#[derive(Debug, Serialize)]
pub struct Created {
    #[serde(rename = "ID")]
    pub id: i64,
}

/// `{"Count": ..}` reply for bulk transitions
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Affected {
    pub count: u64,
}
