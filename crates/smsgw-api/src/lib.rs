//! smsgw API - HTTP ingress
//!
//! Token and basic authentication, message, campaign and destination file
//! endpoints, health probes, metrics and the OpenAPI document.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod response;
pub mod routes;

pub use auth::{hash_password, AppState};
pub use error::{ApiError, ApiResult};
pub use openapi::create_openapi_routes;
pub use routes::create_router;
