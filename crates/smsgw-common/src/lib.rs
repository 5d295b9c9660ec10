//! smsgw Common - Shared types and utilities
//!
//! This crate provides configuration, the error taxonomy, routing
//! resolution and the domain types shared across all smsgw components.

pub mod config;
pub mod error;
pub mod logging;
pub mod routing;
pub mod types;

pub use config::Config;
pub use error::{Error, FieldError, Result};
