//! API request handlers

pub mod auth;
pub mod campaigns;
pub mod files;
pub mod health;
pub mod messages;
pub mod metrics;

pub use health::*;
