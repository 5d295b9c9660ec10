//! smsgw Storage - Database and file storage abstraction
//!
//! Repository traits with PostgreSQL implementations, in-memory
//! implementations for tests and single-process runs, and blob storage
//! for uploaded destination files.

pub mod db;
pub mod file;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use file::{blob_name, FileStorage, LocalStorage};
pub use memory::{
    MemoryCampaignStore, MemoryMessageStore, MemoryNumFileStore, MemoryTokenStore,
    MemoryUserStore,
};
pub use models::*;
pub use repository::*;
