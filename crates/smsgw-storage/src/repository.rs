//! Repository layer for data access

pub mod campaigns;
pub mod files;
pub mod messages;
pub mod tokens;
pub mod users;

// Re-export concrete repository implementations with simple names
pub use campaigns::DbCampaignStore;
pub use files::DbNumFileStore;
pub use messages::DbMessageStore;
pub use tokens::DbTokenStore;
pub use users::DbUserStore;

// Re-export repository traits
pub use campaigns::CampaignStore;
pub use files::NumFileStore;
pub use messages::{MessageStore, BULK_BATCH_SIZE};
pub use tokens::TokenStore;
pub use users::{NewUser, UserStore};
