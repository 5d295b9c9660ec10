//! Shared service context: configuration, stores, broker and metrics handed
//! to every service constructor.

use crate::broker::{Broker, MemoryBroker, PgBroker};
use crate::campaign::CampaignEngine;
use crate::files::NumFileService;
use crate::message::MessageService;
use crate::metrics::Metrics;
use smsgw_common::config::BrokerBackend;
use smsgw_common::types::Permission;
use smsgw_common::{Config, Error, Result};
use smsgw_storage::{
    CampaignStore, DatabasePool, DbCampaignStore, DbMessageStore, DbNumFileStore, DbTokenStore,
    DbUserStore, FileStorage, LocalStorage, MemoryCampaignStore, MemoryMessageStore,
    MemoryNumFileStore, MemoryTokenStore, MemoryUserStore, MessageStore, NumFileStore, TokenStore,
    User, UserStore,
};
use std::path::Path;
use std::sync::Arc;

/// Fail with Forbidden unless the user holds `permission`
pub fn require(user: &User, permission: Permission) -> Result<()> {
    if user.can(permission) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "You don't have \"{}\" permission",
            permission
        )))
    }
}

/// Owners may always access their rows; others need `permission`
pub fn require_owner(user: &User, owner: &str, permission: Permission) -> Result<()> {
    if user.username == owner {
        Ok(())
    } else {
        require(user, permission)
    }
}

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub messages: Arc<dyn MessageStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub files: Arc<dyn NumFileStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub storage: Arc<dyn FileStorage>,
    pub broker: Arc<dyn Broker>,
    pub metrics: Metrics,
}

impl Context {
    /// PostgreSQL stores and the configured broker backend
    pub fn postgres(config: Arc<Config>, pool: DatabasePool) -> Result<Self> {
        let broker: Arc<dyn Broker> = match config.broker.backend {
            BrokerBackend::Postgres => Arc::new(PgBroker::new(pool.clone(), &config.broker)),
            BrokerBackend::Memory => Arc::new(MemoryBroker::new()),
        };
        Ok(Self {
            messages: Arc::new(DbMessageStore::new(pool.clone())),
            campaigns: Arc::new(DbCampaignStore::new(pool.clone())),
            files: Arc::new(DbNumFileStore::new(pool.clone())),
            users: Arc::new(DbUserStore::new(pool.clone())),
            tokens: Arc::new(DbTokenStore::new(pool)),
            storage: Arc::new(LocalStorage::new(&config.storage)?),
            broker,
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Everything in process; files under `file_root`
    pub fn memory(config: Arc<Config>, file_root: &Path) -> Result<Self> {
        Ok(Self {
            messages: Arc::new(MemoryMessageStore::new()),
            campaigns: Arc::new(MemoryCampaignStore::new()),
            files: Arc::new(MemoryNumFileStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            tokens: Arc::new(MemoryTokenStore::new()),
            storage: Arc::new(LocalStorage::from_path(file_root)?),
            broker: Arc::new(MemoryBroker::new()),
            metrics: Metrics::new()?,
            config,
        })
    }

    pub fn message_service(&self) -> MessageService {
        MessageService::new(self.config.clone(), self.messages.clone(), self.broker.clone())
            .with_metrics(self.metrics.clone())
    }

    pub fn campaign_engine(&self) -> CampaignEngine {
        CampaignEngine::new(
            self.config.clone(),
            self.messages.clone(),
            self.campaigns.clone(),
            self.file_service(),
            self.broker.clone(),
        )
        .with_metrics(self.metrics.clone())
    }

    pub fn file_service(&self) -> NumFileService {
        NumFileService::new(self.files.clone(), self.storage.clone())
    }
}
