//! smsgw Core - SMS dispatch engine
//!
//! This crate provides the SMPP transceiver client, the priority broker,
//! the per-connection worker, the scheduled message sweeper, message and
//! campaign ingress services, and destination file handling.

pub mod broker;
pub mod campaign;
pub mod context;
pub mod export;
pub mod files;
pub mod message;
pub mod metrics;
pub mod scheduler;
pub mod smpp;
pub mod window;
pub mod worker;

pub use broker::{Broker, Consumer, Delivery, MemoryBroker, PgBroker, Subscription};
pub use campaign::{CampaignEngine, CampaignError, NewCampaign, Progress, Report};
pub use context::{require, require_owner, Context};
pub use export::ExportFormat;
pub use files::NumFileService;
pub use message::{MessageService, NewMessage};
pub use metrics::Metrics;
pub use scheduler::Scheduler;
pub use smpp::{SmppClient, SmppError};
pub use worker::{Worker, WorkerError};

#[cfg(test)]
mod scenarios;
