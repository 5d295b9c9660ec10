//! Campaign engine
//!
//! A campaign is one template fanned out over a destination list. Starting
//! one persists the campaign and all of its messages, then publishes every
//! message that is not scheduled with at most [`FANOUT_LIMIT`] publishes in
//! flight. The first failed publish aborts the fan-out; messages already
//! published stay enqueued.

pub mod numbers;
pub mod report;

pub use numbers::{NumbersError, Row};
pub use report::{Progress, Report};

use crate::broker::{publish_item, Broker};
use crate::context::{require, require_owner};
use crate::files::NumFileService;
use crate::message::{check_length, validate_schedule, Masker};
use crate::metrics::Metrics;
use crate::smpp::text::total_segments;
use futures::stream::{self, TryStreamExt};
use serde::Deserialize;
use smsgw_common::routing::resolve_key;
use smsgw_common::types::{now_epoch, CampaignId, Encoding, Epoch, FileId, Permission, QueueItem, Status};
use smsgw_common::{Config, Error, FieldError, Result};
use smsgw_storage::{Campaign, CampaignCriteria, CampaignStore, Message, MessageStore, User};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Publishes in flight during a fan-out
pub const FANOUT_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Numbers(#[from] NumbersError),

    #[error("campaign {campaign_id}: couldn't publish message {msg_id}: {source}")]
    Publish {
        campaign_id: CampaignId,
        msg_id: i64,
        source: Error,
    },
}

impl From<CampaignError> for Error {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::Numbers(e) => Error::field("Numbers", e.to_string()),
            CampaignError::Publish { .. } => Error::Queue(e.to_string()),
        }
    }
}

/// A campaign submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NewCampaign {
    pub description: String,
    pub src: String,
    pub msg: String,
    pub priority: i32,
    #[serde(rename = "FileID")]
    pub file_id: FileId,
    /// Comma separated destinations, used when no file is given
    pub numbers: String,
    pub scheduled_at: Epoch,
    pub send_before: String,
    pub send_after: String,
    pub is_flash: bool,
    pub mask: bool,
}

impl NewCampaign {
    pub fn validate(&self, now: Epoch) -> Result<()> {
        let mut errors = Vec::new();
        if self.msg.is_empty() {
            errors.push(FieldError::new("Msg", "Can't send empty message."));
        }
        errors.extend(check_length(&self.msg));
        if self.description.trim().is_empty() {
            errors.push(FieldError::new(
                "Description",
                "Description must be provided for campaign.",
            ));
        }
        if self.src.trim().is_empty() {
            errors.push(FieldError::new("Src", "Source address can't be empty."));
        }
        if self.file_id <= 0 && self.numbers.trim().is_empty() {
            errors.push(FieldError::new(
                "Numbers",
                "Either numbers or a file must be provided.",
            ));
        }
        errors.extend(validate_schedule(
            self.scheduled_at,
            &self.send_after,
            &self.send_before,
            now,
        ));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Form(errors))
        }
    }
}

pub struct CampaignEngine {
    config: Arc<Config>,
    messages: Arc<dyn MessageStore>,
    campaigns: Arc<dyn CampaignStore>,
    files: NumFileService,
    broker: Arc<dyn Broker>,
    metrics: Option<Metrics>,
}

impl CampaignEngine {
    pub fn new(
        config: Arc<Config>,
        messages: Arc<dyn MessageStore>,
        campaigns: Arc<dyn CampaignStore>,
        files: NumFileService,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            config,
            messages,
            campaigns,
            files,
            broker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist a campaign and its messages, then enqueue them
    pub async fn start(&self, user: &User, req: NewCampaign) -> Result<CampaignId> {
        require(user, Permission::StartCampaign)?;
        if req.mask {
            require(user, Permission::Mask)?;
        }
        let now = now_epoch();
        req.validate(now)?;

        let rows = if req.file_id > 0 {
            self.files.rows(user, req.file_id).await?.1
        } else {
            numbers::parse_list(&req.numbers).map_err(CampaignError::from)?
        };
        let masker = if req.mask { Some(Masker::shared()?) } else { None };
        let render = |row: &Row| {
            let text = row.interpolate(&req.msg);
            match &masker {
                Some(masker) => masker.apply(&text),
                None => (text.clone(), text),
            }
        };
        let enc = rows
            .first()
            .map(|row| Encoding::detect(&render(row).1))
            .unwrap_or_default();
        let scheduled = req.scheduled_at > 0;
        let group = &user.connection_group;

        let mut keys = Vec::with_capacity(rows.len());
        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(resolve_key(&self.config, group, &row.destination)?);
            let (msg, real_msg) = render(row);
            if let Some(too_long) = check_length(&real_msg) {
                return Err(Error::Form(vec![too_long]));
            }
            let msg_enc = Encoding::detect(&real_msg);
            pending.push(Message {
                connection_group: group.clone(),
                total: total_segments(&real_msg, msg_enc),
                username: user.username.clone(),
                msg,
                real_msg,
                enc: msg_enc,
                dst: row.destination.clone(),
                src: req.src.trim().to_string(),
                priority: req.priority,
                queued_at: if scheduled { 0 } else { now },
                scheduled_at: req.scheduled_at,
                send_before: req.send_before.clone(),
                send_after: req.send_after.clone(),
                status: if scheduled {
                    Status::Scheduled
                } else {
                    Status::Queued
                },
                is_flash: req.is_flash,
                ..Default::default()
            });
        }

        let campaign = self
            .campaigns
            .save(Campaign {
                id: 0,
                description: req.description.trim().to_string(),
                src: req.src.trim().to_string(),
                msg: req.msg.clone(),
                enc,
                file_id: req.file_id.max(0),
                priority: req.priority,
                send_before: req.send_before.clone(),
                send_after: req.send_after.clone(),
                scheduled_at: req.scheduled_at,
                is_flash: req.is_flash,
                mask: req.mask,
                total: i32::try_from(rows.len()).unwrap_or(i32::MAX),
                username: user.username.clone(),
                submitted_at: now,
            })
            .await?;
        for m in pending.iter_mut() {
            m.campaign_id = campaign.id;
        }
        let saved = self.messages.save_bulk(pending).await?;
        if let Some(metrics) = &self.metrics {
            metrics
                .messages_accepted
                .with_label_values(&[group.as_str()])
                .inc_by(saved.len() as u64);
        }
        info!(
            campaign_id = campaign.id,
            total = saved.len(),
            scheduled,
            username = %user.username,
            "Campaign saved"
        );
        if scheduled {
            return Ok(campaign.id);
        }

        self.fan_out(campaign.id, saved.iter().zip(keys)).await?;
        info!(campaign_id = campaign.id, "Campaign queued");
        Ok(campaign.id)
    }

    /// Publish every message on its key with bounded concurrency
    async fn fan_out<'a, I>(&self, campaign_id: CampaignId, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Message, String)>,
    {
        let broker = self.broker.as_ref();
        let metrics = self.metrics.as_ref();
        stream::iter(items.into_iter().map(Ok::<_, CampaignError>))
            .try_for_each_concurrent(FANOUT_LIMIT, |(m, key)| async move {
                let item = QueueItem {
                    msg_id: m.id,
                    total: m.total,
                };
                let published = publish_item(broker, &key, &item, m.priority).await;
                if let Some(metrics) = metrics {
                    metrics.publish_result(published.is_ok());
                }
                published.map_err(|source| CampaignError::Publish {
                    campaign_id,
                    msg_id: m.id,
                    source,
                })
            })
            .await
            .map_err(|e| {
                error!(campaign_id, error = %e, "Campaign fan-out aborted");
                Error::from(e)
            })
    }

    async fn owned(&self, user: &User, id: CampaignId) -> Result<Campaign> {
        let campaign = self.campaigns.get(id).await?;
        require_owner(user, &campaign.username, Permission::ListCampaigns)?;
        Ok(campaign)
    }

    pub async fn progress(&self, user: &User, id: CampaignId) -> Result<Progress> {
        let campaign = self.owned(user, id).await?;
        let stats = self.messages.campaign_progress(id).await?;
        Ok(Progress::new(i64::from(campaign.total), &stats))
    }

    pub async fn report(&self, user: &User, id: CampaignId) -> Result<Report> {
        self.owned(user, id).await?;
        let total = self.messages.campaign_progress(id).await?.total;
        let stats = self.messages.campaign_report(id).await?;
        Ok(Report::new(id, total, stats))
    }

    /// Stop every queued or scheduled message; returns how many
    pub async fn stop(&self, user: &User, id: CampaignId) -> Result<u64> {
        require(user, Permission::StopCampaign)?;
        self.owned(user, id).await?;
        let count = self.messages.stop_pending(id).await?;
        info!(campaign_id = id, count, "Campaign stopped");
        Ok(count)
    }

    /// Re-enqueue every failed message
    pub async fn retry(&self, user: &User, id: CampaignId) -> Result<u64> {
        require(user, Permission::RetryCampaign)?;
        self.owned(user, id).await?;
        let failed = self.messages.list_with_error(id).await?;
        self.requeue(id, failed).await
    }

    /// Re-publish every message still marked Queued, for use after a
    /// worker lost deliveries
    pub async fn retry_queued(&self, user: &User, id: CampaignId) -> Result<u64> {
        require(user, Permission::RetryCampaign)?;
        self.owned(user, id).await?;
        let queued = self.messages.list_queued(id).await?;
        self.requeue(id, queued).await
    }

    async fn requeue(&self, id: CampaignId, messages: Vec<Message>) -> Result<u64> {
        let mut keys = Vec::with_capacity(messages.len());
        for m in &messages {
            keys.push(resolve_key(&self.config, &m.connection_group, &m.dst)?);
        }
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let count = self.messages.requeue(&ids, now_epoch()).await?;
        self.fan_out(id, messages.iter().zip(keys)).await?;
        info!(campaign_id = id, count, "Campaign messages requeued");
        Ok(count)
    }

    /// The caller's campaigns, or everyone's with `List campaigns`
    pub async fn list(&self, user: &User, mut criteria: CampaignCriteria) -> Result<Vec<Campaign>> {
        if !user.can(Permission::ListCampaigns) {
            criteria.username = Some(user.username.clone());
        }
        self.campaigns.list(&criteria).await
    }
}
