//! In-memory repositories
//!
//! Used by tests and by single-process development runs. Semantics follow
//! the PostgreSQL repositories, with text search reduced to a
//! case-insensitive word match.

use crate::models::{
    page_size, Campaign, CampaignCriteria, CampaignReportStats, ConnectionCount, Message,
    MessageCriteria, MessageStats, NumFile, NumFileCriteria, Token, User, MAX_PER_PAGE,
};
use crate::repository::messages::check_transition;
use crate::repository::{CampaignStore, MessageStore, NewUser, NumFileStore, TokenStore, UserStore};
use async_trait::async_trait;
use smsgw_common::types::{now_epoch, CampaignId, Epoch, FileId, MessageId, Status};
use smsgw_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct Table<T> {
    last_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            last_id: 0,
            rows: BTreeMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

// ============================================================================
// Messages
// ============================================================================

/// In-memory message store
#[derive(Default)]
pub struct MemoryMessageStore {
    table: RwLock<Table<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, mut message: Message) -> Result<Message> {
        let mut table = self.table.write().await;
        message.id = table.next_id();
        table.rows.insert(message.id, message.clone());
        Ok(message)
    }

    async fn save_bulk(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        let mut table = self.table.write().await;
        for message in messages.iter_mut() {
            message.id = table.next_id();
            table.rows.insert(message.id, message.clone());
        }
        Ok(messages)
    }

    async fn get(&self, id: MessageId) -> Result<Message> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Message {}", id)))
    }

    async fn update(&self, message: &Message, expected: Status) -> Result<()> {
        check_transition(message.id, expected, message.status)?;
        let mut table = self.table.write().await;
        match table.rows.get_mut(&message.id) {
            Some(row) if row.status == expected => {
                *row = message.clone();
                Ok(())
            }
            Some(row) => Err(Error::Conflict(format!(
                "Message {} is {}, expected {}",
                message.id, row.status, expected
            ))),
            None => Err(Error::NotFound(format!("Message {}", message.id))),
        }
    }

    async fn list(&self, c: &MessageCriteria) -> Result<Vec<Message>> {
        let key = c.order_key()?;
        let ascending = c.ascending();
        let from = c.from_value()?;

        let table = self.table.read().await;
        let mut rows: Vec<Message> = table
            .rows
            .values()
            .filter(|m| c.matches(m))
            .filter(|m| match from {
                Some(from) if ascending => key.value(m) > from,
                Some(from) => key.value(m) < from,
                None => true,
            })
            .cloned()
            .collect();

        rows.sort_by_key(|m| (key.value(m), m.id));
        if !ascending {
            rows.reverse();
        }
        rows.truncate(c.limit() as usize);
        Ok(rows)
    }

    async fn stats(&self, c: &MessageCriteria) -> Result<MessageStats> {
        let table = self.table.read().await;
        let mut stats = MessageStats::default();
        for m in table.rows.values().filter(|m| c.matches(m)) {
            stats.add(m.status, 1);
        }
        Ok(stats)
    }

    async fn save_delivery(&self, resp_id: &str, status: Status) -> Result<()> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .values_mut()
            .find(|m| m.resp_id == resp_id && m.status == Status::Sent)
            .ok_or_else(|| Error::NotFound(format!("Message with RespID {}", resp_id)))?;
        row.status = status;
        row.delivered_at = now_epoch();
        Ok(())
    }

    async fn stop_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut table = self.table.write().await;
        let mut count = 0;
        for m in table.rows.values_mut() {
            if m.campaign_id == campaign_id
                && matches!(m.status, Status::Queued | Status::Scheduled)
            {
                m.status = Status::Stopped;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn requeue(&self, ids: &[MessageId], now: Epoch) -> Result<u64> {
        let mut table = self.table.write().await;
        let mut count = 0;
        for id in ids {
            if let Some(m) = table.rows.get_mut(id) {
                if matches!(m.status, Status::Error | Status::Queued) {
                    m.status = Status::Queued;
                    m.queued_at = now;
                    m.error.clear();
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn campaign_report(&self, campaign_id: CampaignId) -> Result<CampaignReportStats> {
        let table = self.table.read().await;
        let mut report = CampaignReportStats::default();
        let mut connections: BTreeMap<String, i64> = BTreeMap::new();

        for m in table.rows.values().filter(|m| m.campaign_id == campaign_id) {
            if report.msg_size == 0 {
                report.msg_size = m.total;
            }
            if m.sent_at > 0 {
                if report.first_queued == 0 || m.sent_at < report.first_queued {
                    report.first_queued = m.sent_at;
                }
                report.last_sent = report.last_sent.max(m.sent_at);
            }
            if !m.connection.is_empty() {
                *connections.entry(m.connection.clone()).or_default() += 1;
            }
        }
        report.connections = connections
            .into_iter()
            .map(|(name, count)| ConnectionCount { name, count })
            .collect();
        Ok(report)
    }
}

// ============================================================================
// Campaigns
// ============================================================================

/// In-memory campaign store
#[derive(Default)]
pub struct MemoryCampaignStore {
    table: RwLock<Table<Campaign>>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn save(&self, mut campaign: Campaign) -> Result<Campaign> {
        let mut table = self.table.write().await;
        campaign.id = table.next_id();
        table.rows.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Campaign {}", id)))
    }

    async fn list(&self, c: &CampaignCriteria) -> Result<Vec<Campaign>> {
        let ascending = crate::models::is_ascending(c.order_by_dir.as_deref());
        let from = c.from.filter(|f| *f > 0);
        let table = self.table.read().await;
        let mut rows: Vec<Campaign> = table
            .rows
            .values()
            .filter(|camp| c.matches(camp))
            .filter(|camp| match from {
                Some(from) if ascending => camp.submitted_at > from,
                Some(from) => camp.submitted_at < from,
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|camp| (camp.submitted_at, camp.id));
        if !ascending {
            rows.reverse();
        }
        rows.truncate(page_size(c.per_page) as usize);
        Ok(rows)
    }
}

// ============================================================================
// Destination files
// ============================================================================

/// In-memory destination file store
#[derive(Default)]
pub struct MemoryNumFileStore {
    table: RwLock<Table<NumFile>>,
}

impl MemoryNumFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NumFileStore for MemoryNumFileStore {
    async fn save(&self, mut file: NumFile) -> Result<NumFile> {
        let mut table = self.table.write().await;
        file.id = table.next_id();
        table.rows.insert(file.id, file.clone());
        Ok(file)
    }

    async fn get(&self, id: FileId) -> Result<NumFile> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .filter(|f| !f.deleted)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File {}", id)))
    }

    async fn list(&self, c: &NumFileCriteria) -> Result<Vec<NumFile>> {
        let from = c.from.filter(|f| *f > 0);
        let table = self.table.read().await;
        let mut rows: Vec<NumFile> = table
            .rows
            .values()
            .filter(|f| c.matches(f))
            .filter(|f| from.map(|from| f.submitted_at < from).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|f| std::cmp::Reverse((f.submitted_at, f.id)));
        rows.truncate(page_size(c.per_page).min(MAX_PER_PAGE) as usize);
        Ok(rows)
    }

    async fn delete(&self, id: FileId) -> Result<()> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(f) if !f.deleted => {
                f.deleted = true;
                Ok(())
            }
            _ => Err(Error::NotFound(format!("File {}", id))),
        }
    }
}

// ============================================================================
// Users and tokens
// ============================================================================

/// In-memory user store
#[derive(Default)]
pub struct MemoryUserStore {
    table: RwLock<Table<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, input: NewUser) -> Result<User> {
        let mut table = self.table.write().await;
        if table.rows.values().any(|u| u.username == input.username) {
            return Err(Error::field("Username", "Username already exists"));
        }
        let user = User {
            id: table.next_id(),
            username: input.username,
            password: input.password,
            name: input.name,
            email: input.email,
            connection_group: input.connection_group,
            permissions: input.permissions,
            registered_at: now_epoch(),
            suspended: false,
        };
        table.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        Ok(self.table.read().await.rows.values().cloned().collect())
    }

    async fn set_suspended(&self, username: &str, suspended: bool) -> Result<()> {
        let mut table = self.table.write().await;
        let user = table
            .rows
            .values_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| Error::NotFound(format!("User {}", username)))?;
        user.suspended = suspended;
        Ok(())
    }
}

/// In-memory token store keyed by digest
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(
        &self,
        username: &str,
        digest: &str,
        validity: i32,
        now: Epoch,
    ) -> Result<Token> {
        let mut tokens = self.tokens.write().await;
        let token = Token {
            id: tokens.len() as i64 + 1,
            token: digest.to_string(),
            username: username.to_string(),
            last_accessed: now,
            validity,
        };
        tokens.insert(digest.to_string(), token.clone());
        Ok(token)
    }

    async fn get(&self, digest: &str) -> Result<Option<Token>> {
        Ok(self.tokens.read().await.get(digest).cloned())
    }

    async fn touch(&self, digest: &str, now: Epoch) -> Result<()> {
        if let Some(token) = self.tokens.write().await.get_mut(digest) {
            token.last_accessed = now;
        }
        Ok(())
    }

    async fn delete(&self, digest: &str) -> Result<()> {
        self.tokens
            .write()
            .await
            .remove(digest)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("Token".to_string()))
    }
}
