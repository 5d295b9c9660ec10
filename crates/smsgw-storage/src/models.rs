//! Database models

use serde::{Deserialize, Serialize};
use smsgw_common::types::{CampaignId, Encoding, Epoch, FileId, MessageId, Permission, Status};
use smsgw_common::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

/// Hard cap on rows returned by a single list call
pub const MAX_PER_PAGE: u32 = 500_000;

/// Rows returned when a criteria does not say
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Marker turning a username filter into a pattern match
pub const USERNAME_PATTERN_MARKER: &str = "(re)";

// ============================================================================
// Message
// ============================================================================

/// A persisted SMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(rename = "ID")]
    pub id: MessageId,
    #[serde(rename = "RespID")]
    pub resp_id: String,
    pub connection_group: String,
    pub connection: String,
    pub total: i32,
    pub username: String,
    /// Text shown to users, masked parts replaced by X
    pub msg: String,
    /// Text put on the wire
    #[serde(skip_serializing, default)]
    pub real_msg: String,
    pub enc: Encoding,
    pub dst: String,
    pub src: String,
    pub priority: i32,
    pub queued_at: Epoch,
    pub sent_at: Epoch,
    pub delivered_at: Epoch,
    pub scheduled_at: Epoch,
    pub send_before: String,
    pub send_after: String,
    #[serde(rename = "CampaignID")]
    pub campaign_id: CampaignId,
    pub status: Status,
    pub error: String,
    pub is_flash: bool,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: 0,
            resp_id: String::new(),
            connection_group: String::new(),
            connection: String::new(),
            total: 1,
            username: String::new(),
            msg: String::new(),
            real_msg: String::new(),
            enc: Encoding::Latin,
            dst: String::new(),
            src: String::new(),
            priority: 0,
            queued_at: 0,
            sent_at: 0,
            delivered_at: 0,
            scheduled_at: 0,
            send_before: String::new(),
            send_after: String::new(),
            campaign_id: 0,
            status: Status::Queued,
            error: String::new(),
            is_flash: false,
        }
    }
}

impl Message {
    /// Text to submit: the unmasked body when present
    pub fn wire_text(&self) -> &str {
        if self.real_msg.is_empty() {
            &self.msg
        } else {
            &self.real_msg
        }
    }

    /// Whether a send window is configured
    pub fn has_window(&self) -> bool {
        !self.send_before.is_empty() && !self.send_after.is_empty()
    }
}

fn decode_err(column: &str, e: Error) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    }
}

impl<'r> FromRow<'r, PgRow> for Message {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let enc: String = row.try_get("enc")?;
        Ok(Self {
            id: row.try_get("id")?,
            resp_id: row.try_get("resp_id")?,
            connection_group: row.try_get("connection_group")?,
            connection: row.try_get("connection")?,
            total: row.try_get("total")?,
            username: row.try_get("username")?,
            msg: row.try_get("msg")?,
            real_msg: row.try_get("real_msg")?,
            enc: enc.parse().map_err(|e| decode_err("enc", e))?,
            dst: row.try_get("dst")?,
            src: row.try_get("src")?,
            priority: row.try_get("priority")?,
            queued_at: row.try_get("queued_at")?,
            sent_at: row.try_get("sent_at")?,
            delivered_at: row.try_get("delivered_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            send_before: row.try_get("send_before")?,
            send_after: row.try_get("send_after")?,
            campaign_id: row.try_get("campaign_id")?,
            status: status.parse().map_err(|e| decode_err("status", e))?,
            error: row.try_get("error")?,
            is_flash: row.try_get("is_flash")?,
        })
    }
}

/// Columns a message list may be ordered and paged by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderKey {
    Id,
    #[default]
    QueuedAt,
    SentAt,
    DeliveredAt,
    ScheduledAt,
}

impl OrderKey {
    pub fn parse(key: Option<&str>) -> Result<Self> {
        match key.unwrap_or("") {
            "" | "QueuedAt" => Ok(OrderKey::QueuedAt),
            "ID" | "Id" => Ok(OrderKey::Id),
            "SentAt" => Ok(OrderKey::SentAt),
            "DeliveredAt" => Ok(OrderKey::DeliveredAt),
            "ScheduledAt" => Ok(OrderKey::ScheduledAt),
            other => Err(Error::Request(format!("Invalid order key {}", other))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            OrderKey::Id => "id",
            OrderKey::QueuedAt => "queued_at",
            OrderKey::SentAt => "sent_at",
            OrderKey::DeliveredAt => "delivered_at",
            OrderKey::ScheduledAt => "scheduled_at",
        }
    }

    pub fn value(&self, m: &Message) -> i64 {
        match self {
            OrderKey::Id => m.id,
            OrderKey::QueuedAt => m.queued_at,
            OrderKey::SentAt => m.sent_at,
            OrderKey::DeliveredAt => m.delivered_at,
            OrderKey::ScheduledAt => m.scheduled_at,
        }
    }
}

/// Sort direction, descending unless asked otherwise
pub fn is_ascending(dir: Option<&str>) -> bool {
    dir.map(|d| d.eq_ignore_ascii_case("ASC")).unwrap_or(false)
}

/// Clamp a requested page size
pub fn page_size(per_page: Option<u32>) -> u32 {
    match per_page {
        None | Some(0) => DEFAULT_PER_PAGE,
        Some(n) => n.min(MAX_PER_PAGE),
    }
}

/// Filters for listing messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MessageCriteria {
    #[serde(rename = "ID")]
    pub id: Option<MessageId>,
    #[serde(rename = "RespID")]
    pub resp_id: Option<String>,
    pub connection_group: Option<String>,
    pub connection: Option<String>,
    /// Exact username, or a pattern when prefixed with `(re)`
    pub username: Option<String>,
    pub enc: Option<Encoding>,
    pub dst: Option<String>,
    pub src: Option<String>,
    /// Full-text match on the visible text
    pub msg: Option<String>,
    pub queued_after: Option<Epoch>,
    pub queued_before: Option<Epoch>,
    pub sent_after: Option<Epoch>,
    pub sent_before: Option<Epoch>,
    pub delivered_after: Option<Epoch>,
    pub delivered_before: Option<Epoch>,
    pub scheduled_after: Option<Epoch>,
    pub scheduled_before: Option<Epoch>,
    pub total: Option<i32>,
    pub priority: Option<i32>,
    #[serde(rename = "CampaignID")]
    pub campaign_id: Option<CampaignId>,
    pub status: Option<Status>,
    pub error: Option<String>,
    pub order_by_key: Option<String>,
    pub order_by_dir: Option<String>,
    /// Keyset token relative to `order_by_key`
    pub from: Option<String>,
    pub per_page: Option<u32>,
}

/// Non-empty string filter
pub(crate) fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// Positive time bound; 0 means unset
pub(crate) fn bound(v: Option<Epoch>) -> Option<Epoch> {
    v.filter(|t| *t > 0)
}

/// Username filter, split into exact or pattern form
pub enum UsernameFilter<'a> {
    Exact(&'a str),
    Pattern(&'a str),
}

impl MessageCriteria {
    pub fn order_key(&self) -> Result<OrderKey> {
        OrderKey::parse(self.order_by_key.as_deref())
    }

    pub fn ascending(&self) -> bool {
        is_ascending(self.order_by_dir.as_deref())
    }

    pub fn limit(&self) -> u32 {
        page_size(self.per_page)
    }

    /// Parsed keyset token
    pub fn from_value(&self) -> Result<Option<i64>> {
        match non_empty(&self.from) {
            None => Ok(None),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Request(format!("Invalid From value {}", v))),
        }
    }

    pub fn username_filter(&self) -> Option<UsernameFilter<'_>> {
        non_empty(&self.username).map(|u| match u.strip_prefix(USERNAME_PATTERN_MARKER) {
            Some(pattern) => UsernameFilter::Pattern(pattern),
            None => UsernameFilter::Exact(u),
        })
    }

    /// In-process evaluation of every filter except paging
    pub fn matches(&self, m: &Message) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            non_empty(filter).map(|f| f == value).unwrap_or(true)
        }
        fn within(value: Epoch, after: Option<Epoch>, before: Option<Epoch>) -> bool {
            bound(after).map(|a| value >= a).unwrap_or(true)
                && bound(before).map(|b| value <= b).unwrap_or(true)
        }

        if let Some(id) = self.id.filter(|id| *id > 0) {
            if m.id != id {
                return false;
            }
        }
        if !(eq(&self.resp_id, &m.resp_id)
            && eq(&self.connection_group, &m.connection_group)
            && eq(&self.connection, &m.connection)
            && eq(&self.dst, &m.dst)
            && eq(&self.src, &m.src)
            && eq(&self.error, &m.error))
        {
            return false;
        }
        match self.username_filter() {
            Some(UsernameFilter::Exact(u)) if m.username != u => return false,
            Some(UsernameFilter::Pattern(p)) => {
                let matched = regex::RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map(|re| re.is_match(&m.username))
                    .unwrap_or(false);
                if !matched {
                    return false;
                }
            }
            _ => {}
        }
        if let Some(text) = non_empty(&self.msg) {
            let haystack = m.msg.to_lowercase();
            if !text
                .split_whitespace()
                .all(|word| haystack.contains(&word.to_lowercase()))
            {
                return false;
            }
        }
        if self.enc.map(|e| e != m.enc).unwrap_or(false)
            || self.status.map(|s| s != m.status).unwrap_or(false)
            || self.campaign_id.filter(|c| *c > 0).map(|c| c != m.campaign_id).unwrap_or(false)
            || self.total.filter(|t| *t > 0).map(|t| t != m.total).unwrap_or(false)
            || self.priority.filter(|p| *p > 0).map(|p| p != m.priority).unwrap_or(false)
        {
            return false;
        }
        within(m.queued_at, self.queued_after, self.queued_before)
            && within(m.sent_at, self.sent_after, self.sent_before)
            && within(m.delivered_at, self.delivered_after, self.delivered_before)
            && within(m.scheduled_at, self.scheduled_after, self.scheduled_before)
    }
}

/// Message counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageStats {
    pub queued: i64,
    pub sent: i64,
    pub error: i64,
    pub delivered: i64,
    pub not_delivered: i64,
    pub scheduled: i64,
    pub stopped: i64,
    pub total: i64,
}

impl MessageStats {
    pub fn add(&mut self, status: Status, count: i64) {
        match status {
            Status::Queued => self.queued += count,
            Status::Sent => self.sent += count,
            Status::Error => self.error += count,
            Status::Delivered => self.delivered += count,
            Status::NotDelivered => self.not_delivered += count,
            Status::Scheduled => self.scheduled += count,
            Status::Stopped => self.stopped += count,
        }
        self.total += count;
    }
}

/// Messages sent through one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionCount {
    pub name: String,
    pub count: i64,
}

/// Raw aggregates behind a campaign report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignReportStats {
    /// Segments per message, from any message of the campaign
    pub msg_size: i32,
    /// Earliest queue time among sent messages
    pub first_queued: Epoch,
    /// Latest send time
    pub last_sent: Epoch,
    pub connections: Vec<ConnectionCount>,
}

// ============================================================================
// Campaign
// ============================================================================

/// A message template fanned out over a destination list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Campaign {
    #[serde(rename = "ID")]
    pub id: CampaignId,
    pub description: String,
    pub src: String,
    pub msg: String,
    pub enc: Encoding,
    #[serde(rename = "FileID")]
    pub file_id: FileId,
    pub priority: i32,
    pub send_before: String,
    pub send_after: String,
    pub scheduled_at: Epoch,
    pub is_flash: bool,
    pub mask: bool,
    pub total: i32,
    pub username: String,
    pub submitted_at: Epoch,
}

impl Default for Campaign {
    fn default() -> Self {
        Self {
            id: 0,
            description: String::new(),
            src: String::new(),
            msg: String::new(),
            enc: Encoding::Latin,
            file_id: 0,
            priority: 0,
            send_before: String::new(),
            send_after: String::new(),
            scheduled_at: 0,
            is_flash: false,
            mask: false,
            total: 0,
            username: String::new(),
            submitted_at: 0,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for Campaign {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let enc: String = row.try_get("enc")?;
        Ok(Self {
            id: row.try_get("id")?,
            description: row.try_get("description")?,
            src: row.try_get("src")?,
            msg: row.try_get("msg")?,
            enc: enc.parse().map_err(|e| decode_err("enc", e))?,
            file_id: row.try_get("file_id")?,
            priority: row.try_get("priority")?,
            send_before: row.try_get("send_before")?,
            send_after: row.try_get("send_after")?,
            scheduled_at: row.try_get("scheduled_at")?,
            is_flash: row.try_get("is_flash")?,
            mask: row.try_get("mask")?,
            total: row.try_get("total")?,
            username: row.try_get("username")?,
            submitted_at: row.try_get("submitted_at")?,
        })
    }
}

/// Filters for listing campaigns, keyset paged by submission time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CampaignCriteria {
    #[serde(rename = "ID")]
    pub id: Option<CampaignId>,
    pub username: Option<String>,
    #[serde(rename = "FileID")]
    pub file_id: Option<FileId>,
    pub submitted_after: Option<Epoch>,
    pub submitted_before: Option<Epoch>,
    pub order_by_dir: Option<String>,
    pub from: Option<Epoch>,
    pub per_page: Option<u32>,
}

impl CampaignCriteria {
    pub fn matches(&self, c: &Campaign) -> bool {
        self.id.filter(|v| *v > 0).map(|v| v == c.id).unwrap_or(true)
            && non_empty(&self.username).map(|u| u == c.username).unwrap_or(true)
            && self.file_id.filter(|v| *v > 0).map(|v| v == c.file_id).unwrap_or(true)
            && bound(self.submitted_after).map(|a| c.submitted_at >= a).unwrap_or(true)
            && bound(self.submitted_before).map(|b| c.submitted_at <= b).unwrap_or(true)
    }
}

// ============================================================================
// Destination files
// ============================================================================

/// Accepted destination file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumFileType {
    #[serde(rename = ".csv")]
    Csv,
    #[serde(rename = ".txt")]
    Txt,
    #[serde(rename = ".xlsx")]
    Xlsx,
}

impl NumFileType {
    /// Detect the type from a file name extension
    pub fn from_name(name: &str) -> Result<Self> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(NumFileType::Csv),
            "txt" => Ok(NumFileType::Txt),
            "xlsx" => Ok(NumFileType::Xlsx),
            _ => Err(Error::field(
                "File",
                "Only csv, txt and xlsx files are supported",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NumFileType::Csv => ".csv",
            NumFileType::Txt => ".txt",
            NumFileType::Xlsx => ".xlsx",
        }
    }
}

impl std::str::FromStr for NumFileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NumFileType::from_name(s)
    }
}

/// An uploaded destination list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NumFile {
    #[serde(rename = "ID")]
    pub id: FileId,
    pub name: String,
    pub description: String,
    /// Blob path relative to the file storage root
    #[serde(skip_serializing, default)]
    pub local_name: String,
    #[serde(rename = "Type")]
    pub file_type: NumFileType,
    pub username: String,
    pub submitted_at: Epoch,
    pub deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for NumFile {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let file_type: String = row.try_get("file_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            local_name: row.try_get("local_name")?,
            file_type: file_type.parse().map_err(|e| decode_err("file_type", e))?,
            username: row.try_get("username")?,
            submitted_at: row.try_get("submitted_at")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

/// Filters for listing destination files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NumFileCriteria {
    #[serde(rename = "ID")]
    pub id: Option<FileId>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub deleted: Option<bool>,
    pub submitted_after: Option<Epoch>,
    pub submitted_before: Option<Epoch>,
    pub from: Option<Epoch>,
    pub per_page: Option<u32>,
}

impl NumFileCriteria {
    pub fn matches(&self, f: &NumFile) -> bool {
        self.id.filter(|v| *v > 0).map(|v| v == f.id).unwrap_or(true)
            && non_empty(&self.username).map(|u| u == f.username).unwrap_or(true)
            && non_empty(&self.name).map(|n| n == f.name).unwrap_or(true)
            && self.deleted.map(|d| d == f.deleted).unwrap_or(true)
            && bound(self.submitted_after).map(|a| f.submitted_at >= a).unwrap_or(true)
            && bound(self.submitted_before).map(|b| f.submitted_at <= b).unwrap_or(true)
    }
}

// ============================================================================
// Users and tokens
// ============================================================================

/// An account allowed to use the ingress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    #[serde(rename = "ID")]
    pub id: i64,
    pub username: String,
    /// Argon2 PHC string
    #[serde(skip_serializing, default)]
    pub password: String,
    pub name: String,
    pub email: String,
    pub connection_group: String,
    pub permissions: Vec<Permission>,
    pub registered_at: Epoch,
    pub suspended: bool,
}

impl User {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let permissions: String = row.try_get("permissions")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            connection_group: row.try_get("connection_group")?,
            permissions: Permission::parse_list(&permissions)
                .map_err(|e| decode_err("permissions", e))?,
            registered_at: row.try_get("registered_at")?,
            suspended: row.try_get("suspended")?,
        })
    }
}

/// Days a token stays valid after its last use, unless overridden
pub const DEFAULT_TOKEN_VALIDITY: i32 = 30;

/// An issued API token; `token` holds the digest, never the secret
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Token {
    pub id: i64,
    pub token: String,
    pub username: String,
    pub last_accessed: Epoch,
    pub validity: i32,
}

impl Token {
    /// Whether the token has gone unused for longer than its validity
    pub fn is_expired(&self, now: Epoch) -> bool {
        let validity = if self.validity <= 0 {
            DEFAULT_TOKEN_VALIDITY
        } else {
            self.validity
        };
        self.last_accessed < now - i64::from(validity) * 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: 5,
            username: "alice".to_string(),
            msg: "Your code is XXXX".to_string(),
            dst: "923001234567".to_string(),
            src: "DEMO".to_string(),
            queued_at: 1_000,
            campaign_id: 9,
            ..Default::default()
        }
    }

    #[test]
    fn test_criteria_equality_and_ranges() {
        let m = message();
        assert!(MessageCriteria::default().matches(&m));
        assert!(MessageCriteria {
            campaign_id: Some(9),
            status: Some(Status::Queued),
            queued_after: Some(900),
            queued_before: Some(1_000),
            ..Default::default()
        }
        .matches(&m));
        assert!(!MessageCriteria {
            queued_after: Some(1_001),
            ..Default::default()
        }
        .matches(&m));
        assert!(!MessageCriteria {
            dst: Some("92333".to_string()),
            ..Default::default()
        }
        .matches(&m));
    }

    #[test]
    fn test_criteria_username_pattern_and_text() {
        let m = message();
        assert!(MessageCriteria {
            username: Some("(re)^ali".to_string()),
            ..Default::default()
        }
        .matches(&m));
        assert!(!MessageCriteria {
            username: Some("ali".to_string()),
            ..Default::default()
        }
        .matches(&m));
        assert!(MessageCriteria {
            msg: Some("CODE your".to_string()),
            ..Default::default()
        }
        .matches(&m));
    }

    #[test]
    fn test_paging_defaults() {
        let c = MessageCriteria::default();
        assert_eq!(c.order_key().unwrap(), OrderKey::QueuedAt);
        assert!(!c.ascending());
        assert_eq!(c.limit(), 100);
        assert_eq!(page_size(Some(900_000)), MAX_PER_PAGE);
        assert!(MessageCriteria {
            order_by_key: Some("Dst".to_string()),
            ..Default::default()
        }
        .order_key()
        .is_err());
    }

    #[test]
    fn test_token_expiry() {
        let token = Token {
            id: 1,
            token: "digest".to_string(),
            username: "alice".to_string(),
            last_accessed: 0,
            validity: 0,
        };
        assert!(!token.is_expired(29 * 86_400));
        assert!(token.is_expired(30 * 86_400 + 1));
    }

    #[test]
    fn test_num_file_type() {
        assert_eq!(NumFileType::from_name("list.CSV").unwrap(), NumFileType::Csv);
        assert_eq!(NumFileType::from_name("a.b.xlsx").unwrap(), NumFileType::Xlsx);
        assert!(NumFileType::from_name("numbers.xls").is_err());
        assert!(NumFileType::from_name("numbers").is_err());
    }
}
