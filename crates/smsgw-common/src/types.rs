//! Common types for smsgw

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned message identifier
pub type MessageId = i64;

/// Store-assigned campaign identifier
pub type CampaignId = i64;

/// Store-assigned destination file identifier
pub type FileId = i64;

/// Seconds since the Unix epoch, 0 meaning unset
pub type Epoch = i64;

/// Highest broker priority
pub const MAX_PRIORITY: u8 = 10;

/// Current time as epoch seconds
pub fn now_epoch() -> Epoch {
    chrono::Utc::now().timestamp()
}

/// Lifecycle state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Queued,
    Scheduled,
    Sent,
    Delivered,
    #[serde(rename = "Not Delivered")]
    NotDelivered,
    Error,
    Stopped,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Queued,
        Status::Scheduled,
        Status::Sent,
        Status::Delivered,
        Status::NotDelivered,
        Status::Error,
        Status::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "Queued",
            Status::Scheduled => "Scheduled",
            Status::Sent => "Sent",
            Status::Delivered => "Delivered",
            Status::NotDelivered => "Not Delivered",
            Status::Error => "Error",
            Status::Stopped => "Stopped",
        }
    }

    /// Terminal states are never left, except Error which a retry may requeue
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Delivered | Status::NotDelivered | Status::Error | Status::Stopped
        )
    }

    /// Whether a message may move from `self` to `next`
    pub fn can_transition(&self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Scheduled, Queued) | (Scheduled, Stopped) => true,
            (Queued, Scheduled) | (Queued, Sent) | (Queued, Error) | (Queued, Stopped) => true,
            (Sent, Delivered) | (Sent, NotDelivered) => true,
            (Error, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(Status::Queued),
            "Scheduled" => Ok(Status::Scheduled),
            "Sent" => Ok(Status::Sent),
            "Delivered" => Ok(Status::Delivered),
            "Not Delivered" | "NotDelivered" => Ok(Status::NotDelivered),
            "Error" => Ok(Status::Error),
            "Stopped" => Ok(Status::Stopped),
            other => Err(crate::Error::Request(format!("Unknown status {}", other))),
        }
    }
}

/// Wire text encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Latin,
    Ucs,
}

impl Encoding {
    /// latin for pure ASCII text, ucs otherwise
    pub fn detect(text: &str) -> Self {
        if text.is_ascii() {
            Encoding::Latin
        } else {
            Encoding::Ucs
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Latin => "latin",
            Encoding::Ucs => "ucs",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latin" => Ok(Encoding::Latin),
            "ucs" => Ok(Encoding::Ucs),
            _ => Err(crate::Error::field("Enc", "Encoding can either be latin or UCS")),
        }
    }
}

/// Operations a user may be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "Add users")]
    AddUsers,
    #[serde(rename = "Edit users")]
    EditUsers,
    #[serde(rename = "List users")]
    ListUsers,
    #[serde(rename = "Show config")]
    ShowConfig,
    #[serde(rename = "Edit config")]
    EditConfig,
    #[serde(rename = "Send message")]
    SendMessage,
    #[serde(rename = "List messages")]
    ListMessages,
    #[serde(rename = "List number files")]
    ListNumFiles,
    #[serde(rename = "Delete a number file")]
    DeleteNumFile,
    #[serde(rename = "List campaigns")]
    ListCampaigns,
    #[serde(rename = "Start a campaign")]
    StartCampaign,
    #[serde(rename = "Stop campaign")]
    StopCampaign,
    #[serde(rename = "Retry campaign")]
    RetryCampaign,
    #[serde(rename = "Get status of services")]
    GetStatus,
    #[serde(rename = "Mask Messages")]
    Mask,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::AddUsers,
        Permission::EditUsers,
        Permission::ListUsers,
        Permission::ShowConfig,
        Permission::EditConfig,
        Permission::SendMessage,
        Permission::ListMessages,
        Permission::ListNumFiles,
        Permission::DeleteNumFile,
        Permission::ListCampaigns,
        Permission::StartCampaign,
        Permission::StopCampaign,
        Permission::RetryCampaign,
        Permission::GetStatus,
        Permission::Mask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AddUsers => "Add users",
            Permission::EditUsers => "Edit users",
            Permission::ListUsers => "List users",
            Permission::ShowConfig => "Show config",
            Permission::EditConfig => "Edit config",
            Permission::SendMessage => "Send message",
            Permission::ListMessages => "List messages",
            Permission::ListNumFiles => "List number files",
            Permission::DeleteNumFile => "Delete a number file",
            Permission::ListCampaigns => "List campaigns",
            Permission::StartCampaign => "Start a campaign",
            Permission::StopCampaign => "Stop campaign",
            Permission::RetryCampaign => "Retry campaign",
            Permission::GetStatus => "Get status of services",
            Permission::Mask => "Mask Messages",
        }
    }

    /// Parse a comma separated permission list, skipping blanks
    pub fn parse_list(s: &str) -> crate::Result<Vec<Permission>> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Render a permission list in its stored comma separated form
    pub fn join_list(perms: &[Permission]) -> String {
        perms
            .iter()
            .map(Permission::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| crate::Error::field("Permissions", format!("Invalid permission {}", s)))
    }
}

/// Broker payload referring to a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(rename = "MsgID")]
    pub msg_id: MessageId,
    #[serde(rename = "Total")]
    pub total: i32,
}

impl QueueItem {
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Queue(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::Error::Queue(e.to_string()))
    }
}

/// Priority as published: anything above the maximum becomes the maximum
pub fn clamp_publish_priority(priority: i32) -> u8 {
    if priority < 0 {
        0
    } else if priority > MAX_PRIORITY as i32 {
        MAX_PRIORITY
    } else {
        priority as u8
    }
}

/// Priority as received: anything out of range reads as 0
pub fn clamp_receive_priority(priority: u8) -> u8 {
    if priority > MAX_PRIORITY {
        0
    } else {
        priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_names() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&Status::NotDelivered).unwrap(),
            "\"Not Delivered\""
        );
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for from in Status::ALL {
            if !from.is_terminal() {
                continue;
            }
            for to in Status::ALL {
                let allowed = from.can_transition(to);
                let expected = to == from || (from == Status::Error && to == Status::Queued);
                assert_eq!(allowed, expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_encoding_detect() {
        assert_eq!(Encoding::detect("Hi there"), Encoding::Latin);
        assert_eq!(Encoding::detect("Привет"), Encoding::Ucs);
        assert_eq!(Encoding::detect("café"), Encoding::Ucs);
        assert!("utf8".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_permission_list() {
        let perms = Permission::parse_list("Send message, Mask Messages,,").unwrap();
        assert_eq!(perms, vec![Permission::SendMessage, Permission::Mask]);
        assert_eq!(Permission::join_list(&perms), "Send message,Mask Messages");
        assert!(Permission::parse_list("Fly").is_err());
    }

    #[test]
    fn test_queue_item_wire_format() {
        let item = QueueItem { msg_id: 42, total: 3 };
        assert_eq!(
            String::from_utf8(item.to_bytes().unwrap()).unwrap(),
            r#"{"MsgID":42,"Total":3}"#
        );
        assert_eq!(QueueItem::from_bytes(br#"{"MsgID":7,"Total":1}"#).unwrap().msg_id, 7);
        assert!(QueueItem::from_bytes(b"garbage").is_err());
    }

    #[test]
    fn test_priority_clamping() {
        assert_eq!(clamp_publish_priority(3), 3);
        assert_eq!(clamp_publish_priority(11), 10);
        assert_eq!(clamp_publish_priority(255), 10);
        assert_eq!(clamp_receive_priority(10), 10);
        assert_eq!(clamp_receive_priority(200), 0);
    }
}
