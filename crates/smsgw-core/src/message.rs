//! Single message ingress: validation, masking, persistence and publish.

use crate::broker::{publish_item, Broker};
use crate::campaign::numbers::{trim_number, valid_number};
use crate::context::require;
use crate::metrics::Metrics;
use crate::smpp::text::{total_segments, MAX_SEGMENTS};
use crate::window;
use regex::Regex;
use serde::Deserialize;
use smsgw_common::routing::resolve_key;
use smsgw_common::types::{now_epoch, Encoding, Epoch, MessageId, Permission, QueueItem, Status};
use smsgw_common::{Config, Error, FieldError, Result};
use smsgw_storage::{Message, MessageCriteria, MessageStats, MessageStore, User};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

const MASK_PATTERN: &str = r"\[\[[^\]]*\]\]";

/// Hides `[[...]]` segments from the stored text.
///
/// `[[1234]]` becomes `XXXX` in the visible text and `1234` in the text
/// put on the wire.
pub struct Masker(Regex);

static SHARED_MASKER: OnceLock<Masker> = OnceLock::new();

impl Masker {
    pub fn new() -> Result<Self> {
        Regex::new(MASK_PATTERN)
            .map(Masker)
            .map_err(|e| Error::Internal(format!("mask pattern: {}", e)))
    }

    /// Process-wide masker, compiled on first use
    pub fn shared() -> Result<&'static Masker> {
        if let Some(masker) = SHARED_MASKER.get() {
            return Ok(masker);
        }
        let masker = Masker::new()?;
        Ok(SHARED_MASKER.get_or_init(|| masker))
    }

    /// Returns `(visible, real)`
    pub fn apply(&self, text: &str) -> (String, String) {
        let visible = self.0.replace_all(text, |caps: &regex::Captures| {
            "X".repeat(inner(&caps[0]).chars().count())
        });
        let real = self
            .0
            .replace_all(text, |caps: &regex::Captures| inner(&caps[0]).to_string());
        (visible.into_owned(), real.into_owned())
    }
}

fn inner(marked: &str) -> &str {
    &marked[2..marked.len() - 2]
}

pub fn mask(text: &str) -> Result<(String, String)> {
    Ok(Masker::shared()?.apply(text))
}

/// Rejects text that needs more segments than a header can number
pub(crate) fn check_length(text: &str) -> Option<FieldError> {
    let total = total_segments(text, Encoding::detect(text));
    (total > MAX_SEGMENTS).then(|| {
        FieldError::new(
            "Msg",
            format!("Message is too long, {} parts exceed the limit of {}", total, MAX_SEGMENTS),
        )
    })
}

/// Field errors shared by message and campaign requests
pub(crate) fn validate_schedule(
    scheduled_at: Epoch,
    send_after: &str,
    send_before: &str,
    now: Epoch,
) -> Vec<FieldError> {
    let mut errors = window::validate(send_after, send_before);
    if scheduled_at != 0 && scheduled_at <= now {
        errors.push(FieldError::new(
            "ScheduledAt",
            "Scheduled time must be in the future",
        ));
    }
    errors
}

/// A message submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NewMessage {
    pub dst: String,
    pub src: String,
    pub msg: String,
    pub priority: i32,
    pub scheduled_at: Epoch,
    pub send_before: String,
    pub send_after: String,
    pub is_flash: bool,
    pub mask: bool,
}

impl NewMessage {
    /// Collect every field error rather than stopping at the first
    pub fn validate(&self, now: Epoch) -> Result<()> {
        let mut errors = Vec::new();
        if !valid_number(trim_number(&self.dst)) {
            errors.push(FieldError::new(
                "Dst",
                "Invalid destination number, must be 5 to 15 characters long",
            ));
        }
        if self.src.trim().is_empty() {
            errors.push(FieldError::new("Src", "Source address can't be empty."));
        }
        if self.msg.is_empty() {
            errors.push(FieldError::new("Msg", "Can't send empty message."));
        }
        errors.extend(check_length(&self.msg));
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

/// Restrict a listing to the caller's rows unless they may see everyone's
pub fn scope_criteria(user: &User, mut criteria: MessageCriteria) -> MessageCriteria {
    if !user.can(Permission::ListMessages) {
        criteria.username = Some(user.username.clone());
    }
    criteria
}

pub struct MessageService {
    config: Arc<Config>,
    store: Arc<dyn MessageStore>,
    broker: Arc<dyn Broker>,
    metrics: Option<Metrics>,
}

impl MessageService {
    pub fn new(config: Arc<Config>, store: Arc<dyn MessageStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            config,
            store,
            broker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist and, unless scheduled, enqueue one message
    pub async fn submit(&self, user: &User, req: NewMessage) -> Result<MessageId> {
        require(user, Permission::SendMessage)?;
        if req.mask {
            require(user, Permission::Mask)?;
        }
        let now = now_epoch();
        req.validate(now)?;

        let (msg, real_msg) = if req.mask {
            mask(&req.msg)?
        } else {
            (req.msg.clone(), req.msg.clone())
        };
        let enc = Encoding::detect(&real_msg);
        let dst = trim_number(&req.dst).to_string();
        let key = resolve_key(&self.config, &user.connection_group, &dst)?;
        let scheduled = req.scheduled_at > 0;

        let m = self
            .store
            .save(Message {
                connection_group: user.connection_group.clone(),
                total: total_segments(&real_msg, enc),
                username: user.username.clone(),
                msg,
                real_msg,
                enc,
                dst,
                src: req.src.trim().to_string(),
                priority: req.priority,
                queued_at: if scheduled { 0 } else { now },
                scheduled_at: req.scheduled_at,
                send_before: req.send_before,
                send_after: req.send_after,
                status: if scheduled {
                    Status::Scheduled
                } else {
                    Status::Queued
                },
                is_flash: req.is_flash,
                ..Default::default()
            })
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics
                .messages_accepted
                .with_label_values(&[&m.connection_group])
                .inc();
        }
        if scheduled {
            info!(msg_id = m.id, scheduled_at = m.scheduled_at, "Message scheduled");
            return Ok(m.id);
        }

        let item = QueueItem {
            msg_id: m.id,
            total: m.total,
        };
        let published = publish_item(self.broker.as_ref(), &key, &item, m.priority).await;
        if let Some(metrics) = &self.metrics {
            metrics.publish_result(published.is_ok());
        }
        if let Err(e) = published {
            error!(msg_id = m.id, key = %key, error = %e, "Couldn't publish message");
            return Err(e);
        }
        info!(msg_id = m.id, key = %key, total = m.total, "Message queued");
        Ok(m.id)
    }

    pub async fn list(&self, user: &User, criteria: MessageCriteria) -> Result<Vec<Message>> {
        self.store.list(&scope_criteria(user, criteria)).await
    }

    pub async fn stats(&self, user: &User, criteria: MessageCriteria) -> Result<MessageStats> {
        self.store.stats(&scope_criteria(user, criteria)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::{Consumer, MemoryBroker};
    use pretty_assertions::assert_eq;
    use smsgw_storage::MemoryMessageStore;

    pub(crate) const CONFIG: &str = r#"
        [database]
        url = "postgres://localhost/smsgw"

        [[conn_groups]]
        name = "Default"
        default_pfx = "92"

        [[conn_groups.conns]]
        id = "c1"
        url = "127.0.0.1:2775"
        user = "u"
        passwd = "p"
        size = 10
        time = 1
        pfxs = ["92300"]
    "#;

    pub(crate) fn user(permissions: Vec<Permission>) -> User {
        User {
            id: 1,
            username: "alice".to_string(),
            password: String::new(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            connection_group: "Default".to_string(),
            permissions,
            registered_at: 0,
            suspended: false,
        }
    }

    fn request(dst: &str, msg: &str) -> NewMessage {
        NewMessage {
            dst: dst.to_string(),
            src: "DEMO".to_string(),
            msg: msg.to_string(),
            ..Default::default()
        }
    }

    fn service() -> (MessageService, Arc<MemoryMessageStore>, Arc<MemoryBroker>) {
        let config = Arc::new(Config::from_toml(CONFIG).unwrap());
        let store = Arc::new(MemoryMessageStore::new());
        let broker = Arc::new(MemoryBroker::new());
        (
            MessageService::new(config, store.clone(), broker.clone()),
            store,
            broker,
        )
    }

    #[test]
    fn test_mask() {
        assert_eq!(
            mask("Your PIN is [[1234]], ref [[ab]]").unwrap(),
            (
                "Your PIN is XXXX, ref XX".to_string(),
                "Your PIN is 1234, ref ab".to_string()
            )
        );
        assert_eq!(mask("plain").unwrap(), ("plain".to_string(), "plain".to_string()));
        assert_eq!(mask("[[]]").unwrap(), (String::new(), String::new()));
    }

    #[test]
    fn test_shared_masker_is_compiled_once() {
        let first = Masker::shared().unwrap();
        let second = Masker::shared().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let req = NewMessage {
            dst: "1234".to_string(),
            send_after: "10:00".to_string(),
            scheduled_at: 5,
            ..Default::default()
        };
        let fields: Vec<String> = match req.validate(100).unwrap_err() {
            Error::Form(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("unexpected error {:?}", other),
        };
        assert_eq!(fields, vec!["Dst", "Src", "Msg", "SendBefore", "ScheduledAt"]);
    }

    #[test]
    fn test_validate_segment_limit() {
        let longest = "a".repeat(153 * 255);
        assert!(request("923001234567", &longest).validate(0).is_ok());

        let err = request("923001234567", &format!("{}a", longest)).validate(0).unwrap_err();
        assert!(matches!(err, Error::Form(ref e) if e.len() == 1 && e[0].field == "Msg"));

        let ucs = "ж".repeat(67 * 255 + 1);
        assert!(request("923001234567", &ucs).validate(0).is_err());
    }

    #[test]
    fn test_validate_window_format() {
        let mut req = request("923001234567", "Hi");
        req.send_after = "24:00".to_string();
        req.send_before = "01:60".to_string();
        assert!(matches!(req.validate(0), Err(Error::Form(e)) if e.len() == 2));
        req.send_after = "23:00".to_string();
        req.send_before = "01:00".to_string();
        assert!(req.validate(0).is_ok());
    }

    #[tokio::test]
    async fn test_submit_short_latin() {
        let (service, store, broker) = service();
        let mut consumer: Box<dyn Consumer> =
            broker.bind("Default", &["92".to_string()]).await.unwrap();

        let id = service
            .submit(&user(vec![Permission::SendMessage]), request("923001234567", "Hi"))
            .await
            .unwrap();

        let m = store.get(id).await.unwrap();
        assert_eq!(m.total, 1);
        assert_eq!(m.status, Status::Queued);
        assert_eq!(m.enc, Encoding::Latin);
        assert_eq!(m.username, "alice");
        assert_eq!(m.connection_group, "Default");
        assert!(m.queued_at > 0);

        let d = consumer.next().await.unwrap().unwrap();
        assert_eq!(d.routing_key(), "Default-92");
        assert_eq!(
            QueueItem::from_bytes(d.body()).unwrap(),
            QueueItem { msg_id: id, total: 1 }
        );
    }

    #[tokio::test]
    async fn test_submit_detects_ucs_and_segments() {
        let (service, store, _broker) = service();
        let text: String = std::iter::repeat('Ж').take(200).collect();
        let id = service
            .submit(&user(vec![Permission::SendMessage]), request("923001234567", &text))
            .await
            .unwrap();
        let m = store.get(id).await.unwrap();
        assert_eq!(m.enc, Encoding::Ucs);
        assert_eq!(m.total, 3);
    }

    #[tokio::test]
    async fn test_submit_masked_needs_permission() {
        let (service, store, _broker) = service();
        let mut req = request("923001234567", "PIN [[4321]]");
        req.mask = true;

        let err = service
            .submit(&user(vec![Permission::SendMessage]), req.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let id = service
            .submit(&user(vec![Permission::SendMessage, Permission::Mask]), req)
            .await
            .unwrap();
        let m = store.get(id).await.unwrap();
        assert_eq!(m.msg, "PIN XXXX");
        assert_eq!(m.wire_text(), "PIN 4321");
    }

    #[tokio::test]
    async fn test_submit_scheduled_is_not_published() {
        let (service, store, broker) = service();
        let _consumer = broker.bind("Default", &["92".to_string()]).await.unwrap();
        let mut req = request("923001234567", "later");
        req.scheduled_at = now_epoch() + 3_600;

        let id = service
            .submit(&user(vec![Permission::SendMessage]), req)
            .await
            .unwrap();
        let m = store.get(id).await.unwrap();
        assert_eq!(m.status, Status::Scheduled);
        assert_eq!(m.queued_at, 0);
    }

    #[tokio::test]
    async fn test_submit_unknown_group_is_config_error() {
        let (service, store, _broker) = service();
        let mut u = user(vec![Permission::SendMessage]);
        u.connection_group = "Nope".to_string();
        let err = service
            .submit(&u, request("923001234567", "Hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(store
            .list(&MessageCriteria::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let (service, store, _broker) = service();
        for username in ["alice", "bob"] {
            store
                .save(Message {
                    username: username.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let own = service
            .list(&user(vec![]), MessageCriteria::default())
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].username, "alice");

        let stats = service
            .stats(&user(vec![Permission::ListMessages]), MessageCriteria::default())
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
    }
}
