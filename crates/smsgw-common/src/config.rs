//! Configuration for smsgw

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "SMSGW_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Message broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// HTTP ingress configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Destination file storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Worker configuration shared by all connections
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Connection groups, one per tenant
    #[serde(default)]
    pub conn_groups: Vec<ConnGroup>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Broker backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    #[default]
    Postgres,
    Memory,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,

    /// Broker URL; the database URL is used when unset
    pub url: Option<String>,

    /// Delay between claim attempts on an empty queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Unsettled deliveries older than this are handed out again
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            url: None,
            poll_interval_ms: default_poll_interval_ms(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_lock_timeout_secs() -> u64 {
    300
}

/// HTTP ingress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Largest accepted destination file upload
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8443
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024 // 5 MiB
}

/// Storage configuration for uploaded destination files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/smsgw/files")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_interval")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scheduler_interval(),
        }
    }
}

fn default_scheduler_interval() -> u64 {
    30
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds allowed for the SMPP bind to complete
    #[serde(default = "default_bind_timeout")]
    pub bind_timeout_secs: u64,

    /// Keepalive period for enquire_link
    #[serde(default = "default_enquire_link")]
    pub enquire_link_secs: u64,

    /// Attempts made while the peer reports throttling
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Optional bound on waiting for a submit_sm_resp
    pub submit_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_timeout_secs: default_bind_timeout(),
            enquire_link_secs: default_enquire_link(),
            retry_count: default_retry_count(),
            submit_timeout_secs: None,
        }
    }
}

fn default_bind_timeout() -> u64 {
    5
}

fn default_enquire_link() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    30
}

/// A group of outbound connections used by one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnGroup {
    pub name: String,

    /// Prefix key used when no connection prefix matches
    pub default_pfx: String,

    #[serde(default)]
    pub conns: Vec<Conn>,
}

/// How long messages are split on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMode {
    /// 6-byte user data header inside the payload
    #[default]
    Udh,
    /// sar_* optional parameters
    Sar,
}

/// One outbound SMPP connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conn {
    pub id: String,

    /// host:port of the SMPP server
    pub url: String,

    pub user: String,

    pub passwd: String,

    /// Submissions allowed per `time` seconds, also the in-flight bound
    pub size: u32,

    /// Rate window in seconds
    pub time: u32,

    /// Destination prefixes served by this connection
    #[serde(default)]
    pub pfxs: Vec<String>,

    /// External command run for mobile-originated messages
    pub receiver: Option<String>,

    #[serde(default)]
    pub segmentation: SegmentMode,

    #[serde(default)]
    pub fields: PduFields,
}

impl Conn {
    /// Minimum spacing between two submissions on this connection
    pub fn rate_interval(&self) -> Duration {
        let size = self.size.max(1) as f64;
        Duration::from_secs_f64(self.time as f64 / size)
    }
}

/// Optional submit_sm fields some providers require
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PduFields {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub replace_if_present_flag: u8,
    pub sm_default_msg_id: u8,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file with `SMSGW__*` environment overrides
    /// layered on top (e.g. `SMSGW__DATABASE__URL`).
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("SMSGW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the explicit path or the default locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/smsgw/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Err(Error::Config("No configuration file found".to_string()))
    }

    /// Sanity checks on connection groups
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for group in &self.conn_groups {
            if group.name.is_empty() {
                return Err(Error::Config("Connection group without a name".to_string()));
            }
            if !names.insert(group.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate connection group {}",
                    group.name
                )));
            }
            let mut ids = HashSet::new();
            for conn in &group.conns {
                if !ids.insert(conn.id.as_str()) {
                    return Err(Error::Config(format!(
                        "Duplicate connection {} in group {}",
                        conn.id, group.name
                    )));
                }
                if conn.size == 0 || conn.time == 0 {
                    return Err(Error::Config(format!(
                        "Connection {} in group {} needs size and time above zero",
                        conn.id, group.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a connection group by name
    pub fn group(&self, name: &str) -> Result<&ConnGroup> {
        self.conn_groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| Error::Config(format!("Unknown connection group {}", name)))
    }

    /// Look up a connection inside a group
    pub fn conn(&self, group: &str, id: &str) -> Result<&Conn> {
        self.group(group)?
            .conns
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| {
                Error::Config(format!("Unknown connection {} in group {}", id, group))
            })
    }

    /// Every routing key a group can publish on
    pub fn keys(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group(group)?.keys())
    }

    /// Broker URL, falling back to the database
    pub fn broker_url(&self) -> &str {
        self.broker.url.as_deref().unwrap_or(&self.database.url)
    }
}

impl ConnGroup {
    /// Routing keys of every connection prefix plus the default prefix
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let prefixes = self
            .conns
            .iter()
            .flat_map(|c| c.pfxs.iter())
            .chain(std::iter::once(&self.default_pfx));
        for pfx in prefixes {
            let key = crate::routing::routing_key(&self.name, pfx);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}
