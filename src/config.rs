//! Configuration for the works-notify client
//!
//! Loaded from a TOML file with one section per concern. Every field has a
//! default matching the production Works Mobile endpoint, so an empty file
//! is a valid configuration.

use crate::transport::mqtt::codec::{DEFAULT_MAX_PACKET_SIZE, MAX_REMAINING_LENGTH};
use crate::transport::mqtt::connection::{ReconnectConfig, SessionSettings};
use crate::transport::mqtt::health_monitor::HealthMonitor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorksConfig {
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub dedup: DedupSection,
}

/// WebSocket endpoint and handshake headers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSocketSection {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
    /// JSON object of cookie name to value, sent as the Cookie header
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
    /// Extra handshake headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            subprotocol: default_subprotocol(),
            cookie_file: default_cookie_file(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_url() -> String {
    "wss://jp1-web-noti.worksmobile.com/wmqtt".to_string()
}

fn default_origin() -> String {
    "https://talk.worksmobile.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_subprotocol() -> String {
    "mqtt".to_string()
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("cookie.json")
}

/// MQTT session parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_protocol_level")]
    pub protocol_level: u8,
    /// Keep alive advertised in CONNECT
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// Interval between PINGREQs
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Unanswered PINGREQs before the connection is considered dead
    #[serde(default = "default_missed_ping_threshold")]
    pub missed_ping_threshold: u32,
    /// Deadline for the WebSocket handshake plus CONNACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Inbound packets declaring more bytes than this force a reconnect
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_username")]
    pub username: String,
    /// Cookie whose value is sent as the CONNECT password
    #[serde(default)]
    pub token_cookie: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            protocol_level: default_protocol_level(),
            keep_alive_secs: default_keep_alive(),
            ping_interval_secs: default_ping_interval(),
            missed_ping_threshold: default_missed_ping_threshold(),
            connect_timeout_secs: default_connect_timeout(),
            max_packet_size: default_max_packet_size(),
            client_id_prefix: default_client_id_prefix(),
            username: default_username(),
            token_cookie: None,
        }
    }
}

fn default_protocol_level() -> u8 {
    4
}

fn default_keep_alive() -> u16 {
    50
}

fn default_ping_interval() -> u64 {
    30
}

fn default_missed_ping_threshold() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_client_id_prefix() -> String {
    "web-beejs_".to_string()
}

fn default_username() -> String {
    "dummy".to_string()
}

impl MqttSection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            protocol_level: self.protocol_level,
            keep_alive_secs: self.keep_alive_secs,
            missed_ping_threshold: self.missed_ping_threshold,
            ping_interval: self.ping_interval(),
            clean_session: true,
        }
    }
}

/// Duplicate suppression bounds; at least one must be set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupSection {
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            retention_secs: Some(600),
            max_entries: Some(4096),
        }
    }
}

impl DedupSection {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to read cookie file {path}: {message}")]
    CookieFile { path: PathBuf, message: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorksConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: WorksConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.websocket.url).map_err(|e| {
            ConfigError::InvalidConfig(format!("websocket.url '{}': {e}", self.websocket.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidConfig(format!(
                "websocket.url must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.ping_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.missed_ping_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.missed_ping_threshold must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.max_packet_size < 2 || self.mqtt.max_packet_size > MAX_REMAINING_LENGTH + 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.max_packet_size must be between 2 and {}",
                MAX_REMAINING_LENGTH + 5
            )));
        }

        HealthMonitor::validate_reconnect_config(&self.reconnect)
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;

        match (self.dedup.retention_secs, self.dedup.max_entries) {
            (None, None) => {
                return Err(ConfigError::InvalidConfig(
                    "dedup needs retention_secs, max_entries, or both".to_string(),
                ))
            }
            (Some(0), _) | (_, Some(0)) => {
                return Err(ConfigError::InvalidConfig(
                    "dedup bounds must be greater than 0".to_string(),
                ))
            }
            _ => {}
        }

        Ok(())
    }

    /// Render as TOML for `config --show`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

fn read_cookie_map(path: &Path) -> Result<HashMap<String, serde_json::Value>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CookieFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::CookieFile {
        path: path.to_path_buf(),
        message: format!("expected a JSON object of cookie values: {e}"),
    })
}

fn cookie_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a `Cookie` header value from a JSON cookie file
///
/// Keys are emitted in sorted order.
pub fn load_cookie_header(path: &Path) -> Result<String, ConfigError> {
    let cookies = read_cookie_map(path)?;
    let mut pairs: Vec<_> = cookies
        .iter()
        .map(|(name, value)| (name.as_str(), cookie_text(value)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    Ok(pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; "))
}

/// Look up a single cookie value from a JSON cookie file
pub fn cookie_value(path: &Path, name: &str) -> Result<Option<String>, ConfigError> {
    Ok(read_cookie_map(path)?.get(name).map(cookie_text))
}
