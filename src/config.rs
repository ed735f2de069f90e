//! Process configuration.
//!
//! Short identifiers (MQTT client id and topic prefix) are bounded
//! `heapless` strings; longer values are ordinary `String`s. Every field has
//! a default, so a JSON file only needs the keys it changes.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::config::{Config, MqttConfig, WebConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.web.port, 3001);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_mqtt(MqttConfig::default().with_host("192.168.1.100"))
//!     .with_web(WebConfig::default().with_port(8080));
//!
//! // Or read JSON
//! let config = Config::from_json_str(r#"{ "web": { "port": 9000 } }"#).unwrap();
//! assert_eq!(config.web.port, 9000);
//! assert_eq!(config.mqtt.broker_port, 1883);
//! ```

use std::path::{Path, PathBuf};

use heapless::String as HString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::HardwareDevice;
use crate::hal::VIRTUAL_DRIVER_NAME;
use crate::locos::SyncLevel;

/// Maximum length for short config strings (client ids, topic prefixes)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for MQTT topics
pub const MAX_TOPIC: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for MQTT topics
pub type TopicString = HString<MAX_TOPIC>;

/// Create a bounded string from a &str, truncating on a char boundary.
pub fn bounded<const N: usize>(s: &str) -> HString<N> {
    let mut out = HString::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The JSON was malformed.
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Web server configuration
    pub web: WebConfig,
    /// MQTT fan-out configuration
    pub mqtt: MqttConfig,
    /// Command station configuration
    pub hardware: HardwareConfig,
    /// Persistence configuration
    pub storage: StorageConfig,
    /// Script runtime configuration
    pub automation: AutomationConfig,
    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig::default(),
            mqtt: MqttConfig::default(),
            hardware: HardwareConfig::default(),
            storage: StorageConfig::default(),
            automation: AutomationConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Parses a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Set web configuration
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Set MQTT configuration
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Set hardware configuration
    pub fn with_hardware(mut self, hardware: HardwareConfig) -> Self {
        self.hardware = hardware;
        self
    }

    /// Set storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set automation configuration
    pub fn with_automation(mut self, automation: AutomationConfig) -> Self {
        self.automation = automation;
        self
    }

    /// Set the log filter
    pub fn with_log_filter(mut self, filter: &str) -> Self {
        self.log_filter = filter.to_string();
        self
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// Web server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebConfig {
    /// Whether the web server is started
    pub enabled: bool,
    /// Port to listen on
    pub port: u16,
    /// Interface to bind
    pub bind_address: String,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3001,
            bind_address: "0.0.0.0".to_string(),
            cors_permissive: true,
        }
    }
}

impl WebConfig {
    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind address
    pub fn with_bind_address(mut self, address: &str) -> Self {
        self.bind_address = address.to_string();
        self
    }

    /// Set CORS mode
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Enable or disable the web server
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `bind_address:port`
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

// ============================================================================
// MQTT Config
// ============================================================================

/// MQTT event fan-out configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttConfig {
    /// Whether events are published
    pub enabled: bool,
    /// Broker hostname or IP
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Client ID (should be unique per controller)
    pub client_id: ShortString,
    /// Topic prefix, e.g. "trainlink" -> "trainlink/routes/turnoutUpdate"
    pub topic_prefix: ShortString,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: bounded("rs-trainlink"),
            topic_prefix: bounded("trainlink"),
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Set the broker host
    pub fn with_host(mut self, host: &str) -> Self {
        self.broker_host = host.to_string();
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.broker_port = port;
        self
    }

    /// Set the client ID
    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_id = bounded(id);
        self
    }

    /// Set the topic prefix
    pub fn with_topic_prefix(mut self, prefix: &str) -> Self {
        self.topic_prefix = bounded(prefix);
        self
    }

    /// Enable or disable publishing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a topic string with the configured prefix
    pub fn topic(&self, suffix: &str) -> TopicString {
        let mut topic = TopicString::new();
        let _ = topic.push_str(self.topic_prefix.as_str());
        let _ = topic.push('/');
        let _ = topic.push_str(suffix);
        topic
    }
}

// ============================================================================
// Hardware Config
// ============================================================================

/// Command station configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HardwareConfig {
    /// Driver selected at startup ("Virtual" or "DCC-EX")
    pub driver: String,
    /// Station address (`host:port`) for network drivers
    pub address: Option<String>,
    /// How long a station gets to announce itself
    pub handshake_timeout_ms: u64,
    /// Extra devices offered for selection
    pub devices: Vec<HardwareDevice>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            driver: VIRTUAL_DRIVER_NAME.to_string(),
            address: None,
            handshake_timeout_ms: 5000,
            devices: Vec::new(),
        }
    }
}

impl HardwareConfig {
    /// Select a driver, with an address for network stations
    pub fn with_driver(mut self, driver: &str, address: Option<&str>) -> Self {
        self.driver = driver.to_string();
        self.address = address.map(str::to_string);
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Add a selectable device
    pub fn with_device(mut self, device: HardwareDevice) -> Self {
        self.devices.push(device);
        self
    }
}

// ============================================================================
// Storage / Automation Config
// ============================================================================

/// Persistence configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// JSON file holding scripts, layout and locos; `None` keeps everything
    /// in memory
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Persist to `path`
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Script runtime configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationConfig {
    /// Sync level of locos bound to scripts
    pub default_sync: SyncLevel,
}
