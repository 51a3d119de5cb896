//! Configuration for the relay
//!
//! A flat property store with typed accessors, read from JSON. Defaults
//! are installed at construction so every key always has a value; a config
//! file only needs the keys it overrides.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::navigation::KeyPressPattern;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TN3270_RELAY_CONFIG";

/// Supported configuration value types
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    StringArray(Vec<String>),
}

impl ConfigValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&Vec<String>> {
        match self {
            ConfigValue::StringArray(arr) => Some(arr),
            _ => None,
        }
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::StringArray(value)
    }
}

/// Property-based relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    properties: HashMap<String, ConfigValue>,
}

impl RelayConfig {
    /// Create a configuration holding only defaults
    pub fn new() -> Self {
        let mut config = Self {
            properties: HashMap::new(),
        };
        config.set_defaults();
        config
    }

    fn set_defaults(&mut self) {
        // Record mode
        self.properties.insert("record.connectTimeoutMs".to_string(), 5000i64.into());
        self.properties.insert("record.pollIntervalMs".to_string(), 10i64.into());
        self.properties.insert("record.defaultPort".to_string(), 3270i64.into());
        self.properties.insert("record.minScreenLength".to_string(), 100i64.into());

        // Replay mode
        self.properties.insert(
            "replay.keyPressPatterns".to_string(),
            vec!["?? ?? FF".to_string(), "?? ?? 11".to_string(), "FF EF".to_string()].into(),
        );
        self.properties.insert("replay.keyPressWindow".to_string(), 3i64.into());
        self.properties.insert("replay.defaultsDirectory".to_string(), "".into());
        self.properties.insert("replay.baseDirectory".to_string(), "".into());

        // Logging
        self.properties.insert("logging.file".to_string(), "".into());
    }

    /// Get configuration property as string
    pub fn get_string_property(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(|v| v.as_string().map(|s| s.to_string()))
    }

    /// Get configuration property as integer
    pub fn get_int_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_integer())
    }

    /// Get configuration property as integer with default
    pub fn get_int_property_or(&self, key: &str, default: i64) -> i64 {
        self.get_int_property(key).unwrap_or(default)
    }

    /// Get configuration property as string array
    pub fn get_string_array_property(&self, key: &str) -> Option<&Vec<String>> {
        self.properties.get(key).and_then(|v| v.as_string_array())
    }

    /// Set configuration property
    pub fn set_property<T: Into<ConfigValue>>(&mut self, key: &str, value: T) {
        self.properties.insert(key.to_string(), value.into());
    }

    /// Merge properties from JSON over the current values
    pub fn from_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let loaded: HashMap<String, ConfigValue> = serde_json::from_str(json)?;
        self.properties.extend(loaded);
        Ok(())
    }

    fn millis(&self, key: &str, default: i64) -> Duration {
        let ms = self.get_int_property_or(key, default).max(1);
        Duration::from_millis(ms as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.millis("record.connectTimeoutMs", 5000)
    }

    pub fn poll_interval(&self) -> Duration {
        self.millis("record.pollIntervalMs", 10)
    }

    pub fn default_port(&self) -> u16 {
        u16::try_from(self.get_int_property_or("record.defaultPort", 3270)).unwrap_or(3270)
    }

    pub fn min_screen_length(&self) -> usize {
        usize::try_from(self.get_int_property_or("record.minScreenLength", 100)).unwrap_or(100)
    }

    pub fn key_press_window(&self) -> usize {
        usize::try_from(self.get_int_property_or("replay.keyPressWindow", 3))
            .unwrap_or(3)
            .max(1)
    }

    /// Parse the recognized post-AID byte sequences
    pub fn key_press_patterns(&self) -> Result<Vec<KeyPressPattern>, ConfigError> {
        let Some(raw) = self.get_string_array_property("replay.keyPressPatterns") else {
            return Ok(Vec::new());
        };
        raw.iter()
            .map(|text| {
                text.parse::<KeyPressPattern>().map_err(|reason| ConfigError::InvalidParameter {
                    parameter: "replay.keyPressPatterns".to_string(),
                    value: text.clone(),
                    reason,
                })
            })
            .collect()
    }

    fn optional_path(&self, key: &str) -> Option<PathBuf> {
        self.get_string_property(key)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn defaults_directory(&self) -> Option<PathBuf> {
        self.optional_path("replay.defaultsDirectory")
    }

    pub fn base_directory(&self) -> Option<PathBuf> {
        self.optional_path("replay.baseDirectory")
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.optional_path("logging.file")
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Determine the default config file path.
/// Priority:
/// 1) TN3270_RELAY_CONFIG env var
/// 2) platform config dir, e.g. ~/.config/tn3270-relay/config.json
/// 3) Current directory fallback: ./config.json
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(p);
    }

    dirs::config_dir()
        .map(|base| base.join("tn3270-relay").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load configuration from `path` if it exists; otherwise return defaults.
/// Unreadable or malformed files are reported and ignored.
pub fn load_config(path: &Path) -> RelayConfig {
    let mut config = RelayConfig::new();

    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return config;
    }

    match fs::read_to_string(path) {
        Ok(buf) => {
            if let Err(e) = config.from_json(&buf) {
                warn!("Failed to parse config file {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("Failed to read config file {}: {}", path.display(), e),
    }

    config
}
