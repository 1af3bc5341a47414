//! Settings for the configuration store
//!
//! Tunables for chunking, discovery and write verification. Defaults match
//! the hosted store's per-field text limit with margin for envelope overhead.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Fragment size in characters for chunked payloads.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 1500;

/// Rows examined by the fallback scan when both key filters come back empty.
pub const DEFAULT_SCAN_LIMIT: usize = 100;

/// Configuration store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigStoreSettings {
    /// Serialized payloads longer than this are split into chunks
    pub chunk_threshold: usize,
    /// Size of the bounded most-recently-updated scan
    pub scan_limit: usize,
    /// Re-read every written record before reporting success
    pub verify_writes: bool,
    /// Delete superseded generations after a verified save
    pub cleanup_superseded: bool,
    /// Value written to `app_name` on master records
    pub app_name: Option<String>,
}

impl Default for ConfigStoreSettings {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            scan_limit: DEFAULT_SCAN_LIMIT,
            verify_writes: true,
            cleanup_superseded: true,
            app_name: None,
        }
    }
}

impl ConfigStoreSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML string
    #[cfg(feature = "toml-config")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Serialize settings to TOML
    #[cfg(feature = "toml-config")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load settings from a JSON string
    pub fn from_json(json_str: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if self.chunk_threshold == 0 {
            return Err(ConfigError::Settings(
                "chunk_threshold must be positive".to_string(),
            ));
        }
        if self.scan_limit == 0 {
            return Err(ConfigError::Settings(
                "scan_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
