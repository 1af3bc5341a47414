//! Settings for the roles manager

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RolesError};

/// Record key the roles configuration is stored under.
pub const DEFAULT_ROLES_KEY: &str = "roles_config";

/// Pause between writing the roles config and reading it back.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesSettings {
    pub config_key: String,
    pub settle_delay_ms: u64,
    /// Directory for local draft backups; in-memory backups when unset
    pub backup_dir: Option<PathBuf>,
}

impl Default for RolesSettings {
    fn default() -> Self {
        Self {
            config_key: DEFAULT_ROLES_KEY.to_string(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            backup_dir: None,
        }
    }
}

impl RolesSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Per-user data directory for draft backups.
    pub fn default_backup_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opsdesk")
            .join("drafts")
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_key.trim().is_empty() {
            return Err(RolesError::Settings(
                "config_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
