//! Local emergency backup of the roles draft.
//!
//! Written synchronously before every save reaches the network, so an
//! unsaved draft survives a failed save or a crash mid-request.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::RolesConfig;

/// A backed-up draft and when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub saved_at: DateTime<Utc>,
    pub config: RolesConfig,
}

impl BackupEntry {
    pub fn now(config: &RolesConfig) -> Self {
        Self {
            saved_at: Utc::now(),
            config: config.clone(),
        }
    }
}

/// Synchronous key/value storage for draft backups.
pub trait DraftBackup: Send + Sync {
    fn write(&self, key: &str, config: &RolesConfig) -> Result<()>;

    fn read(&self, key: &str) -> Result<Option<BackupEntry>>;

    /// Remove the backup for `key`. Missing backups are not an error.
    fn clear(&self, key: &str) -> Result<()>;
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileDraftBackup {
    dir: PathBuf,
}

impl FileDraftBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.draft.json", file))
    }
}

impl DraftBackup for FileDraftBackup {
    fn write(&self, key: &str, config: &RolesConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&BackupEntry::now(config))?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "draft backup written");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<BackupEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local backups, for tests and hosts without a data directory.
#[derive(Debug, Default)]
pub struct MemoryDraftBackup {
    entries: Mutex<HashMap<String, BackupEntry>>,
}

impl MemoryDraftBackup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftBackup for MemoryDraftBackup {
    fn write(&self, key: &str, config: &RolesConfig) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), BackupEntry::now(config));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<BackupEntry>> {
        Ok(self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn clear(&self, key: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }
}
