//! opsdesk-roles - roles configuration for the operations dashboard
//!
//! One logical config ("roles_config") stored through
//! [`opsdesk_config::ConfigStore`], edited as a local draft:
//!
//! - **Catalog**: built-in roles, capability flags and pages
//! - **Model**: [`RolesConfig`] with strict/legacy permission semantics
//! - **Manager**: [`RolesManager`] draft state machine and verified saves
//! - **Backup**: local copy of the draft taken before every save

pub mod backup;
pub mod catalog;
pub mod error;
pub mod manager;
pub mod model;
pub mod notify;
pub mod settings;

pub use backup::{BackupEntry, DraftBackup, FileDraftBackup, MemoryDraftBackup};
pub use catalog::{default_config, Capability, ADMIN_ROLE, PAGES, SYSTEM_ROLES, USER_ROLE};
pub use error::{Result, RolesError};
pub use manager::{RolesManager, SyncState};
pub use model::{RoleDefinition, RolesConfig};
pub use notify::{CollectingNotifier, Notifier, Toast, ToastLevel, TracingNotifier};
pub use settings::{RolesSettings, DEFAULT_ROLES_KEY, DEFAULT_SETTLE_DELAY_MS};
