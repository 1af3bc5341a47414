//! Draft tracking and persistence for the roles configuration.
//!
//! ```text
//! Loading ──load──▶ Clean ──edit──▶ Dirty ──save──▶ Saving ──ok──▶ Clean
//!                                     ▲                │
//!                                     └──── Failed ◀───┘ (edits kept)
//! ```
//!
//! Edits only touch the in-memory draft. While the draft has unsaved edits
//! a refresh from the server does not overwrite it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use opsdesk_config::{ConfigError, ConfigStore, SaveReceipt};

use crate::backup::{DraftBackup, FileDraftBackup, MemoryDraftBackup};
use crate::catalog::{self, default_config, Capability};
use crate::error::{Result, RolesError};
use crate::model::{RoleDefinition, RolesConfig};
use crate::notify::{Notifier, Toast, TracingNotifier};
use crate::settings::RolesSettings;

/// Where the draft stands relative to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Initial fetch in flight
    Loading,
    /// Draft matches the last loaded or saved server state
    Clean,
    /// Draft has unsaved edits
    Dirty,
    Saving,
    /// Last save failed; draft still has its unsaved edits
    Failed(String),
}

impl SyncState {
    pub fn has_unsaved_edits(&self) -> bool {
        matches!(self, SyncState::Dirty | SyncState::Failed(_))
    }
}

pub struct RolesManager {
    configs: Arc<ConfigStore>,
    settings: RolesSettings,
    backup: Box<dyn DraftBackup>,
    notifier: Arc<dyn Notifier>,
    /// Last configuration read from or written to the store
    server: Option<RolesConfig>,
    draft: RolesConfig,
    state: watch::Sender<SyncState>,
}

impl RolesManager {
    /// Create a manager in the `Loading` state; call [`load`](Self::load) next.
    ///
    /// Draft backups go to `settings.backup_dir` when set and stay in
    /// memory otherwise.
    pub fn new(configs: Arc<ConfigStore>, settings: RolesSettings) -> Result<Self> {
        settings.validate()?;
        let backup: Box<dyn DraftBackup> = match &settings.backup_dir {
            Some(dir) => Box::new(FileDraftBackup::new(dir.clone())),
            None => Box::new(MemoryDraftBackup::new()),
        };
        let (state, _) = watch::channel(SyncState::Loading);
        Ok(Self {
            configs,
            settings,
            backup,
            notifier: Arc::new(TracingNotifier),
            server: None,
            draft: default_config(),
            state,
        })
    }

    pub fn with_backup(mut self, backup: Box<dyn DraftBackup>) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn draft(&self) -> &RolesConfig {
        &self.draft
    }

    pub fn server_config(&self) -> Option<&RolesConfig> {
        self.server.as_ref()
    }

    pub fn settings(&self) -> &RolesSettings {
        &self.settings
    }

    fn set_state(&self, state: SyncState) {
        debug!(key = %self.settings.config_key, state = ?state, "roles state");
        self.state.send_replace(state);
    }

    async fn fetch(&self) -> Option<RolesConfig> {
        self.configs
            .load(&self.settings.config_key, None::<RolesConfig>)
            .await
            .map(RolesConfig::with_system_roles)
    }

    /// Initial fetch. Seeds the draft from the catalog when nothing is stored.
    pub async fn load(&mut self) {
        self.set_state(SyncState::Loading);
        self.server = self.fetch().await;
        self.draft = self.server.clone().unwrap_or_else(default_config);
        info!(
            key = %self.settings.config_key,
            stored = self.server.is_some(),
            roles = self.draft.roles.len(),
            "roles config loaded"
        );
        self.set_state(SyncState::Clean);
    }

    /// Re-read the server config. Returns whether the draft was replaced;
    /// a draft with unsaved edits is kept as is.
    pub async fn refresh(&mut self) -> bool {
        let fetched = self.fetch().await;
        self.server = fetched;
        if self.state().has_unsaved_edits() {
            debug!(key = %self.settings.config_key, "draft has unsaved edits, not hydrating");
            return false;
        }
        self.draft = self.server.clone().unwrap_or_else(default_config);
        self.set_state(SyncState::Clean);
        true
    }

    fn role_mut(&mut self, role_id: &str) -> Result<&mut RoleDefinition> {
        self.draft
            .roles
            .get_mut(role_id)
            .ok_or_else(|| RolesError::UnknownRole(role_id.to_string()))
    }

    fn mark_dirty(&self) {
        if !self.state().has_unsaved_edits() {
            self.set_state(SyncState::Dirty);
        }
    }

    pub fn update_permission(
        &mut self,
        role_id: &str,
        capability: Capability,
        allowed: bool,
    ) -> Result<()> {
        self.role_mut(role_id)?
            .permissions
            .insert(capability.as_str().to_string(), allowed);
        self.mark_dirty();
        Ok(())
    }

    pub fn update_page_permission(&mut self, role_id: &str, page: &str, allowed: bool) -> Result<()> {
        if !catalog::is_known_page(page) {
            return Err(RolesError::UnknownPage(page.to_string()));
        }
        self.role_mut(role_id)?
            .pages
            .insert(page.to_string(), allowed);
        self.mark_dirty();
        Ok(())
    }

    /// Switch a role between strict and legacy semantics without changing
    /// what it grants.
    pub fn set_role_mode(&mut self, role_id: &str, strict: bool) -> Result<()> {
        let role = self.role_mut(role_id)?;
        if role.is_strict == strict {
            return Ok(());
        }
        role.materialize(role_id);
        role.is_strict = strict;
        self.mark_dirty();
        Ok(())
    }

    /// Assign `user_id` to `role_id`, or remove the assignment with `None`.
    pub fn update_user_assignment(&mut self, user_id: &str, role_id: Option<&str>) -> Result<()> {
        match role_id {
            Some(role_id) => {
                if !self.draft.roles.contains_key(role_id) {
                    return Err(RolesError::UnknownRole(role_id.to_string()));
                }
                self.draft
                    .user_assignments
                    .insert(user_id.to_string(), role_id.to_string());
            }
            None => {
                self.draft.user_assignments.remove(user_id);
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn add_role(&mut self, role_id: &str, mut definition: RoleDefinition) -> Result<()> {
        let valid = !role_id.is_empty()
            && role_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RolesError::InvalidRoleId(role_id.to_string()));
        }
        if self.draft.roles.contains_key(role_id) {
            return Err(RolesError::DuplicateRole(role_id.to_string()));
        }
        definition.is_system = false;
        self.draft.roles.insert(role_id.to_string(), definition);
        self.mark_dirty();
        Ok(())
    }

    /// Delete a role and move its users to the default user role.
    /// Returns how many users were reassigned.
    pub fn delete_role(&mut self, role_id: &str) -> Result<usize> {
        let is_system = match self.draft.roles.get(role_id) {
            Some(role) => role.is_system || catalog::is_system_role(role_id),
            None => return Err(RolesError::UnknownRole(role_id.to_string())),
        };
        if is_system {
            return Err(RolesError::SystemRole(role_id.to_string()));
        }
        self.draft.roles.remove(role_id);
        let mut reassigned = 0;
        for assigned in self.draft.user_assignments.values_mut() {
            if assigned == role_id {
                *assigned = catalog::USER_ROLE.to_string();
                reassigned += 1;
            }
        }
        self.mark_dirty();
        Ok(reassigned)
    }

    /// Persist the draft.
    ///
    /// The draft is sanitized, backed up locally, written, and read back
    /// after the settle delay. On failure the draft keeps its edits, the
    /// state becomes `Failed` and an error toast is raised.
    pub async fn save_config(&mut self) -> Result<SaveReceipt> {
        self.set_state(SyncState::Saving);
        let sanitized = self.draft.sanitized();

        match self.persist(&sanitized).await {
            Ok(receipt) => {
                if let Err(e) = self.backup.clear(&self.settings.config_key) {
                    warn!(error = %e, "could not clear draft backup");
                }
                self.server = Some(sanitized.clone());
                self.draft = sanitized;
                self.set_state(SyncState::Clean);
                self.notifier
                    .notify(Toast::success("Roles saved", "Role configuration saved"));
                Ok(receipt)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(key = %self.settings.config_key, error = %message, "roles save failed");
                self.set_state(SyncState::Failed(message.clone()));
                self.notifier.notify(Toast::error(
                    "Save failed",
                    format!("Could not save role configuration: {}", message),
                ));
                Err(e)
            }
        }
    }

    async fn persist(&self, config: &RolesConfig) -> Result<SaveReceipt> {
        let key = &self.settings.config_key;
        if let Err(e) = self.backup.write(key, config) {
            warn!(key = %key, error = %e, "draft backup failed, saving anyway");
        }

        let receipt = self.configs.upsert(key, config).await?;
        tokio::time::sleep(self.settings.settle_delay()).await;
        self.confirm(&receipt).await?;
        Ok(receipt)
    }

    /// Re-read the written record and require non-empty content.
    async fn confirm(&self, receipt: &SaveReceipt) -> Result<()> {
        let record = self
            .configs
            .entity_store()
            .get(&receipt.master_id)
            .await
            .map_err(ConfigError::from)?;
        match record {
            Some(record) if record.has_payload() => Ok(()),
            _ => Err(ConfigError::VerificationFailed.into()),
        }
    }

    /// Drop unsaved edits and return to the last known server config, or
    /// the catalog when nothing was ever stored.
    pub fn reset_config(&mut self) {
        self.draft = self.server.clone().unwrap_or_else(default_config);
        if let Err(e) = self.backup.clear(&self.settings.config_key) {
            warn!(error = %e, "could not clear draft backup");
        }
        self.set_state(SyncState::Clean);
    }

    /// Restore the draft from the local backup of an unsaved save attempt.
    /// Returns whether a backup was found.
    pub fn recover_backup(&mut self) -> Result<bool> {
        let Some(entry) = self.backup.read(&self.settings.config_key)? else {
            return Ok(false);
        };
        info!(saved_at = %entry.saved_at, "restoring roles draft from backup");
        self.draft = entry.config.with_system_roles();
        self.set_state(SyncState::Dirty);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{CollectingNotifier, ToastLevel};
    use opsdesk_config::{ConfigStoreSettings, WriteMode};
    use opsdesk_store::InMemoryEntityStore;

    fn quick_settings() -> RolesSettings {
        RolesSettings {
            settle_delay_ms: 0,
            ..Default::default()
        }
    }

    async fn manager() -> (Arc<InMemoryEntityStore>, Arc<CollectingNotifier>, RolesManager) {
        manager_with(ConfigStoreSettings::default()).await
    }

    /// Manager whose roles payload never reaches the chunk threshold.
    async fn inline_manager() -> (Arc<InMemoryEntityStore>, Arc<CollectingNotifier>, RolesManager)
    {
        manager_with(ConfigStoreSettings {
            chunk_threshold: 100_000,
            ..Default::default()
        })
        .await
    }

    async fn manager_with(
        config_settings: ConfigStoreSettings,
    ) -> (Arc<InMemoryEntityStore>, Arc<CollectingNotifier>, RolesManager) {
        let store = Arc::new(InMemoryEntityStore::new());
        let configs = Arc::new(ConfigStore::new(store.clone(), config_settings).unwrap());
        let notifier = Arc::new(CollectingNotifier::new());
        let mut roles = RolesManager::new(configs, quick_settings())
            .unwrap()
            .with_notifier(notifier.clone());
        assert_eq!(roles.state(), SyncState::Loading);
        roles.load().await;
        (store, notifier, roles)
    }

    #[tokio::test]
    async fn empty_store_seeds_catalog() {
        let (_store, _notifier, roles) = manager().await;
        assert_eq!(roles.state(), SyncState::Clean);
        assert!(roles.server_config().is_none());
        assert_eq!(roles.draft(), &default_config());
    }

    #[tokio::test]
    async fn edits_mark_dirty_and_save_cleans() {
        let (store, notifier, mut roles) = manager().await;
        roles
            .update_permission("manager", Capability::CanEditSalary, true)
            .unwrap();
        assert_eq!(roles.state(), SyncState::Dirty);

        let receipt = roles.save_config().await.unwrap();
        assert_eq!(roles.state(), SyncState::Clean);
        assert!(store.contains(&receipt.master_id));
        assert_eq!(notifier.last().unwrap().level, ToastLevel::Success);
        assert!(roles.draft().allows("manager", Capability::CanEditSalary));
        assert_eq!(roles.server_config(), Some(roles.draft()));
    }

    #[tokio::test]
    async fn saved_draft_is_sanitized() {
        let (_store, _notifier, mut roles) = manager().await;
        roles
            .update_permission("hr", Capability::CanEditSalary, false)
            .unwrap();
        roles.save_config().await.unwrap();
        assert!(!roles.draft().roles["hr"]
            .permissions
            .contains_key("canEditSalary"));
        assert!(!roles.draft().allows("hr", Capability::CanEditSalary));
    }

    #[tokio::test]
    async fn refresh_keeps_unsaved_edits() {
        let (_store, _notifier, mut roles) = manager().await;
        roles
            .update_user_assignment("user-7", Some("maintenance"))
            .unwrap();
        assert!(!roles.refresh().await);
        assert_eq!(roles.draft().role_of("user-7"), "maintenance");

        roles.reset_config();
        assert_eq!(roles.state(), SyncState::Clean);
        assert_eq!(roles.draft().role_of("user-7"), "user");
        assert!(roles.refresh().await);
    }

    #[tokio::test]
    async fn system_roles_cannot_be_deleted() {
        let (_store, _notifier, mut roles) = manager().await;
        assert!(matches!(roles.delete_role("admin"), Err(RolesError::SystemRole(_))));
        assert!(matches!(roles.delete_role("user"), Err(RolesError::SystemRole(_))));
        assert!(matches!(roles.delete_role("nope"), Err(RolesError::UnknownRole(_))));
        assert_eq!(roles.state(), SyncState::Clean);
    }

    #[tokio::test]
    async fn deleting_a_role_reassigns_its_users() {
        let (_store, _notifier, mut roles) = manager().await;
        roles
            .add_role("contractor", RoleDefinition::new("Contractor").with_page("dashboard", true))
            .unwrap();
        roles.update_user_assignment("u1", Some("contractor")).unwrap();
        roles.update_user_assignment("u2", Some("contractor")).unwrap();
        roles.update_user_assignment("u3", Some("hr")).unwrap();

        assert_eq!(roles.delete_role("contractor").unwrap(), 2);
        assert_eq!(roles.draft().role_of("u1"), "user");
        assert_eq!(roles.draft().role_of("u3"), "hr");
    }

    #[tokio::test]
    async fn add_role_validates_id() {
        let (_store, _notifier, mut roles) = manager().await;
        assert!(matches!(
            roles.add_role("", RoleDefinition::new("x")),
            Err(RolesError::InvalidRoleId(_))
        ));
        assert!(matches!(
            roles.add_role("hr", RoleDefinition::new("x")),
            Err(RolesError::DuplicateRole(_))
        ));
        let mut sneaky = RoleDefinition::new("Sneaky");
        sneaky.is_system = true;
        roles.add_role("sneaky", sneaky).unwrap();
        assert!(!roles.draft().roles["sneaky"].is_system);
        roles.delete_role("sneaky").unwrap();
    }

    #[tokio::test]
    async fn set_role_mode_preserves_grants() {
        let (_store, _notifier, mut roles) = manager().await;
        roles.set_role_mode("hr", false).unwrap();
        assert_eq!(roles.state(), SyncState::Dirty);
        let hr = &roles.draft().roles["hr"];
        assert!(!hr.is_strict);
        assert_eq!(hr.permissions.get("canManageRoles"), Some(&false));
        assert!(roles.draft().allows("hr", Capability::CanEditSalary));
        assert!(!roles.draft().allows("hr", Capability::CanManageRoles));
        assert!(!roles.draft().page_allowed("hr", "settings"));
    }

    #[tokio::test]
    async fn unknown_page_rejected() {
        let (_store, _notifier, mut roles) = manager().await;
        assert!(matches!(
            roles.update_page_permission("hr", "payroll-export", true),
            Err(RolesError::UnknownPage(_))
        ));
        roles.update_page_permission("hr", "maintenance", true).unwrap();
        assert!(roles.draft().page_allowed("hr", "maintenance"));
    }

    #[tokio::test]
    async fn failed_inline_save_keeps_draft_and_backup() {
        let (store, notifier, mut roles) = inline_manager().await;
        roles
            .update_permission("user", Capability::CanViewReports, true)
            .unwrap();
        store.fail_creates_after(0);

        assert!(roles.save_config().await.is_err());
        assert!(matches!(roles.state(), SyncState::Failed(_)));
        assert!(roles.state().has_unsaved_edits());
        assert!(roles.draft().allows("user", Capability::CanViewReports));
        let toast = notifier.last().unwrap();
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(
            toast.message,
            "Could not save role configuration: Store error: Store unavailable: create failed"
        );

        roles.reset_config();
        assert!(!roles.draft().allows("user", Capability::CanViewReports));
        assert!(!roles.recover_backup().unwrap());
    }

    #[tokio::test]
    async fn failed_chunked_save_reports_chunk_index() {
        let (store, notifier, mut roles) = manager().await;
        roles.update_user_assignment("u1", Some("hr")).unwrap();
        store.fail_creates_after(0);

        roles.save_config().await.unwrap_err();
        assert!(roles.state().has_unsaved_edits());
        assert_eq!(roles.draft().role_of("u1"), "hr");
        assert_eq!(
            notifier.last().unwrap().message,
            "Could not save role configuration: Failed to create chunk 0"
        );
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn small_payload_saves_inline_then_in_place() {
        let (_store, _notifier, mut roles) = inline_manager().await;
        roles.update_user_assignment("u1", Some("hr")).unwrap();
        let first = roles.save_config().await.unwrap();
        assert_eq!(first.mode, WriteMode::Inline);
        roles.update_user_assignment("u2", Some("hr")).unwrap();
        let second = roles.save_config().await.unwrap();
        assert_eq!(second.mode, WriteMode::UpdatedInPlace);
        assert_eq!(second.master_id, first.master_id);
    }

    #[tokio::test]
    async fn backup_recovers_failed_draft() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = RolesSettings {
            backup_dir: Some(dir.path().to_path_buf()),
            ..quick_settings()
        };
        let store = Arc::new(InMemoryEntityStore::new());
        let configs = Arc::new(ConfigStore::with_defaults(store.clone()).unwrap());

        let mut roles = RolesManager::new(configs.clone(), settings.clone()).unwrap();
        roles.load().await;
        roles.update_user_assignment("u9", Some("hr")).unwrap();
        store.fail_creates_after(0);
        roles.save_config().await.unwrap_err();

        // A new session finds nothing stored but the local draft survives.
        let mut fresh = RolesManager::new(configs, settings).unwrap();
        fresh.load().await;
        assert_eq!(fresh.draft().role_of("u9"), "user");
        assert!(fresh.recover_backup().unwrap());
        assert_eq!(fresh.state(), SyncState::Dirty);
        assert_eq!(fresh.draft().role_of("u9"), "hr");
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let (_store, _notifier, mut roles) = manager().await;
        let mut rx = roles.subscribe();
        roles.update_permission("hr", Capability::IsAdmin, false).unwrap();
        roles.save_config().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncState::Clean);
    }
}
