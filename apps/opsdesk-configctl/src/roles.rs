//! `roles` subcommand: each edit loads the stored roles, applies one change
//! and saves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Args, Subcommand};

use opsdesk_config::ConfigStore;
use opsdesk_roles::{Capability, RoleDefinition, RolesManager, RolesSettings, SyncState};

#[derive(Args, Debug)]
pub struct RolesArgs {
    /// Directory for local draft backups
    #[arg(long, env = "OPSDESK_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    action: RolesAction,
}

#[derive(Subcommand, Debug)]
enum RolesAction {
    /// Print the stored roles configuration
    Show,
    /// Set a capability flag on a role
    Grant {
        role: String,
        capability: Capability,
        #[arg(long)]
        deny: bool,
    },
    /// Set page visibility on a role
    Page {
        role: String,
        page: String,
        #[arg(long)]
        deny: bool,
    },
    /// Switch a role between strict and legacy permission semantics
    Mode {
        role: String,
        #[arg(long)]
        legacy: bool,
    },
    /// Assign a user to a role, or unassign with no role
    Assign { user: String, role: Option<String> },
    /// Add an empty strict role
    Add { id: String, name: String },
    /// Delete a role; its users fall back to `user`
    Delete { id: String },
    /// Save the draft left behind by a failed save
    Recover,
}

pub async fn run(args: RolesArgs, configs: Arc<ConfigStore>) -> anyhow::Result<()> {
    let settings = RolesSettings {
        backup_dir: Some(
            args.backup_dir
                .unwrap_or_else(RolesSettings::default_backup_dir),
        ),
        ..Default::default()
    };
    let mut manager = RolesManager::new(configs, settings)?;
    manager.load().await;

    match args.action {
        RolesAction::Show => {
            println!("{}", serde_json::to_string_pretty(manager.draft())?);
            return Ok(());
        }
        RolesAction::Grant {
            role,
            capability,
            deny,
        } => manager.update_permission(&role, capability, !deny)?,
        RolesAction::Page { role, page, deny } => {
            manager.update_page_permission(&role, &page, !deny)?
        }
        RolesAction::Mode { role, legacy } => manager.set_role_mode(&role, !legacy)?,
        RolesAction::Assign { user, role } => {
            manager.update_user_assignment(&user, role.as_deref())?
        }
        RolesAction::Add { id, name } => manager.add_role(&id, RoleDefinition::new(name))?,
        RolesAction::Delete { id } => {
            let moved = manager.delete_role(&id)?;
            eprintln!("{} user(s) moved to the user role", moved);
        }
        RolesAction::Recover => {
            if !manager.recover_backup()? {
                return Err(anyhow!("no draft backup found"));
            }
        }
    }

    if manager.state() != SyncState::Dirty {
        return Ok(());
    }
    let receipt = manager.save_config().await?;
    println!("roles saved as {} at {}", receipt.master_id, receipt.timestamp);
    Ok(())
}
