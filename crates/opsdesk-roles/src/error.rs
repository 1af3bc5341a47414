//! Error types for opsdesk-roles

use opsdesk_config::ConfigError;
use thiserror::Error;

/// Result type alias for roles operations
pub type Result<T> = std::result::Result<T, RolesError>;

#[derive(Error, Debug)]
pub enum RolesError {
    /// Persisting or verifying the roles config failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local draft backup could not be read or written
    #[error("Draft backup error: {0}")]
    Backup(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown page: {0}")]
    UnknownPage(String),

    /// `admin` and `user` cannot be deleted
    #[error("Role {0} is a system role and cannot be deleted")]
    SystemRole(String),

    #[error("Role {0} already exists")]
    DuplicateRole(String),

    #[error("Invalid role id: {0:?}")]
    InvalidRoleId(String),

    #[error("Invalid settings: {0}")]
    Settings(String),
}
