//! Error types for opsdesk-config

use opsdesk_store::StoreError;
use thiserror::Error;

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main error type for configuration persistence
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Entity store call failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payload could not be serialized or parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A chunk record came back without an id; nothing else was written
    #[error("Failed to create chunk {index}")]
    ChunkCreation { index: usize },

    /// Post-write read-back did not find every record just written
    #[error("Verification failed: Data was not saved correctly. Please retry")]
    VerificationFailed,

    /// One or more fragments of a chunked payload could not be read
    #[error("Chunk integrity failure: {missing} of {total} fragments missing")]
    ChunkIntegrity { missing: usize, total: usize },

    /// Stored content is present but unusable
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Settings failed validation
    #[error("Invalid settings: {0}")]
    Settings(String),
}
