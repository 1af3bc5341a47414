use async_trait::async_trait;

use crate::query::{ListOptions, RecordFilter};
use crate::record::{ConfigRecord, RecordDraft, RecordId};

/// The hosted entity store as seen by the configuration layer.
///
/// Assumed multi-writer with no transactions and no unique constraints.
/// `create` is at-least-once, `filter` may miss rows that exist, and a
/// missing id may surface either as `Ok(None)` or as `StoreError::NotFound`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create a record. Returns the stored record with its assigned id.
    async fn create(&self, draft: RecordDraft) -> Result<ConfigRecord, StoreError>;

    /// Overwrite the given fields of an existing record.
    async fn update(&self, id: &str, draft: RecordDraft) -> Result<ConfigRecord, StoreError>;

    /// Fetch a full record by id.
    async fn get(&self, id: &str) -> Result<Option<ConfigRecord>, StoreError>;

    /// Delete a record by id.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Exact-match filter. Results may be shallow.
    async fn filter(&self, filter: &RecordFilter) -> Result<Vec<ConfigRecord>, StoreError>;

    /// Unfiltered listing, sorted and capped.
    async fn list(&self, options: &ListOptions) -> Result<Vec<ConfigRecord>, StoreError>;
}

/// Errors from the entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
