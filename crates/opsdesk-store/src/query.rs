use serde::{Deserialize, Serialize};

/// Server-side exact-match filter.
///
/// The hosted store's filter is not reliable immediately after writes and
/// may return nothing even when matching rows exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordFilter {
    /// `key == value`
    KeyEq(String),
    /// Legacy `config_key == value`
    ConfigKeyEq(String),
}

impl RecordFilter {
    pub fn matches(&self, record: &crate::record::ConfigRecord) -> bool {
        match self {
            RecordFilter::KeyEq(k) => record.key.as_deref() == Some(k.as_str()),
            RecordFilter::ConfigKeyEq(k) => record.config_key.as_deref() == Some(k.as_str()),
        }
    }
}

/// Sort key for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
}

/// Options for an unfiltered `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub sort: SortField,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl ListOptions {
    /// Most recently updated first, capped at `limit`.
    pub fn recent(limit: usize) -> Self {
        Self {
            sort: SortField::UpdatedAt,
            descending: true,
            limit: Some(limit),
        }
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            sort: SortField::UpdatedAt,
            descending: true,
            limit: None,
        }
    }
}
