use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::query::{ListOptions, RecordFilter, SortField};
use crate::record::{ConfigRecord, RecordDraft, RecordId};
use crate::store::{EntityStore, StoreError};

/// Fault injection knobs mimicking the hosted store's weak guarantees.
#[derive(Debug, Default)]
struct Faults {
    /// `filter` returns nothing.
    blind_filters: bool,
    /// `filter` and `list` omit payload fields.
    shallow_results: bool,
    /// Creates succeed this many more times, then fail.
    creates_remaining: Option<usize>,
    /// `get` reports these ids as absent.
    hidden: HashSet<RecordId>,
    /// `delete` fails for these ids.
    undeletable: HashSet<RecordId>,
    /// Per-field text limit, like the hosted schema's column cap.
    max_field_len: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordId, ConfigRecord>,
    faults: Faults,
}

/// In-memory entity store for tests and local development.
///
/// Behaves like the hosted store when no faults are configured, and can be
/// made to exhibit the failure modes the configuration layer must survive.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    inner: Mutex<Inner>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Storage(format!("lock poisoned: {}", e)))
    }

    /// Make every `filter` call come back empty.
    pub fn set_blind_filters(&self, blind: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.blind_filters = blind;
        }
    }

    /// Strip payload fields from `filter` and `list` results.
    pub fn set_shallow_results(&self, shallow: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.shallow_results = shallow;
        }
    }

    /// Allow `n` more successful creates, then fail every create.
    pub fn fail_creates_after(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.creates_remaining = Some(n);
        }
    }

    /// Make `get` report the record as absent although it is stored.
    pub fn hide(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.hidden.insert(id.to_string());
        }
    }

    /// Make `delete` fail for the record.
    pub fn make_undeletable(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.undeletable.insert(id.to_string());
        }
    }

    /// Clear the undeletable set.
    pub fn allow_deletes(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.undeletable.clear();
        }
    }

    /// Reject writes whose text fields exceed `len` characters.
    pub fn set_max_field_len(&self, len: Option<usize>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.max_field_len = len;
        }
    }

    /// Overwrite a record's store-assigned `updated_at`, to simulate skew.
    pub fn set_updated_at(&self, id: &str, at: DateTime<Utc>) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(r) = inner.records.get_mut(id) {
                r.updated_at = at;
            }
        }
    }

    /// Insert a record verbatim, bypassing `create`. Used to seed legacy rows.
    pub fn insert_raw(&self, record: ConfigRecord) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.records.insert(record.id.clone(), record);
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all stored records, ignoring faults.
    pub fn records(&self) -> Vec<ConfigRecord> {
        self.inner
            .lock()
            .map(|i| i.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored records whose `key` starts with `prefix`.
    pub fn records_with_key_prefix(&self, prefix: &str) -> Vec<ConfigRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.key.as_deref().is_some_and(|k| k.starts_with(prefix)))
            .collect()
    }

    /// Whether a record with this id is stored, ignoring faults.
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .map(|i| i.records.contains_key(id))
            .unwrap_or(false)
    }

    fn check_field_lengths(limit: Option<usize>, draft: &RecordDraft) -> Result<(), StoreError> {
        let Some(limit) = limit else {
            return Ok(());
        };
        let fields = [
            ("value", &draft.value),
            ("description", &draft.description),
            ("app_subtitle", &draft.app_subtitle),
        ];
        for (name, field) in fields {
            if let Some(text) = field {
                if text.chars().count() > limit {
                    return Err(StoreError::Rejected(format!(
                        "field too long: {} ({} > {})",
                        name,
                        text.chars().count(),
                        limit
                    )));
                }
            }
        }
        Ok(())
    }

    fn present(record: &ConfigRecord, shallow: bool) -> ConfigRecord {
        if shallow {
            record.shallow()
        } else {
            record.clone()
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn create(&self, draft: RecordDraft) -> Result<ConfigRecord, StoreError> {
        let mut inner = self.lock()?;
        if let Some(remaining) = inner.faults.creates_remaining.as_mut() {
            if *remaining == 0 {
                return Err(StoreError::Unavailable("create failed".into()));
            }
            *remaining -= 1;
        }
        Self::check_field_lengths(inner.faults.max_field_len, &draft)?;

        let now = Utc::now();
        let mut record = ConfigRecord {
            id: Uuid::new_v4().to_string(),
            key: None,
            config_key: None,
            value: None,
            description: None,
            app_subtitle: None,
            app_name: None,
            is_active: None,
            created_at: now,
            updated_at: now,
        };
        draft.apply_to(&mut record);
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, draft: RecordDraft) -> Result<ConfigRecord, StoreError> {
        let mut inner = self.lock()?;
        Self::check_field_lengths(inner.faults.max_field_len, &draft)?;
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        draft.apply_to(record);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<ConfigRecord>, StoreError> {
        let inner = self.lock()?;
        if inner.faults.hidden.contains(id) {
            return Ok(None);
        }
        Ok(inner.records.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.faults.undeletable.contains(id) {
            return Err(StoreError::Unavailable(format!("delete failed: {}", id)));
        }
        inner
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn filter(&self, filter: &RecordFilter) -> Result<Vec<ConfigRecord>, StoreError> {
        let inner = self.lock()?;
        if inner.faults.blind_filters {
            return Ok(Vec::new());
        }
        let shallow = inner.faults.shallow_results;
        Ok(inner
            .records
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| Self::present(r, shallow))
            .collect())
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<ConfigRecord>, StoreError> {
        let inner = self.lock()?;
        let shallow = inner.faults.shallow_results;
        let mut records: Vec<ConfigRecord> = inner
            .records
            .values()
            .map(|r| Self::present(r, shallow))
            .collect();
        records.sort_by(|a, b| {
            let ord = match options.sort {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            if options.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
