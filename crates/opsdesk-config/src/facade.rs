//! Public read/write API for persisted JSON configuration.

use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use opsdesk_store::{EntityStore, RecordDraft, RecordId};

use crate::chunk::{read_chunks_by_id, read_legacy_chunks, write_chunks};
use crate::cleanup::{CleanupJob, CleanupQueue};
use crate::clock::LogicalClock;
use crate::envelope::{decode, encode, ChunkRefs};
use crate::error::{ConfigError, Result};
use crate::resolver::{discover_and_resolve, Candidate, CandidateSummary, Resolution};
use crate::settings::ConfigStoreSettings;

/// How a save reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// New master with the payload inline.
    Inline,
    /// New master referencing freshly written chunks.
    Chunked,
    /// Existing master overwritten in place.
    UpdatedInPlace,
}

/// What a successful save wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub key: String,
    pub master_id: RecordId,
    pub timestamp: i64,
    pub chunk_ids: Vec<RecordId>,
    pub mode: WriteMode,
    /// Older generations handed to the cleanup queue.
    pub superseded: usize,
}

/// Configuration store over a size-limited, non-transactional entity store.
///
/// Every `save` writes a complete new generation and retires the previous
/// one in the background. Reads discover all candidate generations and
/// pick the one with the greatest logical timestamp.
pub struct ConfigStore {
    store: Arc<dyn EntityStore>,
    settings: ConfigStoreSettings,
    clock: LogicalClock,
    cleanup: CleanupQueue,
}

impl ConfigStore {
    /// Build a store around an injected entity-store client.
    ///
    /// Spawns the cleanup worker, so this must run inside a Tokio runtime.
    pub fn new(store: Arc<dyn EntityStore>, settings: ConfigStoreSettings) -> Result<Self> {
        settings.validate()?;
        let cleanup = CleanupQueue::spawn(Arc::clone(&store));
        Ok(Self {
            store,
            settings,
            clock: LogicalClock::new(),
            cleanup,
        })
    }

    pub fn with_defaults(store: Arc<dyn EntityStore>) -> Result<Self> {
        Self::new(store, ConfigStoreSettings::default())
    }

    pub fn settings(&self) -> &ConfigStoreSettings {
        &self.settings
    }

    pub fn entity_store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn cleanup_queue(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// Load the value stored under `key`, or `fallback` when nothing usable
    /// exists. Never fails.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let Some(value) = self.load_value(key).await else {
            debug!(key = %key, "no stored config, using fallback");
            return fallback;
        };
        match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "stored config has unexpected shape, using fallback");
                fallback
            }
        }
    }

    /// Load the raw JSON stored under `key`.
    ///
    /// Candidates are tried newest first; a generation whose chunks cannot
    /// be reassembled gives way to the next older one still in storage.
    pub async fn load_value(&self, key: &str) -> Option<Value> {
        let resolution = self.resolve(key).await;
        for candidate in resolution.ranked() {
            match self.read_candidate(key, candidate).await {
                Ok(value) => {
                    debug!(
                        key = %key,
                        record_id = %candidate.id(),
                        version = %candidate.envelope.version(),
                        timestamp = candidate.timestamp(),
                        "config loaded"
                    );
                    return Some(value);
                }
                Err(e) => error!(
                    key = %key,
                    record_id = %candidate.id(),
                    error = %e,
                    "config generation unreadable"
                ),
            }
        }
        None
    }

    async fn read_candidate(&self, key: &str, candidate: &Candidate) -> Result<Value> {
        let store = self.store.as_ref();
        let text = match candidate.envelope.chunk_refs() {
            ChunkRefs::Inline => {
                return candidate
                    .envelope
                    .inline_data()
                    .cloned()
                    .ok_or_else(|| ConfigError::Corrupt("inline envelope without data".into()));
            }
            ChunkRefs::Ids(ids) => read_chunks_by_id(store, &ids).await?,
            ChunkRefs::Keyed(pattern) => read_legacy_chunks(store, key, pattern).await?,
        };
        Ok(serde_json::from_str(&text)?)
    }

    /// Persist `data` under `key` as a new generation.
    ///
    /// Payloads whose serialized length exceeds the chunk threshold are
    /// written as chunks first, then a master referencing them. The write is
    /// read back before success is reported, and older generations are
    /// queued for deletion.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<SaveReceipt> {
        let value = serde_json::to_value(data)?;
        let text = value.to_string();
        let previous = self.resolve(key).await;
        let timestamp = self
            .clock
            .next_after(previous.latest_timestamp().unwrap_or(0));

        let chunk_ids = if text.chars().count() > self.settings.chunk_threshold {
            let ids = write_chunks(
                self.store.as_ref(),
                key,
                timestamp,
                &text,
                self.settings.chunk_threshold,
            )
            .await
            .map_err(|partial| {
                if !partial.created.is_empty() {
                    self.cleanup
                        .enqueue(CleanupJob::stray_chunks(key, partial.created.clone()));
                }
                ConfigError::from(partial)
            })?;
            Some(ids)
        } else {
            None
        };

        let master_text = encode(&value, timestamp, chunk_ids.as_deref());
        let master = match self.store.create(self.master_draft(key, master_text)).await {
            Ok(master) if !master.id.is_empty() => master,
            Ok(_) => {
                self.discard_chunks(key, &chunk_ids);
                return Err(ConfigError::Corrupt("master create returned no id".into()));
            }
            Err(e) => {
                error!(key = %key, error = %e, "master create failed");
                self.discard_chunks(key, &chunk_ids);
                return Err(e.into());
            }
        };

        let mode = if chunk_ids.is_some() {
            WriteMode::Chunked
        } else {
            WriteMode::Inline
        };
        let mut receipt = SaveReceipt {
            key: key.to_string(),
            master_id: master.id,
            timestamp,
            chunk_ids: chunk_ids.unwrap_or_default(),
            mode,
            superseded: 0,
        };

        if self.settings.verify_writes {
            self.verify(&receipt).await?;
        }

        receipt.superseded = self.retire(key, &previous, timestamp, None);
        info!(
            key = %key,
            record_id = %receipt.master_id,
            timestamp,
            chunks = receipt.chunk_ids.len(),
            superseded = receipt.superseded,
            "config saved"
        );
        Ok(receipt)
    }

    /// Persist `data` by overwriting the current master in place.
    ///
    /// Records whose payload is empty or unreadable are deleted first and
    /// the write proceeds as a fresh create. Oversized payloads then take
    /// the chunked [`save`](Self::save) path instead.
    pub async fn upsert<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<SaveReceipt> {
        let value = serde_json::to_value(data)?;
        let resolution = self.resolve(key).await;
        for corrupt in resolution.unreadable() {
            warn!(key = %key, record_id = %corrupt.id, "deleting unreadable config record");
            match self.store.delete(&corrupt.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(record_id = %corrupt.id, error = %e, "self-heal delete failed"),
            }
        }

        if value.to_string().chars().count() > self.settings.chunk_threshold {
            debug!(key = %key, "payload exceeds chunk threshold, writing new generation");
            return self.save(key, &value).await;
        }

        let timestamp = self
            .clock
            .next_after(resolution.latest_timestamp().unwrap_or(0));
        let master_text = encode(&value, timestamp, None);

        let updated = match resolution.winner() {
            Some(current) => {
                match self
                    .store
                    .update(current.id(), self.master_draft(key, master_text.clone()))
                    .await
                {
                    Ok(record) => Some((record, current)),
                    Err(e) if e.is_not_found() => {
                        warn!(key = %key, record_id = %current.id(), "master vanished, creating");
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => None,
        };

        let (master_id, mode, in_place) = match updated {
            Some((record, current)) => {
                if current.envelope.is_chunked() {
                    self.cleanup.enqueue(CleanupJob::chunks_of(key, current));
                }
                (record.id, WriteMode::UpdatedInPlace, Some(current.id().to_string()))
            }
            None => {
                let record = self.store.create(self.master_draft(key, master_text)).await?;
                (record.id, WriteMode::Inline, None)
            }
        };

        let superseded = self.retire(key, &resolution, timestamp, in_place.as_deref());
        info!(key = %key, record_id = %master_id, timestamp, mode = ?mode, "config upserted");
        Ok(SaveReceipt {
            key: key.to_string(),
            master_id,
            timestamp,
            chunk_ids: Vec::new(),
            mode,
            superseded,
        })
    }

    /// Re-read everything a save wrote and fail if any of it is missing.
    pub async fn verify(&self, receipt: &SaveReceipt) -> Result<()> {
        let master_ok = match self.store.get(&receipt.master_id).await {
            Ok(Some(record)) => record
                .payload_text()
                .and_then(decode)
                .is_some_and(|env| env.timestamp() == receipt.timestamp),
            Ok(None) => false,
            Err(e) => {
                warn!(record_id = %receipt.master_id, error = %e, "verification read failed");
                false
            }
        };

        let chunk_checks = join_all(receipt.chunk_ids.iter().map(|id| async move {
            matches!(self.store.get(id).await, Ok(Some(r)) if r.fragment_text().is_some())
        }))
        .await;
        let missing_chunks = chunk_checks.iter().filter(|ok| !**ok).count();

        if !master_ok || missing_chunks > 0 {
            error!(
                key = %receipt.key,
                record_id = %receipt.master_id,
                master_ok,
                missing_chunks,
                "write verification failed"
            );
            return Err(ConfigError::VerificationFailed);
        }
        Ok(())
    }

    /// Candidate summaries for `key`, newest first.
    pub async fn inspect(&self, key: &str) -> Vec<CandidateSummary> {
        self.resolve(key).await.summaries()
    }

    async fn resolve(&self, key: &str) -> Resolution {
        discover_and_resolve(self.store.as_ref(), key, self.settings.scan_limit).await
    }

    fn master_draft(&self, key: &str, text: String) -> RecordDraft {
        let draft = RecordDraft::aliased(key, text);
        match &self.settings.app_name {
            Some(name) => draft.with_app_name(name.clone()),
            None => draft,
        }
    }

    /// Queue every generation older than `timestamp` for deletion, except
    /// the record that was just rewritten in place.
    fn retire(
        &self,
        key: &str,
        previous: &Resolution,
        timestamp: i64,
        keep: Option<&str>,
    ) -> usize {
        if !self.settings.cleanup_superseded {
            return 0;
        }
        let mut queued = 0;
        for candidate in previous.ranked() {
            if Some(candidate.id()) == keep || candidate.timestamp() >= timestamp {
                continue;
            }
            self.cleanup.enqueue(CleanupJob::for_candidate(key, candidate));
            queued += 1;
        }
        queued
    }

    fn discard_chunks(&self, key: &str, chunk_ids: &Option<Vec<RecordId>>) {
        if let Some(ids) = chunk_ids {
            if !ids.is_empty() {
                self.cleanup
                    .enqueue(CleanupJob::stray_chunks(key, ids.clone()));
            }
        }
    }
}
