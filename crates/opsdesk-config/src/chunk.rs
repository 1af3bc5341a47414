//! Splitting oversized JSON across chunk records and reassembling it.

use futures::future::join_all;
use tracing::{debug, error, warn};

use opsdesk_store::{ConfigRecord, EntityStore, RecordDraft, RecordFilter, RecordId};

use crate::envelope::{versioned_chunk_key, ChunkKeyPattern};
use crate::error::{ConfigError, Result};

/// Split `text` into contiguous fragments of at most `threshold` characters.
///
/// Splits on char boundaries. Empty input yields no fragments, and a length
/// that is an exact multiple of `threshold` yields no trailing empty fragment.
pub fn split_fragments(text: &str, threshold: usize) -> Vec<&str> {
    let threshold = threshold.max(1);
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (offset, _) in text.char_indices() {
        if chars == threshold {
            fragments.push(&text[start..offset]);
            start = offset;
            chars = 0;
        }
        chars += 1;
    }
    if start < text.len() {
        fragments.push(&text[start..]);
    }
    fragments
}

/// A chunked write that stopped at `index`; `created` holds the chunk
/// records that were written before the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialChunkWrite {
    pub index: usize,
    pub created: Vec<RecordId>,
}

impl From<PartialChunkWrite> for ConfigError {
    fn from(partial: PartialChunkWrite) -> Self {
        ConfigError::ChunkCreation {
            index: partial.index,
        }
    }
}

/// Persist `text` as chunk records, one per fragment, in fragment order.
///
/// Creates run sequentially so creation order matches fragment index. Each
/// chunk carries the diagnostic key `{key}_{ts}_chunk_{i}`; readers address
/// chunks by the returned ids, not by that key.
pub async fn write_chunks(
    store: &dyn EntityStore,
    logical_key: &str,
    timestamp: i64,
    text: &str,
    threshold: usize,
) -> std::result::Result<Vec<RecordId>, PartialChunkWrite> {
    let fragments = split_fragments(text, threshold);
    let mut ids = Vec::with_capacity(fragments.len());
    for (index, fragment) in fragments.iter().enumerate() {
        let chunk_key = versioned_chunk_key(logical_key, timestamp, index);
        match store.create(RecordDraft::aliased(&chunk_key, *fragment)).await {
            Ok(record) if !record.id.is_empty() => {
                debug!(key = %logical_key, chunk = index, record_id = %record.id, "chunk created");
                ids.push(record.id);
            }
            Ok(_) => {
                error!(key = %logical_key, chunk = index, "chunk create returned no id");
                return Err(PartialChunkWrite {
                    index,
                    created: ids,
                });
            }
            Err(e) => {
                error!(key = %logical_key, chunk = index, error = %e, "chunk create failed");
                return Err(PartialChunkWrite {
                    index,
                    created: ids,
                });
            }
        }
    }
    Ok(ids)
}

/// Fetch chunk records by id in parallel and concatenate them in list order.
///
/// A failed or empty fetch does not abort the batch, but any missing
/// fragment fails the read: partial data is never reassembled.
pub async fn read_chunks_by_id(store: &dyn EntityStore, ids: &[RecordId]) -> Result<String> {
    let fetches = ids.iter().map(|id| async move {
        match store.get(id).await {
            Ok(Some(record)) => record.fragment_text().map(str::to_owned),
            Ok(None) => None,
            Err(e) => {
                warn!(record_id = %id, error = %e, "chunk fetch failed");
                None
            }
        }
    });
    let fragments = join_all(fetches).await;
    assemble(fragments)
}

/// Reassemble a legacy chunked payload found by naming convention.
///
/// For each index the newest `updated_at` among duplicate matches wins, and
/// shallow filter results are completed with a full `get`.
pub async fn read_legacy_chunks(
    store: &dyn EntityStore,
    logical_key: &str,
    pattern: ChunkKeyPattern,
) -> Result<String> {
    let keys = pattern.keys(logical_key);
    let fetches = keys.iter().map(|chunk_key| async move {
        let newest = find_by_key(store, chunk_key)
            .await
            .into_iter()
            .max_by_key(|r| r.updated_at)?;
        if let Some(text) = newest.fragment_text() {
            return Some(text.to_owned());
        }
        match store.get(&newest.id).await {
            Ok(Some(full)) => full.fragment_text().map(str::to_owned),
            Ok(None) => None,
            Err(e) => {
                warn!(chunk_key = %chunk_key, error = %e, "legacy chunk fetch failed");
                None
            }
        }
    });
    let fragments = join_all(fetches).await;
    assemble(fragments)
}

/// Every record id stored under any of the pattern's chunk keys.
pub async fn legacy_chunk_ids(
    store: &dyn EntityStore,
    logical_key: &str,
    pattern: ChunkKeyPattern,
) -> Vec<RecordId> {
    let mut ids = Vec::new();
    for chunk_key in pattern.keys(logical_key) {
        for record in find_by_key(store, &chunk_key).await {
            if !ids.contains(&record.id) {
                ids.push(record.id);
            }
        }
    }
    ids
}

/// Records whose `key` or `config_key` equals `key`, deduplicated by id.
async fn find_by_key(store: &dyn EntityStore, key: &str) -> Vec<ConfigRecord> {
    let mut found: Vec<ConfigRecord> = Vec::new();
    for filter in [
        RecordFilter::KeyEq(key.to_string()),
        RecordFilter::ConfigKeyEq(key.to_string()),
    ] {
        match store.filter(&filter).await {
            Ok(records) => {
                for r in records {
                    if !found.iter().any(|f| f.id == r.id) {
                        found.push(r);
                    }
                }
            }
            Err(e) => warn!(key = %key, error = %e, "chunk lookup failed"),
        }
    }
    found
}

fn assemble(fragments: Vec<Option<String>>) -> Result<String> {
    let total = fragments.len();
    let missing = fragments.iter().filter(|f| f.is_none()).count();
    if missing > 0 {
        error!(missing, total, "chunked payload is incomplete");
        return Err(ConfigError::ChunkIntegrity { missing, total });
    }
    Ok(fragments.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdesk_store::InMemoryEntityStore;

    #[test]
    fn split_boundaries() {
        assert!(split_fragments("", 1500).is_empty());
        assert_eq!(split_fragments("a", 1500), vec!["a"]);

        for n in [1499usize, 1500, 1501, 3000, 4500, 4501, 7777] {
            let text: String = (0..n).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
            let parts = split_fragments(&text, 1500);
            assert_eq!(parts.len(), n.div_ceil(1500), "n = {}", n);
            assert!(parts.iter().all(|p| !p.is_empty() && p.chars().count() <= 1500));
            assert_eq!(parts.concat(), text);
        }
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let parts = split_fragments(&text, 3);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "ééé");
        assert_eq!(parts[3], "é");
        assert_eq!(parts.concat(), text);
    }

    #[tokio::test]
    async fn write_then_read_by_id() {
        let store = InMemoryEntityStore::new();
        let text = "x".repeat(3200);
        let ids = write_chunks(&store, "cfg", 10, &text, 1500).await.unwrap();
        assert_eq!(ids.len(), 3);

        let keys: Vec<_> = store
            .records_with_key_prefix("cfg_10_chunk_")
            .into_iter()
            .filter_map(|r| r.key)
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"cfg_10_chunk_2".to_string()));

        assert_eq!(read_chunks_by_id(&store, &ids).await.unwrap(), text);
    }

    #[tokio::test]
    async fn write_aborts_on_failed_fragment() {
        let store = InMemoryEntityStore::new();
        store.fail_creates_after(2);
        let err = write_chunks(&store, "cfg", 1, &"y".repeat(4000), 1500)
            .await
            .unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.created.len(), 2);
        assert_eq!(
            ConfigError::from(err).to_string(),
            "Failed to create chunk 2"
        );
    }

    #[tokio::test]
    async fn missing_fragment_fails_read() {
        let store = InMemoryEntityStore::new();
        let ids = write_chunks(&store, "cfg", 1, &"z".repeat(3000), 1500)
            .await
            .unwrap();
        store.hide(&ids[1]);
        let err = read_chunks_by_id(&store, &ids).await.unwrap_err();
        assert!(matches!(err, ConfigError::ChunkIntegrity { missing: 1, total: 2 }));
    }

    #[tokio::test]
    async fn legacy_read_picks_newest_duplicate_and_completes_shallow_rows() {
        let store = InMemoryEntityStore::new();
        store.create(RecordDraft::aliased("cfg_chunk_0", "{\"a\":")).await.unwrap();
        let stale = store.create(RecordDraft::aliased("cfg_chunk_1", "0}")).await.unwrap();
        let fresh = store.create(RecordDraft::aliased("cfg_chunk_1", "1}")).await.unwrap();
        store.set_updated_at(&stale.id, fresh.updated_at - chrono::Duration::seconds(30));
        store.set_shallow_results(true);

        let pattern = ChunkKeyPattern {
            count: 2,
            versioned: None,
        };
        assert_eq!(
            read_legacy_chunks(&store, "cfg", pattern).await.unwrap(),
            "{\"a\":1}"
        );
        assert_eq!(legacy_chunk_ids(&store, "cfg", pattern).await.len(), 3);
    }

    #[tokio::test]
    async fn legacy_read_with_missing_index_fails() {
        let store = InMemoryEntityStore::new();
        store.create(RecordDraft::aliased("cfg_5_chunk_0", "{")).await.unwrap();
        let pattern = ChunkKeyPattern {
            count: 2,
            versioned: Some(5),
        };
        assert!(matches!(
            read_legacy_chunks(&store, "cfg", pattern).await,
            Err(ConfigError::ChunkIntegrity { missing: 1, total: 2 })
        ));
    }
}
