//! Candidate discovery and version resolution.
//!
//! The store has no unique constraint on keys, so several master records
//! may exist for one logical key. The newest is decided by the logical
//! timestamp inside each envelope, never by the store's `updated_at`.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use opsdesk_store::{ConfigRecord, EntityStore, ListOptions, RecordFilter, RecordId};

use crate::envelope::{decode, ChunkRefs, Envelope, EnvelopeVersion};

/// A master record together with its decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub record: ConfigRecord,
    pub envelope: Envelope,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn timestamp(&self) -> i64 {
        self.envelope.timestamp()
    }

    pub fn summary(&self) -> CandidateSummary {
        let chunks = match self.envelope.chunk_refs() {
            ChunkRefs::Inline => 0,
            ChunkRefs::Ids(ids) => ids.len(),
            ChunkRefs::Keyed(p) => p.count,
        };
        CandidateSummary {
            record_id: self.record.id.clone(),
            version: Some(self.envelope.version()),
            timestamp: Some(self.timestamp()),
            chunks,
            updated_at: self.record.updated_at,
        }
    }
}

/// Operator-facing description of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub record_id: RecordId,
    #[serde(serialize_with = "serialize_version")]
    pub version: Option<EnvelopeVersion>,
    pub timestamp: Option<i64>,
    pub chunks: usize,
    pub updated_at: DateTime<Utc>,
}

fn serialize_version<S>(version: &Option<EnvelopeVersion>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match version {
        Some(v) => s.serialize_str(v.label()),
        None => s.serialize_str("unreadable"),
    }
}

/// Decoded candidates ranked newest first, plus those that could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    ranked: Vec<Candidate>,
    unreadable: Vec<ConfigRecord>,
}

impl Resolution {
    /// Candidate with the greatest logical timestamp.
    pub fn winner(&self) -> Option<&Candidate> {
        self.ranked.first()
    }

    /// Readable candidates, newest first.
    pub fn ranked(&self) -> &[Candidate] {
        &self.ranked
    }

    /// Records with an empty or undecodable payload.
    pub fn unreadable(&self) -> &[ConfigRecord] {
        &self.unreadable
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty() && self.unreadable.is_empty()
    }

    /// Greatest logical timestamp seen, if any candidate is readable.
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.winner().map(Candidate::timestamp)
    }

    pub fn summaries(&self) -> Vec<CandidateSummary> {
        let mut out: Vec<_> = self.ranked.iter().map(Candidate::summary).collect();
        out.extend(self.unreadable.iter().map(|r| CandidateSummary {
            record_id: r.id.clone(),
            version: None,
            timestamp: None,
            chunks: 0,
            updated_at: r.updated_at,
        }));
        out
    }
}

/// Decode each record and rank the readable ones by logical timestamp.
///
/// The sort is stable; equal timestamps keep discovery order.
pub fn resolve(records: Vec<ConfigRecord>) -> Resolution {
    let mut resolution = Resolution::default();
    for record in records {
        match record.payload_text().and_then(decode) {
            Some(envelope) => resolution.ranked.push(Candidate { record, envelope }),
            None => {
                debug!(record_id = %record.id, "skipping unreadable candidate");
                resolution.unreadable.push(record);
            }
        }
    }
    resolution.ranked.sort_by_key(|c| Reverse(c.timestamp()));
    resolution
}

/// Find every master record stored under `key`.
///
/// Exact match on `key`, then on the legacy `config_key`; only when both
/// come back empty, a scan of the `scan_limit` most recently updated rows
/// compared by hand. Shallow results are completed with a full fetch.
pub async fn discover(store: &dyn EntityStore, key: &str, scan_limit: usize) -> Vec<ConfigRecord> {
    let mut found: Vec<ConfigRecord> = Vec::new();
    for filter in [
        RecordFilter::KeyEq(key.to_string()),
        RecordFilter::ConfigKeyEq(key.to_string()),
    ] {
        match store.filter(&filter).await {
            Ok(records) => merge(&mut found, records),
            Err(e) => warn!(key = %key, filter = ?filter, error = %e, "discovery filter failed"),
        }
    }

    if found.is_empty() {
        debug!(key = %key, scan_limit, "key filters empty, scanning recent records");
        match store.list(&ListOptions::recent(scan_limit)).await {
            Ok(records) => merge(
                &mut found,
                records.into_iter().filter(|r| r.matches_key(key)).collect(),
            ),
            Err(e) => warn!(key = %key, error = %e, "discovery scan failed"),
        }
    }

    let completed = join_all(found.into_iter().map(|record| async move {
        if record.has_payload() {
            return Some(record);
        }
        match store.get(&record.id).await {
            Ok(Some(full)) => Some(full),
            Ok(None) => {
                debug!(record_id = %record.id, "candidate vanished before full fetch");
                None
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "candidate full fetch failed");
                None
            }
        }
    }))
    .await;

    completed.into_iter().flatten().collect()
}

/// Discovery followed by resolution.
pub async fn discover_and_resolve(
    store: &dyn EntityStore,
    key: &str,
    scan_limit: usize,
) -> Resolution {
    resolve(discover(store, key, scan_limit).await)
}

fn merge(found: &mut Vec<ConfigRecord>, records: Vec<ConfigRecord>) {
    for r in records {
        if !found.iter().any(|f| f.id == r.id) {
            found.push(r);
        }
    }
}
