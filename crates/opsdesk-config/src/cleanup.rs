//! Background deletion of superseded generations.
//!
//! Cleanup never affects the outcome of a save. Jobs run on a detached
//! worker task in submission order; deletions that fail are kept as
//! [`OrphanRecord`]s so a later sweep can retry them.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use opsdesk_store::{EntityStore, RecordId};

use crate::chunk::legacy_chunk_ids;
use crate::envelope::ChunkRefs;
use crate::resolver::Candidate;

/// Records to delete for one superseded generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub key: String,
    pub master: Option<RecordId>,
    pub chunks: ChunkRefs,
}

impl CleanupJob {
    /// The master record and every chunk its envelope references.
    pub fn for_candidate(key: &str, candidate: &Candidate) -> Self {
        Self {
            key: key.to_string(),
            master: Some(candidate.record.id.clone()),
            chunks: candidate.envelope.chunk_refs(),
        }
    }

    /// Chunks left behind by a write that never produced a master.
    pub fn stray_chunks(key: &str, ids: Vec<RecordId>) -> Self {
        Self {
            key: key.to_string(),
            master: None,
            chunks: ChunkRefs::Ids(ids),
        }
    }

    /// Only the chunks of a master that is being rewritten in place.
    pub fn chunks_of(key: &str, candidate: &Candidate) -> Self {
        Self {
            key: key.to_string(),
            master: None,
            chunks: candidate.envelope.chunk_refs(),
        }
    }
}

/// A record that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRecord {
    pub key: String,
    pub record_id: RecordId,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub already_gone: usize,
    pub orphans: Vec<OrphanRecord>,
}

/// Delete a generation: master first, then its chunks.
///
/// Idempotent: ids that no longer exist count as already gone.
pub async fn cleanup_generation(store: &dyn EntityStore, job: &CleanupJob) -> CleanupReport {
    let chunk_ids = match &job.chunks {
        ChunkRefs::Inline => Vec::new(),
        ChunkRefs::Ids(ids) => ids.clone(),
        ChunkRefs::Keyed(pattern) => legacy_chunk_ids(store, &job.key, *pattern).await,
    };

    let mut report = CleanupReport::default();
    for id in job.master.iter().chain(chunk_ids.iter()) {
        delete_one(store, &job.key, id, &mut report).await;
    }
    debug!(
        key = %job.key,
        deleted = report.deleted,
        already_gone = report.already_gone,
        failed = report.orphans.len(),
        "cleanup pass finished"
    );
    report
}

async fn delete_one(store: &dyn EntityStore, key: &str, id: &str, report: &mut CleanupReport) {
    match store.delete(id).await {
        Ok(()) => report.deleted += 1,
        Err(e) if e.is_not_found() => report.already_gone += 1,
        Err(e) => {
            warn!(key = %key, record_id = %id, error = %e, "cleanup delete failed");
            report.orphans.push(OrphanRecord {
                key: key.to_string(),
                record_id: id.to_string(),
                reason: e.to_string(),
                recorded_at: Utc::now(),
            });
        }
    }
}

enum Command {
    Run(CleanupJob),
    RetryOrphans(oneshot::Sender<usize>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the cleanup worker.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<Command>,
    orphans: Arc<Mutex<Vec<OrphanRecord>>>,
}

impl CleanupQueue {
    /// Start the worker task. Must be called within a Tokio runtime.
    pub fn spawn(store: Arc<dyn EntityStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let orphans: Arc<Mutex<Vec<OrphanRecord>>> = Arc::default();
        let worker_orphans = Arc::clone(&orphans);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Run(job) => {
                        let report = cleanup_generation(store.as_ref(), &job).await;
                        record_orphans(&worker_orphans, report.orphans);
                    }
                    Command::RetryOrphans(reply) => {
                        let pending = take_orphans(&worker_orphans);
                        let mut still_failing = Vec::new();
                        for orphan in pending {
                            let mut report = CleanupReport::default();
                            delete_one(store.as_ref(), &orphan.key, &orphan.record_id, &mut report)
                                .await;
                            still_failing.extend(report.orphans);
                        }
                        let remaining = still_failing.len();
                        record_orphans(&worker_orphans, still_failing);
                        info!(remaining, "orphan sweep finished");
                        let _ = reply.send(remaining);
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(());
                    }
                }
            }
            debug!("cleanup worker stopped");
        });

        Self { tx, orphans }
    }

    /// Queue a generation for deletion. Returns immediately.
    pub fn enqueue(&self, job: CleanupJob) {
        let key = job.key.clone();
        if self.tx.send(Command::Run(job)).is_err() {
            warn!(key = %key, "cleanup worker is gone, job dropped");
        }
    }

    /// Wait until every job queued before this call has been processed.
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }

    /// Retry every recorded orphan. Returns how many still could not be deleted.
    pub async fn retry_orphans(&self) -> usize {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::RetryOrphans(reply)).is_err() {
            return self.orphans().len();
        }
        done.await.unwrap_or_else(|_| self.orphans().len())
    }

    /// Records whose deletion failed and has not yet succeeded on retry.
    pub fn orphans(&self) -> Vec<OrphanRecord> {
        self.orphans.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

fn record_orphans(orphans: &Mutex<Vec<OrphanRecord>>, new: Vec<OrphanRecord>) {
    if new.is_empty() {
        return;
    }
    if let Ok(mut list) = orphans.lock() {
        for orphan in new {
            if !list.iter().any(|o| o.record_id == orphan.record_id) {
                list.push(orphan);
            }
        }
    }
}

fn take_orphans(orphans: &Mutex<Vec<OrphanRecord>>) -> Vec<OrphanRecord> {
    orphans
        .lock()
        .map(|mut list| std::mem::take(&mut *list))
        .unwrap_or_default()
}
