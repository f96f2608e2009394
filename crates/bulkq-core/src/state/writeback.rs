//! Write-back: persisting dirty records, one read-merge-write per owner.
//!
//! The merge keeps a Paused or terminal status that another process stored
//! since this cache last saw the record; the cached copy takes it over once
//! the write lands.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StateError;
use crate::job::{JobRecord, JobStatus};
use crate::sync::lock;
use crate::ticker::Periodic;

use super::StateCache;

/// Outcome of one `flush_all_dirty` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records written to the store.
    pub persisted: usize,
    /// Records whose owner write failed; they stay dirty.
    pub failed: usize,
    /// Owner documents written.
    pub owners_written: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.persisted == 0 && self.failed == 0
    }
}

/// Record snapshot taken for a write, with the revision it was taken at.
struct Pending {
    record: JobRecord,
    revision: u64,
    stored_status: Option<JobStatus>,
    /// Our status before a stop found in the store replaced it.
    stopped_from: Option<JobStatus>,
}

impl StateCache {
    /// Persist one record now, merged into its owner's document.
    ///
    /// Returns false if the job is not cached or the write failed; the
    /// failure is logged and the record stays dirty.
    pub async fn flush_now(&self, job_id: &str) -> bool {
        match self.persist_one(job_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(job_id, "flush failed: {}", e);
                false
            }
        }
    }

    pub(crate) async fn persist_one(&self, job_id: &str) -> Result<bool, StateError> {
        let Some(pending) = self.snapshot(job_id) else {
            return Ok(false);
        };
        let owner_id = pending.record.owner_id.clone();
        let mut batch = [pending];
        match self.write_owner(&owner_id, &mut batch).await {
            Ok(()) => {
                self.settle(&batch);
                lock(&self.counters).note_flush(1, 0, Utc::now());
                Ok(true)
            }
            Err(e) => {
                lock(&self.counters).note_flush(0, 1, Utc::now());
                Err(e)
            }
        }
    }

    /// Persist every dirty record.
    ///
    /// Dirty ids are taken in chunks of `batch_save_size`; each chunk is
    /// grouped by owner and written with one read-merge-write per owner.
    /// A record modified while its write was in flight stays dirty.
    pub async fn flush_all_dirty(&self) -> FlushReport {
        let mut ids: Vec<String> = lock(&self.dirty).iter().cloned().collect();
        ids.sort();
        let mut report = FlushReport::default();
        if ids.is_empty() {
            return report;
        }

        for chunk in ids.chunks(self.batch_save_size) {
            let mut by_owner: BTreeMap<String, Vec<Pending>> = BTreeMap::new();
            for job_id in chunk {
                match self.snapshot(job_id) {
                    Some(p) => by_owner
                        .entry(p.record.owner_id.clone())
                        .or_default()
                        .push(p),
                    None => {
                        // Evicted or cleaned up since it was marked.
                        lock(&self.dirty).remove(job_id);
                    }
                }
            }

            for (owner_id, mut pending) in by_owner {
                match self.write_owner(&owner_id, &mut pending).await {
                    Ok(()) => {
                        self.settle(&pending);
                        report.persisted += pending.len();
                        report.owners_written += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            owner_id = %owner_id,
                            records = pending.len(),
                            "write-back failed, records stay dirty: {}",
                            e
                        );
                        report.failed += pending.len();
                    }
                }
            }
        }

        lock(&self.counters).note_flush(report.persisted, report.failed, Utc::now());
        tracing::debug!(
            persisted = report.persisted,
            failed = report.failed,
            owners = report.owners_written,
            "write-back pass done"
        );
        report
    }

    fn snapshot(&self, job_id: &str) -> Option<Pending> {
        lock(&self.cache).get(job_id).map(|c| Pending {
            record: c.record.clone(),
            revision: c.revision,
            stored_status: c.stored_status,
            stopped_from: None,
        })
    }

    async fn write_owner(&self, owner_id: &str, pending: &mut [Pending]) -> Result<(), StateError> {
        let _doc = self.doc_lock.lock().await;
        let mut doc = self
            .store
            .get_owner_jobs(owner_id)
            .await
            .map_err(|e| StateError::persistence(owner_id, e))?;
        for p in pending.iter_mut() {
            if let Some(stored) = doc.get(&p.record.job_id) {
                if p.record.stopped_elsewhere(p.stored_status, stored) {
                    p.stopped_from = Some(p.record.status);
                    p.record.take_stop(stored);
                }
            }
            doc.insert(p.record.job_id.clone(), p.record.clone());
        }
        self.store
            .put_owner_jobs(owner_id, &doc)
            .await
            .map_err(|e| StateError::persistence(owner_id, e))
    }

    /// After a successful write: remember what was stored, take over stops
    /// found in the store, and clear the dirty flag of records that did not
    /// change while the write was in flight.
    fn settle(&self, pending: &[Pending]) {
        let mut cache = lock(&self.cache);
        let mut dirty = lock(&self.dirty);
        for p in pending {
            let job_id = &p.record.job_id;
            let Some(cached) = cache.get_mut(job_id) else {
                dirty.remove(job_id);
                continue;
            };
            cached.stored_status = Some(p.record.status);
            if let Some(from) = p.stopped_from {
                if cached.record.status == from {
                    cached.record.take_stop(&p.record);
                    lock(&self.counters).record_transition(p.record.status);
                    tracing::info!(job_id = %job_id, %from, to = %p.record.status, "job stopped by another process");
                }
            }
            if cached.revision == p.revision {
                dirty.remove(job_id);
            }
        }
    }
}

#[async_trait]
impl Periodic for StateCache {
    async fn tick(&self) {
        self.flush_all_dirty().await;
    }

    async fn finish(&self) {
        let report = self.flush_all_dirty().await;
        if report.failed > 0 {
            tracing::warn!(
                failed = report.failed,
                "final write-back left records unsaved"
            );
        } else {
            tracing::info!(persisted = report.persisted, "final write-back done");
        }
    }
}
