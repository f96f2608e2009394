//! Job state cache and write-back manager.
//!
//! The cache holds the authoritative in-memory copy of every job the process
//! touches. Updates only mark records dirty; `flush_all_dirty` (driven by the
//! write-back ticker every `save_interval`) persists them grouped by owner so
//! each owner's document is written once per batch.
//!
//! Lock order: `cache`, then `dirty`, then `counters`. None is held across an
//! await; store I/O always works on cloned snapshots. Read-merge-write cycles
//! on an owner document are serialized by `doc_lock`.
//!
//! Other processes (the `bulkq` CLI) may write the same documents. A Paused or
//! terminal status they store is never overwritten by this cache: the next
//! write-back of that owner, or `sync_external_stops`, takes it over.

mod maintenance;
mod stats;
mod writeback;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::StateError;
use crate::job::{JobConfig, JobRecord, JobStatus, JobUpdate};
use crate::store::JobRecordStore;
use crate::sync::lock;

pub use maintenance::DEFAULT_RETENTION_HOURS;
pub use stats::CacheStats;
pub use writeback::FlushReport;

use stats::CacheCounters;

/// Default number of dirty records persisted per flush batch.
pub const DEFAULT_BATCH_SAVE_SIZE: usize = 10;

/// Cached record plus a revision bumped on every update, so a flush only
/// clears the dirty flag if nothing changed while it was writing.
#[derive(Debug, Clone)]
pub(crate) struct CachedJob {
    pub(crate) record: JobRecord,
    pub(crate) revision: u64,
    /// Status of the record as last read from or written to the store.
    pub(crate) stored_status: Option<JobStatus>,
}

impl CachedJob {
    fn loaded(record: JobRecord) -> Self {
        Self {
            stored_status: Some(record.status),
            record,
            revision: 0,
        }
    }
}

/// In-memory job cache with write-back persistence.
pub struct StateCache {
    store: Arc<dyn JobRecordStore>,
    batch_save_size: usize,
    cache: Mutex<HashMap<String, CachedJob>>,
    dirty: Mutex<HashSet<String>>,
    counters: Mutex<CacheCounters>,
    doc_lock: tokio::sync::Mutex<()>,
}

impl StateCache {
    pub fn new(store: Arc<dyn JobRecordStore>, batch_save_size: usize) -> Self {
        Self {
            store,
            batch_save_size: batch_save_size.max(1),
            cache: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            counters: Mutex::new(CacheCounters::default()),
            doc_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobRecordStore> {
        &self.store
    }

    /// Register a new Pending job and persist it immediately.
    ///
    /// The id must be unknown to the cache and to the owner's stored document
    /// (a job evicted from the cache or saved before a restart still exists).
    /// If that document cannot be read nothing is created.
    ///
    /// If the first write fails the job is still cached (and dirty), so the
    /// next flush retries it; the error tells the caller it is not durable yet.
    pub async fn create(
        &self,
        job_id: impl Into<String>,
        owner_id: impl Into<String>,
        cursor_start: Option<i64>,
        config: JobConfig,
    ) -> Result<JobRecord, StateError> {
        let record = JobRecord::new(job_id, owner_id, cursor_start, config);
        if self.is_cached(&record.job_id) {
            return Err(StateError::AlreadyExists(record.job_id));
        }
        let stored = self
            .store
            .get_owner_jobs(&record.owner_id)
            .await
            .map_err(|e| StateError::persistence(&record.owner_id, e))?;
        if stored.contains_key(&record.job_id) {
            return Err(StateError::AlreadyExists(record.job_id));
        }
        {
            let mut cache = lock(&self.cache);
            if cache.contains_key(&record.job_id) {
                return Err(StateError::AlreadyExists(record.job_id));
            }
            cache.insert(
                record.job_id.clone(),
                CachedJob {
                    record: record.clone(),
                    revision: 0,
                    stored_status: None,
                },
            );
            lock(&self.dirty).insert(record.job_id.clone());
        }
        lock(&self.counters).created += 1;

        match self.persist_one(&record.job_id).await {
            Ok(_) => {
                tracing::info!(
                    job_id = %record.job_id,
                    owner_id = %record.owner_id,
                    "job created"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %record.job_id,
                    "job created but initial write failed; will retry on next flush: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Look a job up by id.
    ///
    /// A cache miss falls back to scanning every owner in the store, which
    /// costs one read per owner. Each scan is counted in `CacheStats::store_scans`;
    /// hot paths should prefer cache hits or `get_owner_jobs`.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        if let Some(cached) = lock(&self.cache).get(job_id) {
            return Some(cached.record.clone());
        }
        let record = self.scan_store(job_id).await?;
        Some(self.adopt(record))
    }

    /// Current status of a job (cache first, then store).
    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.get(job_id).await.map(|r| r.status)
    }

    /// Load every job of one owner. Stored records replace clean cached copies;
    /// dirty cached records win over the store.
    pub async fn get_owner_jobs(&self, owner_id: &str) -> Result<Vec<JobRecord>, StateError> {
        let stored = self
            .store
            .get_owner_jobs(owner_id)
            .await
            .map_err(|e| StateError::persistence(owner_id, e))?;
        let mut out: Vec<JobRecord> = stored.into_values().map(|r| self.refresh(r)).collect();
        {
            // Jobs created here whose first write never landed.
            let cache = lock(&self.cache);
            for cached in cache.values() {
                if cached.record.owner_id == owner_id
                    && !out.iter().any(|r| r.job_id == cached.record.job_id)
                {
                    out.push(cached.record.clone());
                }
            }
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(out)
    }

    /// Merge `update` into the cached record and mark it dirty.
    ///
    /// Returns `Ok(false)` if the job is neither cached nor in the store.
    /// Status changes are validated against the lifecycle graph and the item
    /// counters against the known total; a rejected update changes nothing.
    pub async fn update(&self, job_id: &str, update: JobUpdate) -> Result<bool, StateError> {
        if !self.is_cached(job_id) && self.get(job_id).await.is_none() {
            tracing::warn!(job_id, "update for unknown job");
            return Ok(false);
        }

        let now = Utc::now();
        let transition = {
            let mut cache = lock(&self.cache);
            let Some(cached) = cache.get_mut(job_id) else {
                // Evicted between the load and this lock.
                return Ok(false);
            };
            let transition = cached.record.apply(&update, now)?;
            if transition.is_none() && update.is_status_only() {
                return Ok(true);
            }
            cached.revision += 1;
            lock(&self.dirty).insert(job_id.to_string());
            if let Some((_, to)) = transition {
                lock(&self.counters).record_transition(to);
            }
            transition
        };

        match transition {
            Some((from, to)) => tracing::info!(job_id, %from, %to, "job status changed"),
            None => tracing::trace!(job_id, "job progress updated"),
        }
        Ok(true)
    }

    pub fn is_cached(&self, job_id: &str) -> bool {
        lock(&self.cache).contains_key(job_id)
    }

    pub fn is_dirty(&self, job_id: &str) -> bool {
        lock(&self.dirty).contains(job_id)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dirty_count(&self) -> usize {
        lock(&self.dirty).len()
    }

    /// Insert a record loaded from the store unless the cache already has one;
    /// returns whichever copy ends up cached.
    fn adopt(&self, mut record: JobRecord) -> JobRecord {
        record.resumed = true;
        let mut cache = lock(&self.cache);
        cache
            .entry(record.job_id.clone())
            .or_insert_with(|| CachedJob::loaded(record))
            .record
            .clone()
    }

    /// Like `adopt`, but a clean cached copy is replaced by the stored one.
    fn refresh(&self, mut record: JobRecord) -> JobRecord {
        let mut cache = lock(&self.cache);
        let dirty = lock(&self.dirty).contains(&record.job_id);
        match cache.get_mut(&record.job_id) {
            Some(cached) if dirty => cached.record.clone(),
            Some(cached) => {
                record.resumed = cached.record.resumed;
                cached.stored_status = Some(record.status);
                cached.record = record.clone();
                record
            }
            None => {
                record.resumed = true;
                cache.insert(record.job_id.clone(), CachedJob::loaded(record.clone()));
                record
            }
        }
    }

    /// Re-read the stored documents of the given cached jobs and take over any
    /// Paused or terminal status another process stored for them. Returns how
    /// many records changed. Unreadable documents are skipped.
    pub async fn sync_external_stops(&self, job_ids: &[String]) -> usize {
        let mut by_owner: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        {
            let cache = lock(&self.cache);
            for job_id in job_ids {
                if let Some(cached) = cache.get(job_id) {
                    by_owner
                        .entry(cached.record.owner_id.clone())
                        .or_default()
                        .push(job_id.as_str());
                }
            }
        }

        let mut changed = 0;
        for (owner_id, ids) in by_owner {
            let doc = match self.store.get_owner_jobs(&owner_id).await {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(owner_id = %owner_id, "re-read for external stops failed: {}", e);
                    continue;
                }
            };
            let mut cache = lock(&self.cache);
            for job_id in ids {
                let (Some(cached), Some(stored)) = (cache.get_mut(job_id), doc.get(job_id)) else {
                    continue;
                };
                if !cached.record.stopped_elsewhere(cached.stored_status, stored) {
                    continue;
                }
                let from = cached.record.status;
                cached.record.take_stop(stored);
                cached.stored_status = Some(stored.status);
                lock(&self.counters).record_transition(stored.status);
                tracing::info!(job_id, %from, to = %stored.status, "job stopped by another process");
                changed += 1;
            }
        }
        changed
    }

    async fn scan_store(&self, job_id: &str) -> Option<JobRecord> {
        lock(&self.counters).store_scans += 1;
        let owners = match self.store.list_owners().await {
            Ok(owners) => owners,
            Err(e) => {
                tracing::warn!(job_id, "list owners for job lookup failed: {}", e);
                return None;
            }
        };
        tracing::debug!(job_id, owners = owners.len(), "cache miss, scanning store");
        for owner_id in owners {
            match self.store.get_owner_jobs(&owner_id).await {
                Ok(mut jobs) => {
                    if let Some(record) = jobs.remove(job_id) {
                        tracing::info!(job_id, owner_id = %owner_id, "job loaded from store");
                        return Some(record);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, owner_id = %owner_id, "read owner jobs failed: {}", e);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests;
