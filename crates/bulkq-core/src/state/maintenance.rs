//! Retention cleanup and the cache-shrinking actions used under memory pressure.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::error::StateError;
use crate::job::JobStatus;
use crate::sync::lock;

use super::StateCache;

/// Default retention for terminal records.
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

impl StateCache {
    /// Remove `owner_id`'s terminal records that ended more than
    /// `max_age_hours` ago, from the cache and from the store.
    /// Returns how many records were removed.
    pub async fn cleanup_terminal(
        &self,
        owner_id: &str,
        max_age_hours: u64,
    ) -> Result<usize, StateError> {
        // Capped at a century.
        let hours = max_age_hours.min(24 * 365 * 100) as i64;
        self.cleanup_terminal_at(owner_id, Duration::hours(hours), Utc::now())
            .await
    }

    pub(crate) async fn cleanup_terminal_at(
        &self,
        owner_id: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StateError> {
        let _doc = self.doc_lock.lock().await;
        let mut doc = self
            .store
            .get_owner_jobs(owner_id)
            .await
            .map_err(|e| StateError::persistence(owner_id, e))?;

        let mut removed: HashSet<String> = doc
            .values()
            .filter(|r| r.expired(max_age, now))
            .map(|r| r.job_id.clone())
            .collect();
        {
            let mut cache = lock(&self.cache);
            let mut dirty = lock(&self.dirty);
            cache.retain(|job_id, cached| {
                let expired =
                    cached.record.owner_id == owner_id && cached.record.expired(max_age, now);
                if expired {
                    dirty.remove(job_id);
                    removed.insert(job_id.clone());
                }
                !expired
            });
        }

        let before = doc.len();
        doc.retain(|job_id, _| !removed.contains(job_id));
        if doc.len() != before {
            self.store
                .put_owner_jobs(owner_id, &doc)
                .await
                .map_err(|e| StateError::persistence(owner_id, e))?;
        }

        if !removed.is_empty() {
            tracing::info!(
                owner_id,
                removed = removed.len(),
                "cleaned up expired terminal jobs"
            );
        }
        Ok(removed.len())
    }

    /// Release spare capacity held by the cache maps.
    pub fn compact(&self) {
        let mut cache = lock(&self.cache);
        cache.shrink_to_fit();
        lock(&self.dirty).shrink_to_fit();
        tracing::debug!(cached = cache.len(), "state cache compacted");
    }

    /// Evict clean terminal records from the cache. Dirty records are kept.
    pub fn purge_terminal(&self) -> usize {
        self.evict(|status| status.is_terminal())
    }

    /// Flush everything dirty, then evict every clean record that is not
    /// Running or Paused.
    pub async fn sweep(&self) -> usize {
        self.flush_all_dirty().await;
        let evicted = self.evict(|status| !matches!(status, JobStatus::Running | JobStatus::Paused));
        self.compact();
        evicted
    }

    fn evict(&self, pred: impl Fn(JobStatus) -> bool) -> usize {
        let mut cache = lock(&self.cache);
        let dirty = lock(&self.dirty);
        let before = cache.len();
        cache.retain(|job_id, cached| dirty.contains(job_id) || !pred(cached.record.status));
        let evicted = before - cache.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted clean records from state cache");
        }
        evicted
    }
}
