use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobStatus;
use crate::sync::lock;

use super::StateCache;

/// Running totals kept beside the cache.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) created: u64,
    pub(crate) completed: u64,
    pub(crate) failed: u64,
    pub(crate) cancelled: u64,
    pub(crate) store_scans: u64,
    pub(crate) persisted: u64,
    pub(crate) flush_failures: u64,
    pub(crate) last_flush: Option<DateTime<Utc>>,
}

impl CacheCounters {
    pub(crate) fn record_transition(&mut self, to: JobStatus) {
        match to {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
    }

    pub(crate) fn note_flush(&mut self, persisted: usize, failed: usize, now: DateTime<Utc>) {
        self.persisted += persisted as u64;
        self.flush_failures += failed as u64;
        if persisted > 0 || failed > 0 {
            self.last_flush = Some(now);
        }
    }
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub cached: usize,
    pub dirty: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    /// Terminal transitions seen by this process.
    pub completed_total: u64,
    pub failed_total: u64,
    pub cancelled_total: u64,
    pub created_total: u64,
    /// Id lookups that missed the cache and enumerated every owner.
    pub store_scans: u64,
    pub persisted_total: u64,
    pub flush_failures: u64,
    pub last_flush: Option<DateTime<Utc>>,
}

impl StateCache {
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        {
            let cache = lock(&self.cache);
            stats.cached = cache.len();
            for cached in cache.values() {
                match cached.record.status {
                    JobStatus::Pending => stats.pending += 1,
                    JobStatus::Running => stats.running += 1,
                    JobStatus::Paused => stats.paused += 1,
                    _ => {}
                }
            }
            stats.dirty = lock(&self.dirty).len();
        }
        let c = lock(&self.counters);
        stats.completed_total = c.completed;
        stats.failed_total = c.failed;
        stats.cancelled_total = c.cancelled;
        stats.created_total = c.created;
        stats.store_scans = c.store_scans;
        stats.persisted_total = c.persisted;
        stats.flush_failures = c.flush_failures;
        stats.last_flush = c.last_flush;
        stats
    }
}
