use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::job::JobStatus;

use super::limits::AdmissionLimits;

/// Lifetime counters, updated without taking the queue locks.
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    queued: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl SchedulerCounters {
    pub(crate) fn note_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job leaving the running set (or the queue) in `status`.
    pub(crate) fn note_finished(&self, status: JobStatus) {
        let counter = match status {
            JobStatus::Completed => &self.completed,
            JobStatus::Failed => &self.failed,
            JobStatus::Cancelled => &self.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut SchedulerStats) {
        stats.total_queued = self.queued.load(Ordering::Relaxed);
        stats.total_started = self.started.load(Ordering::Relaxed);
        stats.total_completed = self.completed.load(Ordering::Relaxed);
        stats.total_failed = self.failed.load(Ordering::Relaxed);
        stats.total_cancelled = self.cancelled.load(Ordering::Relaxed);
    }
}

/// Snapshot of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    /// Keyed by priority name.
    pub queued_by_priority: BTreeMap<String, usize>,
    pub running: usize,
    pub running_by_owner: BTreeMap<String, usize>,
    pub total_queued: u64,
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Items an executor may process between two status polls.
    pub status_check_granularity: usize,
    pub limits: AdmissionLimits,
}
