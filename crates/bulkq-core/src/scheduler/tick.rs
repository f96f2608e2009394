//! One admission round: admit, dispatch, sweep.

use async_trait::async_trait;
use chrono::Utc;

use crate::job::{JobStatus, JobUpdate};
use crate::sync::lock;
use crate::ticker::Periodic;

use super::limits::{AdmissionDenied, ProjectedLoad};
use super::queue::QueueEntry;
use super::AdmissionScheduler;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Job ids dispatched, in dispatch order.
    pub dispatched: Vec<String>,
    /// Finished jobs removed from the running set.
    pub swept: usize,
    /// Why admission stopped while jobs were still queued.
    pub denied: Option<AdmissionDenied>,
}

impl AdmissionScheduler {
    /// Run one admission round.
    ///
    /// Without a telemetry sample nothing is admitted; the sweep still runs.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        match self.telemetry.sample() {
            Ok(sample) => {
                let mut load = ProjectedLoad::from_sample(&sample);
                loop {
                    let entry = match self.reserve_next(&load) {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(denied) => {
                            tracing::debug!("admission paused: {}", denied);
                            report.denied = Some(denied);
                            break;
                        }
                    };
                    load.reserve(entry.resource.memory_mb);
                    if self.dispatch(&entry).await {
                        report.dispatched.push(entry.job_id);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("telemetry sample failed, admitting nothing this tick: {}", e);
                report.denied = Some(AdmissionDenied::TelemetryUnavailable(e.to_string()));
            }
        }
        report.swept = self.sweep().await;
        report
    }

    /// Move the next admissible entry from its lane into the running set.
    fn reserve_next(&self, load: &ProjectedLoad) -> Result<Option<QueueEntry>, AdmissionDenied> {
        let mut queues = lock(&self.queues);
        let mut running = lock(&self.running);
        if queues.is_empty() {
            return Ok(None);
        }
        self.limits.check_global(running.len(), load)?;

        let next = queues.next_eligible(|e| {
            match self.limits.check_owner(&e.owner_id, running.owner_count(&e.owner_id)) {
                Ok(()) => false,
                Err(denied) => {
                    tracing::trace!(job_id = %e.job_id, "requeued: {}", denied);
                    true
                }
            }
        });
        Ok(next.map(|mut entry| {
            entry.started_at = Some(Utc::now());
            running.insert(entry.clone());
            entry
        }))
    }

    /// Mark the job Running and hand it to the executor. Returns false (and
    /// releases the slot) if the record could not be moved to Running.
    async fn dispatch(&self, entry: &QueueEntry) -> bool {
        let update = JobUpdate::new().status(JobStatus::Running);
        match self.state.update(&entry.job_id, update).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %entry.job_id, "queued job has no record, dropped");
                lock(&self.running).remove(&entry.job_id);
                return false;
            }
            Err(e) => {
                tracing::warn!(job_id = %entry.job_id, "dispatch refused: {}", e);
                lock(&self.running).remove(&entry.job_id);
                return false;
            }
        }

        self.counters.note_started();
        tracing::info!(
            job_id = %entry.job_id,
            owner_id = %entry.owner_id,
            priority = %entry.priority,
            "job dispatched"
        );
        if let Err(e) = self.executor.start(&entry.job_id) {
            tracing::error!(job_id = %entry.job_id, "executor start failed: {:#}", e);
        }
        true
    }

    /// Remove running entries whose record is terminal or gone. Stops stored
    /// by another process are picked up first.
    async fn sweep(&self) -> usize {
        let ids = lock(&self.running).job_ids();
        if ids.is_empty() {
            return 0;
        }
        let job_ids: Vec<String> = ids.iter().map(|(id, _)| id.clone()).collect();
        self.state.sync_external_stops(&job_ids).await;
        let mut swept = 0;
        for (job_id, _) in ids {
            let status = self.state.status(&job_id).await;
            if status.is_some_and(|s| !s.is_terminal()) {
                continue;
            }
            let Some(entry) = lock(&self.running).remove(&job_id) else {
                continue;
            };
            swept += 1;
            match status {
                Some(status) => {
                    self.counters.note_finished(status);
                    tracing::debug!(job_id = %job_id, owner_id = %entry.owner_id, %status, "running slot released");
                }
                None => {
                    tracing::warn!(job_id = %job_id, "running job lost its record, slot released");
                }
            }
        }
        swept
    }
}

#[async_trait]
impl Periodic for AdmissionScheduler {
    async fn tick(&self) {
        let report = AdmissionScheduler::tick(self).await;
        if !report.dispatched.is_empty() || report.swept > 0 {
            tracing::debug!(
                dispatched = report.dispatched.len(),
                swept = report.swept,
                queued = self.queued_len(),
                running = self.running_len(),
                "admission tick"
            );
        }
    }
}
