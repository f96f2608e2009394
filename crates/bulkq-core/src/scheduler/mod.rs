//! Admission scheduler.
//!
//! Four FIFO lanes (Urgent > High > Normal > Low). Every tick admits the
//! highest-priority, oldest eligible entries while the global concurrency
//! limit and the memory/CPU ceilings allow, then sweeps finished jobs out of
//! the running set. Owners at their per-owner cap are skipped, not dropped.
//!
//! The scheduler never writes job records itself: every status change goes
//! through `StateCache::update`.
//!
//! Lock order: `queues`, then `running`. Neither is held across an await.

mod executor;
mod limits;
mod queue;
mod running;
mod stats;
mod tick;

use std::sync::{Arc, Mutex};

use crate::error::StateError;
use crate::job::{JobStatus, JobUpdate};
use crate::monitor::TelemetrySource;
use crate::state::StateCache;
use crate::sync::lock;

pub use executor::JobExecutor;
pub use limits::{AdmissionDenied, AdmissionLimits};
pub use queue::{Priority, QueueEntry, ResourceEstimate};
pub use stats::SchedulerStats;
pub use tick::TickReport;

use queue::PriorityQueues;
use running::RunningSet;
use stats::SchedulerCounters;

pub struct AdmissionScheduler {
    limits: AdmissionLimits,
    state: Arc<StateCache>,
    telemetry: Arc<dyn TelemetrySource>,
    executor: Arc<dyn JobExecutor>,
    queues: Mutex<PriorityQueues>,
    running: Mutex<RunningSet>,
    counters: SchedulerCounters,
}

impl AdmissionScheduler {
    pub fn new(
        limits: AdmissionLimits,
        state: Arc<StateCache>,
        telemetry: Arc<dyn TelemetrySource>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            limits,
            state,
            telemetry,
            executor,
            queues: Mutex::new(PriorityQueues::default()),
            running: Mutex::new(RunningSet::default()),
            counters: SchedulerCounters::default(),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Add a job to its priority lane. Returns false if it is already queued
    /// or running.
    pub fn queue(&self, entry: QueueEntry) -> bool {
        let mut queues = lock(&self.queues);
        let running = lock(&self.running);
        if queues.contains(&entry.job_id) || running.contains(&entry.job_id) {
            tracing::debug!(job_id = %entry.job_id, "already queued or running");
            return false;
        }
        tracing::debug!(
            job_id = %entry.job_id,
            owner_id = %entry.owner_id,
            priority = %entry.priority,
            "job queued"
        );
        queues.push(entry);
        self.counters.note_queued();
        true
    }

    /// Cancel a queued or running job.
    ///
    /// A queued job is removed from its lane; a running one leaves the running
    /// set. Either way the record is marked Cancelled. The executor is not
    /// interrupted: it sees the status at its next check point.
    ///
    /// Returns `Ok(false)` if the job is neither queued nor running, has no
    /// record, or already finished. A job that finished first is counted under
    /// its own final status, as the sweep would have.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, StateError> {
        let removed = {
            let mut queues = lock(&self.queues);
            let mut running = lock(&self.running);
            queues.remove(job_id).or_else(|| running.remove(job_id))
        };
        let Some(entry) = removed else {
            return Ok(false);
        };
        match self
            .state
            .update(job_id, JobUpdate::new().status(JobStatus::Cancelled))
            .await
        {
            Ok(true) => {
                self.counters.note_finished(JobStatus::Cancelled);
                tracing::info!(job_id, owner_id = %entry.owner_id, "job cancelled");
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!(job_id, "cancelled entry had no record");
                Ok(false)
            }
            Err(StateError::InvalidTransition { from, .. }) if from.is_terminal() => {
                self.counters.note_finished(from);
                tracing::debug!(job_id, status = %from, "job finished before cancel");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Running -> Paused. The job keeps its running slot.
    pub async fn pause(&self, job_id: &str) -> Result<bool, StateError> {
        if !lock(&self.running).contains(job_id) {
            return Ok(false);
        }
        self.state
            .update(job_id, JobUpdate::new().status(JobStatus::Paused))
            .await
    }

    /// Paused -> Running.
    pub async fn resume(&self, job_id: &str) -> Result<bool, StateError> {
        if !lock(&self.running).contains(job_id) {
            return Ok(false);
        }
        self.state
            .update(job_id, JobUpdate::new().status(JobStatus::Running))
            .await
    }

    /// Pause every Running job of Low or Normal priority. Returns how many
    /// were paused.
    pub async fn pause_low_priority(&self) -> usize {
        let candidates: Vec<String> = lock(&self.running)
            .job_ids()
            .into_iter()
            .filter(|(_, p)| p.yields_under_pressure())
            .map(|(id, _)| id)
            .collect();

        let mut paused = 0;
        for job_id in candidates {
            if self.state.status(&job_id).await != Some(JobStatus::Running) {
                continue;
            }
            match self
                .state
                .update(&job_id, JobUpdate::new().status(JobStatus::Paused))
                .await
            {
                Ok(true) => paused += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, "pause under pressure failed: {}", e),
            }
        }
        if paused > 0 {
            tracing::info!(paused, "paused low-priority jobs");
        }
        paused
    }

    pub fn priority_of(&self, job_id: &str) -> Option<Priority> {
        let queues = lock(&self.queues);
        let running = lock(&self.running);
        queues
            .priority_of(job_id)
            .or_else(|| running.get(job_id).map(|e| e.priority))
    }

    pub fn is_queued(&self, job_id: &str) -> bool {
        lock(&self.queues).contains(job_id)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        lock(&self.running).contains(job_id)
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.queues).len()
    }

    pub fn running_len(&self) -> usize {
        lock(&self.running).len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            status_check_granularity: self.executor.status_check_granularity(),
            limits: self.limits.clone(),
            ..SchedulerStats::default()
        };
        {
            let queues = lock(&self.queues);
            let running = lock(&self.running);
            stats.queued = queues.len();
            for p in Priority::DESCENDING {
                stats
                    .queued_by_priority
                    .insert(p.as_str().to_string(), queues.len_of(p));
            }
            stats.running = running.len();
            stats.running_by_owner = running
                .per_owner()
                .iter()
                .map(|(owner, n)| (owner.clone(), *n))
                .collect();
        }
        self.counters.fill(&mut stats);
        stats
    }
}
