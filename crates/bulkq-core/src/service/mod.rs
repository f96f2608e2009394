//! Service wiring: one state cache, one scheduler, one monitor, and the three
//! background loops that drive them.

mod hooks;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::config::{self, BulkqConfig};
use crate::error::StateError;
use crate::job::{JobConfig, JobRecord, JobStatus, JobUpdate};
use crate::monitor::{MonitorSnapshot, ResourceMonitor, SystemTelemetry, TelemetrySource};
use crate::scheduler::{
    AdmissionScheduler, JobExecutor, Priority, QueueEntry, ResourceEstimate, SchedulerStats,
};
use crate::state::{CacheStats, FlushReport, StateCache};
use crate::store::{JobRecordStore, SqliteJobStore};
use crate::sync::lock;
use crate::ticker::{self, TickerHandle};

/// Everything needed to register a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_id: String,
    pub owner_id: String,
    pub priority: Priority,
    pub cursor_start: Option<i64>,
    pub config: JobConfig,
    pub resource: ResourceEstimate,
    pub estimated_duration: Option<Duration>,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
            priority: Priority::Normal,
            cursor_start: None,
            config: JobConfig::default(),
            resource: ResourceEstimate::default(),
            estimated_duration: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn cursor_start(mut self, cursor: i64) -> Self {
        self.cursor_start = Some(cursor);
        self
    }

    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resource(mut self, resource: ResourceEstimate) -> Self {
        self.resource = resource;
        self
    }

    pub fn estimated_duration(mut self, d: Duration) -> Self {
        self.estimated_duration = Some(d);
        self
    }

    fn queue_entry(&self) -> QueueEntry {
        let mut entry = QueueEntry::new(&self.job_id, &self.owner_id, self.priority)
            .with_resource(self.resource);
        entry.estimated_duration = self.estimated_duration;
        entry
    }
}

/// What `recover_owner_jobs` put back in the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Pending jobs that never started.
    pub pending: usize,
    /// Jobs that were Running when the process stopped.
    pub interrupted: usize,
    /// Paused and terminal jobs left as they are.
    pub left_alone: usize,
}

impl RecoveryReport {
    pub fn requeued(&self) -> usize {
        self.pending + self.interrupted
    }
}

/// Combined stats of all components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    pub monitor: MonitorSnapshot,
}

pub struct BulkService {
    config: BulkqConfig,
    state: Arc<StateCache>,
    scheduler: Arc<AdmissionScheduler>,
    monitor: Arc<ResourceMonitor>,
    tickers: Mutex<Vec<TickerHandle>>,
}

impl BulkService {
    pub fn new(
        config: BulkqConfig,
        store: Arc<dyn JobRecordStore>,
        telemetry: Arc<dyn TelemetrySource>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        let state = Arc::new(StateCache::new(store, config.write_back.batch_save_size));
        let scheduler = Arc::new(AdmissionScheduler::new(
            config.scheduler.limits(),
            Arc::clone(&state),
            Arc::clone(&telemetry),
            executor,
        ));
        let monitor = Arc::new(ResourceMonitor::new(
            telemetry,
            config.monitor.thresholds,
            config.monitor.actions.clone(),
            config.monitor.history_size,
        ));
        hooks::register_builtin_hooks(&monitor, &state, &scheduler);
        Self {
            config,
            state,
            scheduler,
            monitor,
            tickers: Mutex::new(Vec::new()),
        }
    }

    /// Service over the default config, SQLite store and host telemetry.
    pub async fn open_default(executor: Arc<dyn JobExecutor>) -> Result<Self> {
        let config = config::load_or_init()?;
        config.validate()?;
        let store = SqliteJobStore::open_default().await?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(SystemTelemetry::new()),
            executor,
        ))
    }

    pub fn config(&self) -> &BulkqConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateCache> {
        &self.state
    }

    pub fn scheduler(&self) -> &Arc<AdmissionScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// Create the job record and queue it.
    ///
    /// If only the initial write fails the job is still queued and the
    /// `Persistence` error means "registered, not yet durable".
    pub async fn register_job(&self, request: JobRequest) -> Result<JobRecord, StateError> {
        let created = self
            .state
            .create(
                request.job_id.clone(),
                request.owner_id.clone(),
                request.cursor_start,
                request.config.clone(),
            )
            .await;
        match &created {
            Ok(_) | Err(StateError::Persistence { .. }) => {
                self.scheduler.queue(request.queue_entry());
            }
            Err(_) => {}
        }
        created
    }

    /// Queue an already registered job.
    pub fn queue_job(&self, entry: QueueEntry) -> bool {
        self.scheduler.queue(entry)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, StateError> {
        if self.scheduler.cancel(job_id).await? {
            return Ok(true);
        }
        // Not scheduled in this process (e.g. paused before a restart).
        match self.state.status(job_id).await {
            Some(JobStatus::Pending) | Some(JobStatus::Paused) => self
                .state
                .update(job_id, JobUpdate::new().status(JobStatus::Cancelled))
                .await,
            _ => Ok(false),
        }
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<bool, StateError> {
        self.scheduler.pause(job_id).await
    }

    /// Resume a paused job. A paused job this process is not running (paused
    /// before a restart) is queued again at `priority`.
    pub async fn resume_job(&self, job_id: &str, priority: Priority) -> Result<bool, StateError> {
        if self.scheduler.resume(job_id).await? {
            return Ok(true);
        }
        let Some(record) = self.state.get(job_id).await else {
            return Ok(false);
        };
        if record.status != JobStatus::Paused {
            return Ok(false);
        }
        Ok(self
            .scheduler
            .queue(QueueEntry::new(record.job_id, record.owner_id, priority)))
    }

    pub fn get_stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.state.stats(),
            scheduler: self.scheduler.stats(),
            monitor: self.monitor.snapshot(),
        }
    }

    /// Requeue one owner's unfinished jobs after a restart.
    ///
    /// Pending jobs are queued as they are. Jobs that were Running are marked
    /// Paused first (their executor is gone) and queued; dispatch resumes them
    /// from their cursor. Jobs paused on purpose and finished jobs are left alone.
    pub async fn recover_owner_jobs(
        &self,
        owner_id: &str,
        priority: Priority,
    ) -> Result<RecoveryReport, StateError> {
        let mut report = RecoveryReport::default();
        for record in self.state.get_owner_jobs(owner_id).await? {
            let job_id = record.job_id.as_str();
            if self.scheduler.is_queued(job_id) || self.scheduler.is_running(job_id) {
                continue;
            }
            match record.status {
                JobStatus::Pending => report.pending += 1,
                JobStatus::Running => {
                    self.state
                        .update(job_id, JobUpdate::new().status(JobStatus::Paused))
                        .await?;
                    report.interrupted += 1;
                }
                _ => {
                    report.left_alone += 1;
                    continue;
                }
            }
            self.scheduler
                .queue(QueueEntry::new(job_id, owner_id, priority));
        }
        if report.requeued() > 0 {
            tracing::info!(
                owner_id,
                pending = report.pending,
                interrupted = report.interrupted,
                "recovered jobs"
            );
        }
        Ok(report)
    }

    /// `recover_owner_jobs` for every owner in the store.
    pub async fn recover_all(&self, priority: Priority) -> Result<RecoveryReport, StateError> {
        let owners = self
            .state
            .store()
            .list_owners()
            .await
            .map_err(|e| StateError::persistence("*", e))?;
        let mut total = RecoveryReport::default();
        for owner_id in owners {
            let r = self.recover_owner_jobs(&owner_id, priority).await?;
            total.pending += r.pending;
            total.interrupted += r.interrupted;
            total.left_alone += r.left_alone;
        }
        Ok(total)
    }

    pub async fn plan_for_bulk(&self, job_count: usize, est_memory_per_job_mb: f64) -> usize {
        self.monitor
            .plan_for_bulk(job_count, est_memory_per_job_mb)
            .await
    }

    /// Remove the owner's finished jobs older than the configured retention.
    pub async fn cleanup_terminal(&self, owner_id: &str) -> Result<usize, StateError> {
        self.state
            .cleanup_terminal(owner_id, self.config.retention_hours)
            .await
    }

    /// Spawn the admission, monitor and write-back loops on the current
    /// runtime. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut tickers = lock(&self.tickers);
        if !tickers.is_empty() {
            tracing::warn!("service already started");
            return;
        }
        tickers.push(ticker::spawn(
            "admission",
            Arc::clone(&self.scheduler),
            self.config.scheduler.interval(),
        ));
        tickers.push(ticker::spawn(
            "monitor",
            Arc::clone(&self.monitor),
            self.config.monitor.interval(),
        ));
        tickers.push(ticker::spawn(
            "write-back",
            Arc::clone(&self.state),
            self.config.write_back.save_interval(),
        ));
        tracing::info!("bulk service started");
    }

    /// Stop the loops (write-back last, which flushes on the way out) and
    /// flush whatever is still dirty.
    pub async fn shutdown(&self) -> FlushReport {
        let tickers: Vec<TickerHandle> = lock(&self.tickers).drain(..).collect();
        for handle in tickers {
            let name = handle.name();
            handle.stop().await;
            tracing::debug!(ticker = name, "stopped");
        }
        let report = self.state.flush_all_dirty().await;
        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "shutdown left job records unsaved");
        }
        tracing::info!("bulk service stopped");
        report
    }
}
