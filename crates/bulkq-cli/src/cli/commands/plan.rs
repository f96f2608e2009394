//! `bulkq plan --jobs N` – size a bulk run against current memory.

use std::sync::Arc;

use anyhow::{bail, Result};
use bulkq_core::config::BulkqConfig;
use bulkq_core::monitor::{ResourceMonitor, SystemTelemetry};

pub async fn run_plan(cfg: &BulkqConfig, jobs: usize, mem_per_job: f64) -> Result<()> {
    if !mem_per_job.is_finite() || mem_per_job < 0.0 {
        bail!("--mem-per-job must be a non-negative number of MB");
    }
    // No service here, so the ladder has no hooks to run.
    let monitor = ResourceMonitor::new(
        Arc::new(SystemTelemetry::new()),
        cfg.monitor.thresholds,
        cfg.monitor.actions.clone(),
        cfg.monitor.history_size,
    );
    let now = monitor.plan_for_bulk(jobs, mem_per_job).await;
    println!("Start {now} of {jobs} job(s) now at {mem_per_job} MB each");
    if now < jobs {
        println!("Queue the remaining {} for later", jobs - now);
    }
    Ok(())
}
