//! `bulkq resume <job_id>` – mark a paused job as running again.
//!
//! No executor is attached here; the service's recovery pass treats the job
//! as interrupted and requeues it from its cursor.

use anyhow::{bail, Result};
use bulkq_core::job::JobStatus;

use super::set_status;
use crate::cli::StoreContext;

pub async fn run_resume(ctx: &StoreContext, job_id: &str) -> Result<()> {
    match ctx.state.status(job_id).await {
        Some(JobStatus::Paused) => {}
        Some(other) => bail!("job {job_id} is {other}, only paused jobs can be resumed"),
        None => bail!("no job {job_id}"),
    }
    set_status(ctx, job_id, JobStatus::Running).await?;
    println!("Resumed job {job_id} (requeued on next service recovery)");
    Ok(())
}
