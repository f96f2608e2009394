//! `bulkq cancel <job_id>` – cancel a job that has not finished.

use anyhow::Result;
use bulkq_core::job::JobStatus;

use super::set_status;
use crate::cli::StoreContext;

pub async fn run_cancel(ctx: &StoreContext, job_id: &str) -> Result<()> {
    set_status(ctx, job_id, JobStatus::Cancelled).await?;
    println!("Cancelled job {job_id} (a running service releases it on its next tick)");
    Ok(())
}
