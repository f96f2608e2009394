//! `bulkq pause <job_id>` – mark a running job as paused.

use anyhow::Result;
use bulkq_core::job::JobStatus;

use super::set_status;
use crate::cli::StoreContext;

pub async fn run_pause(ctx: &StoreContext, job_id: &str) -> Result<()> {
    set_status(ctx, job_id, JobStatus::Paused).await?;
    println!("Paused job {job_id} (a running service adopts it on its next tick)");
    Ok(())
}
